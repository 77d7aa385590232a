//! Index a small folder of research notes and ask it a question.
//!
//! Needs the local embedding and re-ranking models (downloaded on first use)
//! and an OpenAI-compatible chat endpoint for summaries, configured through
//! `finrag.toml` or the defaults in [`RagConfig`].

use anyhow::Result;
use finrag_retriever::{IndexingEngine, RagConfig};
use tempfile::tempdir;

const NOTES: &[(&str, &str)] = &[
    (
        "risk_q3.txt",
        "Q3 risk review. One-day 99% VaR for the equity book averaged 2.1m, up from 1.7m \
         as single-stock concentration rose. No limit breaches were recorded.",
    ),
    (
        "rates_outlook.txt",
        "Rates outlook. We expect two cuts next year and keep the bond ladder short, \
         with average duration under four years.",
    ),
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let dir = tempdir()?;
    for (name, text) in NOTES {
        std::fs::write(dir.path().join(name), text)?;
    }

    let config = RagConfig::for_data_dir(dir.path());
    let engine = IndexingEngine::open_with_models(config).await?;
    let report = engine.index(false).await?;
    println!(
        "Indexed {} documents into {} chunks",
        report.ingested, report.chunks_created
    );

    let result = engine.query("How much did VaR change last quarter?").await?;
    println!("{}", result.render_context());
    Ok(())
}

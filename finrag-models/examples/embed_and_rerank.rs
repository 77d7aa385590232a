//! Embed a few summaries, then re-rank passages for a query with the local models

use finrag_models::{
    EmbedConfig, EmbeddingProvider, FastEmbedProvider, FastEmbedReranker, RerankConfig,
    RerankProvider,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let embed_config = EmbedConfig::default().with_batch_size(2);
    println!("Embedding model: {}", embed_config.model_name);
    let provider = FastEmbedProvider::create(embed_config).await?;
    println!("Dimension: {}", provider.embedding_dimension());

    let summaries = vec![
        "Apple's fiscal Q3 report: iPhone revenue up, services at a record.".to_string(),
        "Federal Reserve minutes discussing the path of interest rates.".to_string(),
    ];
    let result = provider.embed_texts(&summaries).await?;
    let query = provider.embed_text("How is Apple doing?").await?;

    for (summary, embedding) in summaries.iter().zip(result.embeddings.iter()) {
        let similarity: f32 = embedding
            .iter()
            .zip(query.iter())
            .map(|(a, b)| a.to_f32() * b.to_f32())
            .sum();
        println!("{similarity:.4}  {summary}");
    }

    let reranker = FastEmbedReranker::create(RerankConfig::default()).await?;
    let passages = vec![
        "Services revenue reached an all-time high of $24.2 billion.".to_string(),
        "The committee left the federal funds rate unchanged.".to_string(),
    ];
    let scores = reranker
        .score_batch("Apple services revenue", &passages)
        .await?;
    for (passage, score) in passages.iter().zip(scores) {
        println!("{score:>8.3}  {passage}");
    }

    Ok(())
}

use clap::{Parser, Subcommand};
use finrag_retriever::status::IndexStatus;
use finrag_retriever::storage::ChildStore;
use finrag_retriever::storage::sqlite_store::SqliteChildStore;
use finrag_retriever::{IndexingEngine, ParentId, RagConfig, RagError, RetrievalResult};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "finrag.toml";

/// Index a folder of financial documents and retrieve the passages that answer a question.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (defaults to ./finrag.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing the source documents; overrides the config file
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarize, chunk and embed new or changed documents
    Index {
        /// Re-ingest every document even if its content is unchanged
        #[arg(long)]
        force_rebuild: bool,
        /// Delete all index state first (recovers from corruption or a model change)
        #[arg(long)]
        reset: bool,
    },
    /// Retrieve the chunks that best answer a question
    Query {
        /// The question
        text: String,
        /// Parents (documents) to fan out from
        #[arg(long)]
        top_parents: Option<usize>,
        /// Chunks to return
        #[arg(long)]
        top_chunks: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List stored child chunks
    Chunks {
        /// Only chunks of this parent
        #[arg(long)]
        parent: Option<String>,
        /// Limit number of results
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show index statistics and consistency
    Status {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Delete all index state; source documents are left alone
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
    Context,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            "context" => Ok(OutputFormat::Context),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        if e.downcast_ref::<RagError>().is_some_and(RagError::requires_rebuild) {
            eprintln!("Hint: run `finrag index --reset` to rebuild the index from the source documents");
        }
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<RagConfig> {
    let mut config = match &args.config {
        Some(path) => RagConfig::load(path)?,
        None if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() => {
            RagConfig::load(&PathBuf::from(DEFAULT_CONFIG_FILE))?
        }
        None => RagConfig::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Commands::Index {
            force_rebuild,
            reset,
        } => {
            if reset {
                let removed = IndexingEngine::reset_storage(&config).await?;
                println!("Removed {removed} state file(s) from {}", config.state_dir().display());
            }
            let engine = IndexingEngine::open_with_models(config).await?;
            let report = engine.index(force_rebuild || reset).await?;

            println!(
                "Scanned {} documents: {} ingested ({} chunks), {} unchanged, {} removed in {:.1?}",
                report.scanned,
                report.ingested,
                report.chunks_created,
                report.unchanged,
                report.removed,
                report.elapsed
            );
            for (path, reason) in &report.failed {
                println!("  skipped {path}: {reason}");
            }
            Ok(())
        }
        Commands::Query {
            text,
            top_parents,
            top_chunks,
            format,
        } => {
            let top_parents = top_parents.unwrap_or(config.retrieval.top_parents);
            let top_chunks = top_chunks.unwrap_or(config.retrieval.top_chunks);
            let engine = IndexingEngine::open_with_models(config).await?;
            let result = engine.query_with(&text, top_parents, top_chunks).await?;
            print_result(&result, format)
        }
        Commands::Chunks {
            parent,
            limit,
            format,
        } => {
            let path = config.child_store_path();
            if !path.exists() {
                println!("No child store at {}; run `finrag index` first", path.display());
                return Ok(());
            }
            let store = SqliteChildStore::open(&path).await?;
            let mut chunks = match parent {
                Some(parent) => store.children_of(&ParentId::from(parent)).await?,
                None => store.all_chunks().await?,
            };
            let total = chunks.len();
            chunks.truncate(limit);

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&chunks)?),
                OutputFormat::Summary => {
                    println!("Showing {} of {} chunks:", chunks.len(), total);
                    for chunk in &chunks {
                        println!(
                            "  {} | {} | chars {}-{}",
                            chunk.id, chunk.relative_path, chunk.char_start, chunk.char_end
                        );
                    }
                }
                OutputFormat::Full | OutputFormat::Context => {
                    for chunk in &chunks {
                        println!("Chunk: {}", chunk.id);
                        println!("File: {}", chunk.relative_path);
                        println!("Chars: {}-{}", chunk.char_start, chunk.char_end);
                        println!("{}", chunk.contextualized_text());
                        println!("{}", "-".repeat(80));
                    }
                }
            }
            Ok(())
        }
        Commands::Status { format } => {
            let status = IndexStatus::collect(&config).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                _ => println!("{status}"),
            }
            Ok(())
        }
        Commands::Reset => {
            let removed = IndexingEngine::reset_storage(&config).await?;
            println!("Removed {removed} state file(s) from {}", config.state_dir().display());
            Ok(())
        }
    }
}

fn print_result(result: &RetrievalResult, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Context => {
            println!("{}", result.render_context());
            Ok(())
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
            Ok(())
        }
        OutputFormat::Summary | OutputFormat::Full => {
            if result.is_empty() {
                println!("{}", finrag_retriever::retrieval::retriever::NO_RESULTS_MESSAGE);
                return Ok(());
            }
            println!(
                "Matched {} documents, ranked by {:?}:",
                result.parents.len(),
                result.ranking
            );
            for parent in &result.parents {
                let similarity = parent
                    .similarity
                    .map(|s| format!("{s:.3}"))
                    .unwrap_or_else(|| "keyword".to_string());
                println!("  {} ({})", parent.relative_path, similarity);
            }
            println!();
            for (rank, scored) in result.chunks.iter().enumerate() {
                let chunk = &scored.chunk;
                println!(
                    "#{} score {:.4} | {} chars {}-{}",
                    rank + 1,
                    scored.score,
                    chunk.relative_path,
                    chunk.char_start,
                    chunk.char_end
                );
                if format == OutputFormat::Full {
                    println!("{}", chunk.contextualized_text());
                    println!("{}", "-".repeat(80));
                } else {
                    let preview: String = chunk.text.chars().take(160).collect();
                    println!("   {}", preview.replace('\n', " "));
                }
            }
            Ok(())
        }
    }
}

//! # finrag-models
//!
//! Model collaborators for the finrag retrieval pipeline. Each capability is a
//! small async trait with one concrete binding:
//!
//! - [`EmbeddingProvider`]: dense text embeddings. [`FastEmbedProvider`] runs
//!   BGE models locally through FastEmbed/ONNX and returns L2-normalized f16
//!   vectors.
//! - [`RerankProvider`]: cross-encoder relevance scores for query/passage
//!   pairs. [`FastEmbedReranker`] runs `bge-reranker-base` locally.
//! - [`Summarizer`]: whole-document summaries. [`ChatCompletionSummarizer`]
//!   talks to any OpenAI-compatible chat-completions endpoint such as a local
//!   llama.cpp server.
//!
//! ## Quick Start
//!
//! ```no_run
//! use finrag_models::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//!
//! let texts = vec!["Apple beat earnings".to_string(), "Rates on hold".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}",
//!          result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! Models are cached process-wide, keyed by a hash of their configuration, so
//! opening several providers with the same settings loads the weights once.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with [`ModelError`].
//! [`ModelError::is_retryable`] separates transient transport failures from
//! errors that will repeat, which callers use to drive bounded retries.

pub mod config;
pub mod error;
pub mod provider;
pub mod rerank;
pub mod summarize;

pub use config::{EmbedConfig, RerankConfig, SummarizerConfig};
pub use error::{ModelError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};
pub use rerank::{FastEmbedReranker, RerankProvider};
pub use summarize::{ChatCompletionSummarizer, Summarizer, clean_summary};

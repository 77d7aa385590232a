//! finrag-retriever: summary-vector (parent-document) retrieval over a folder
//! of financial documents.
//!
//! Each document is summarized once and only the summary is embedded, so
//! indexing cost grows with the number of documents rather than the number
//! of chunks. At query time the summaries are searched first, every chunk of
//! the matched documents becomes a candidate, and a cross-encoder picks the
//! chunks that answer the question.
//!
//! ## Key Modules
//!
//! - **[`document`]**: content hashing, parent identifiers and directory scanning
//! - **[`retrieval`]**: cache manager, ingestion, re-ranking, retrieval and the
//!   [`IndexingEngine`] that ties them together
//! - **[`storage`]**: the parent vector index and the SQLite child store
//! - **[`status`]**: index statistics and consistency checks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use finrag_retriever::{IndexingEngine, RagConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = IndexingEngine::open_with_models(RagConfig::default()).await?;
//! engine.index(false).await?;
//!
//! let result = engine.query("What is our VaR exposure?").await?;
//! println!("{}", result.render_context());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! data dir → CacheManager → summarize → chunk → embed summary
//!                                         │           │
//!                                    ChildStore   ParentIndex
//!                                         │           │
//! query → embed → ParentIndex::search → fan-out → re-rank → top chunks
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod retrieval;
pub mod status;
pub mod storage;

pub use config::RagConfig;
pub use document::{ContentHash, Document, DocumentScanner, ParentId};
pub use error::{RagError, Result};
pub use retrieval::indexing_engine::{Collaborators, IndexReport, IndexingEngine};
pub use retrieval::retriever::{RankingSource, RetrievalResult};

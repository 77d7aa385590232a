//! Per-document ingestion: summarize, chunk, prefix, embed the summary.
//!
//! [`IngestionPipeline::ingest`] is pure with respect to storage. It returns
//! the ParentRecord and its ChildChunks and leaves persisting them to the
//! indexing engine's commit, so a batch that fails halfway never leaves
//! partial index state behind.

use super::call_policy::{CallError, CallPolicy};
use super::chunking_strategy::ChunkingStrategy;
use crate::document::Document;
use crate::error::{RagError, Result};
use crate::storage::{ChildChunk, ParentRecord};
use finrag_models::{EmbeddingProvider, ModelError, Summarizer, clean_summary};
use std::sync::Arc;
use tracing::{debug, info};

/// Output of ingesting one document, not yet persisted
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub parent: ParentRecord,
    pub children: Vec<ChildChunk>,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingStrategy,
    policy: CallPolicy,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("summarizer", &self.summarizer.summarizer_name())
            .field("embedder", &self.embedder.model_name())
            .field("chunking", self.chunking.config())
            .field("policy", &self.policy)
            .finish()
    }
}

impl IngestionPipeline {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingStrategy,
        policy: CallPolicy,
    ) -> Self {
        Self {
            summarizer,
            embedder,
            chunking,
            policy,
        }
    }

    /// Build the ParentRecord and ChildChunks for `document`.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyDocument`] when there is no extractable text
    /// - [`RagError::Summarization`] when the summarizer fails, times out on
    ///   every attempt or returns nothing usable
    /// - [`RagError::Embedding`] / [`RagError::DimensionMismatch`] when the
    ///   summary cannot be embedded into the configured dimension
    pub async fn ingest(&self, document: &Document) -> Result<IngestedDocument> {
        let path = document.relative_path.clone();
        let text = document
            .text()
            .ok_or_else(|| RagError::EmptyDocument { path: path.clone() })?;
        let parent_id = document.parent_id();

        let summary = self.summarize(&path, text).await?;
        debug!("Summary for {}: {} chars", path, summary.chars().count());

        let children =
            self.chunking
                .chunk_document(&parent_id, &path, document.file_name(), text, &summary);

        let embedding = self
            .policy
            .run("embedding", || self.embedder.embed_text(&summary))
            .await
            .map_err(|source| RagError::Embedding { source })?;
        let expected = self.embedder.embedding_dimension();
        if embedding.len() != expected {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        info!(
            "Ingested {} into parent {} with {} children",
            path,
            parent_id,
            children.len()
        );
        Ok(IngestedDocument {
            parent: ParentRecord {
                parent_id,
                relative_path: path,
                content_hash: document.hash,
                summary,
                embedding,
                child_ids: children.iter().map(|c| c.id.clone()).collect(),
            },
            children,
        })
    }

    async fn summarize(&self, path: &str, text: &str) -> Result<String> {
        let raw = self
            .policy
            .run("summarization", || self.summarizer.summarize(text))
            .await
            .map_err(|source| RagError::Summarization {
                path: path.to_string(),
                source,
            })?;

        let max_chars = self.chunking.config().max_summary_chars;
        let summary: String = clean_summary(&raw).chars().take(max_chars).collect();
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(RagError::Summarization {
                path: path.to_string(),
                source: CallError::rejected(
                    "summarization",
                    ModelError::EmptyOutput { what: "summary" },
                ),
            });
        }
        Ok(summary)
    }
}

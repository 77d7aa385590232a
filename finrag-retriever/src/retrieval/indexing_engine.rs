//! High-level engine that owns the stores and runs index and query operations.
//!
//! ## Pipeline Flow
//!
//! ```text
//! DocumentScanner → CacheManager::sync → IngestionPipeline (× max_workers)
//!                                               │
//!                    ┌──────── single-writer commit ────────┐
//!                    │ ChildStore::replace_children          │
//!                    │ ParentIndex add/remove + persist      │
//!                    │ ChildStore delete removed parents     │
//!                    │ CacheManager::commit                  │
//!                    │ KeywordIndex rebuild (hybrid only)    │
//!                    └───────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Documents are ingested concurrently since they are independent. All store
//! writes happen in one commit under a writer mutex, which also owns the
//! cache table, so there is exactly one writer at a time. The commit takes
//! the parent index write lock for its whole duration; queries hold the read
//! lock, so a query sees either the state before a commit or after it.
//!
//! ## Failure handling
//!
//! - Empty documents and summarizer failures skip that document only. It gets
//!   no cache entry and is retried on the next run.
//! - Embedding failures abort the run before anything is written.
//! - A failed persist leaves the in-memory index untouched; child rows written
//!   before the failure are swept as orphans the next time the engine opens.

use super::cache_manager::{CacheCommit, CacheEntry, CacheManager};
use super::call_policy::CallPolicy;
use super::chunking_strategy::ChunkingStrategy;
use super::ingest::{IngestedDocument, IngestionPipeline};
use super::reranker::Reranker;
use super::retriever::{RetrievalResult, Retriever};
use super::sparse::KeywordIndex;
use crate::config::RagConfig;
use crate::document::{Document, DocumentScanner, ParentId};
use crate::error::{RagError, Result};
use crate::status::IndexStatus;
use crate::storage::ChildStore;
use crate::storage::parent_index::{EmbeddingModelMetadata, ParentIndex};
use crate::storage::sqlite_store::SqliteChildStore;
use chrono::Utc;
use finrag_models::{
    ChatCompletionSummarizer, EmbeddingProvider, FastEmbedProvider, FastEmbedReranker,
    RerankProvider, Summarizer,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// The three model capabilities the engine depends on
#[derive(Clone)]
pub struct Collaborators {
    pub summarizer: Arc<dyn Summarizer>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub reranker: Arc<dyn RerankProvider>,
}

impl Collaborators {
    /// Load the configured FastEmbed models and connect the summarizer endpoint.
    pub async fn from_config(config: &RagConfig) -> Result<Self> {
        info!(
            "Loading embedding model {} and reranker {}",
            config.embedding.model_name, config.reranker.model_name
        );
        let embedder = FastEmbedProvider::create(config.embedding.clone()).await?;
        let reranker = FastEmbedReranker::create(config.reranker.clone()).await?;
        let summarizer = ChatCompletionSummarizer::new(config.summarizer.clone())?;
        Ok(Self {
            summarizer: Arc::new(summarizer),
            embedder: Arc::new(embedder),
            reranker: Arc::new(reranker),
        })
    }
}

/// Outcome of one index run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub scanned: usize,
    pub ingested: usize,
    pub unchanged: usize,
    /// Parents purged from the index (changed, deleted or untracked documents)
    pub removed: usize,
    /// Documents skipped this run, with the reason
    pub failed: Vec<(String, String)>,
    pub chunks_created: usize,
    pub elapsed: Duration,
}

impl IndexReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The main engine: owns the parent index, child store, cache table and models
pub struct IndexingEngine {
    config: RagConfig,
    scanner: DocumentScanner,
    pipeline: IngestionPipeline,
    retriever: Retriever,
    parents: RwLock<ParentIndex>,
    children: Arc<dyn ChildStore>,
    keywords: RwLock<Option<KeywordIndex>>,
    /// Single-writer lock; owns the cache table
    writer: Mutex<CacheManager>,
}

impl std::fmt::Debug for IndexingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingEngine")
            .field("data_dir", &self.config.data_dir)
            .field("state_dir", &self.config.state_dir())
            .field("pipeline", &self.pipeline)
            .field("retriever", &self.retriever)
            .finish()
    }
}

impl IndexingEngine {
    /// Open the engine with the models named in `config`.
    pub async fn open_with_models(config: RagConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config).await?;
        Self::open(config, collaborators).await
    }

    /// Open the state directory with the given collaborators.
    ///
    /// # Errors
    ///
    /// [`RagError::ModelMismatch`] when the stored index was built with a
    /// different embedding model, [`RagError::IndexCorruption`] when a state
    /// file cannot be read back. Both are recovered with [`Self::reset_storage`]
    /// followed by a full index run.
    pub async fn open(config: RagConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let state_dir = config.state_dir();
        tokio::fs::create_dir_all(&state_dir).await?;

        let embedder = collaborators.embedder;
        let model = EmbeddingModelMetadata::new(
            embedder.model_name().to_string(),
            embedder.provider_name().to_string(),
            embedder.embedding_dimension(),
        );
        let parents = ParentIndex::open(&config.parent_index_path(), model).await?;

        let children: Arc<dyn ChildStore> =
            Arc::new(SqliteChildStore::open(&config.child_store_path()).await?);
        let live = parents.parent_ids();
        let swept = children.retain_parents(&live).await?;
        if swept > 0 {
            warn!("Swept {} orphaned child chunks", swept);
        }

        let mut cache = CacheManager::load(&config.cache_path()).await?;
        let dropped = cache.retain_live(|id| live.contains(id));
        if dropped > 0 {
            warn!("{} cache entries had no parent and will be re-ingested", dropped);
        }

        let keywords = if config.retrieval.hybrid {
            Some(KeywordIndex::build(&children.all_chunks().await?))
        } else {
            None
        };

        let policy = config.calls;
        let chunking = ChunkingStrategy::new(config.chunking.clone())?;
        let pipeline = IngestionPipeline::new(
            collaborators.summarizer,
            embedder.clone(),
            chunking,
            policy,
        );
        let reranker = Reranker::new(collaborators.reranker, policy)
            .with_max_input_chars(config.retrieval.rerank_max_input_chars)
            .with_batch_size(config.retrieval.rerank_batch_size);
        let retriever = Retriever::new(embedder, reranker, policy, config.retrieval.clone());

        info!(
            "Opened index at {} ({} parents, {} cached documents)",
            state_dir.display(),
            parents.len(),
            cache.len()
        );

        Ok(Self {
            scanner: DocumentScanner::new(config.extensions.clone(), config.recursive),
            config,
            pipeline,
            retriever,
            parents: RwLock::new(parents),
            children,
            keywords: RwLock::new(keywords),
            writer: Mutex::new(cache),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn child_store(&self) -> &dyn ChildStore {
        self.children.as_ref()
    }

    pub async fn parent_count(&self) -> usize {
        self.parents.read().await.len()
    }

    /// Scan the data directory and bring the index up to date.
    pub async fn index(&self, force_rebuild: bool) -> Result<IndexReport> {
        let documents = self.scanner.scan(&self.config.data_dir).await?;
        self.index_documents(documents, force_rebuild).await
    }

    /// Bring the index up to date with exactly `documents`.
    ///
    /// Documents previously indexed but absent from `documents` are removed.
    pub async fn index_documents(
        &self,
        documents: Vec<Document>,
        force_rebuild: bool,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        let mut cache = self.writer.lock().await;

        let mut report = IndexReport {
            scanned: documents.len(),
            ..IndexReport::default()
        };
        let plan = cache.sync(documents, force_rebuild);
        report.unchanged = plan.unchanged.len();
        info!(
            "Index plan: {} to ingest, {} to remove, {} unchanged{}",
            plan.to_ingest.len(),
            plan.to_remove.len(),
            plan.unchanged.len(),
            if force_rebuild { " (forced rebuild)" } else { "" }
        );

        let ingested = self.ingest_all(&plan.to_ingest, &mut report).await?;

        let mut commit = CacheCommit {
            removed_paths: plan.vanished.clone(),
            ..CacheCommit::default()
        };
        let ingested_paths: HashSet<&str> = ingested
            .iter()
            .map(|doc| doc.parent.relative_path.as_str())
            .collect();
        // A skipped document keeps its entry and parent while its content is
        // unchanged (forced rebuild); changed content is purged and retried.
        for document in &plan.to_ingest {
            let path = document.relative_path.as_str();
            let unchanged = cache.get(path).is_some_and(|entry| entry.hash == document.hash);
            if !ingested_paths.contains(path) && !unchanged {
                commit.removed_paths.push(document.relative_path.clone());
            }
        }
        let indexed_at = Utc::now();
        commit.upserts = ingested
            .iter()
            .map(|doc| CacheEntry {
                relative_path: doc.parent.relative_path.clone(),
                hash: doc.parent.content_hash,
                parent_id: doc.parent.parent_id.clone(),
                child_ids: doc.parent.child_ids.clone(),
                indexed_at,
            })
            .collect();
        let live = cache.live_after(&commit);

        {
            let mut parents = self.parents.write().await;
            let stale: Vec<ParentId> = parents
                .parent_ids()
                .into_iter()
                .filter(|id| !live.contains(id))
                .collect();

            if ingested.is_empty() && stale.is_empty() && commit.removed_paths.is_empty() {
                report.elapsed = started.elapsed();
                info!("Index is up to date ({} documents)", report.unchanged);
                return Ok(report);
            }

            for doc in &ingested {
                self.children
                    .replace_children(&doc.parent.parent_id, &doc.children)
                    .await?;
            }

            let mut next = parents.clone();
            for doc in &ingested {
                next.add(doc.parent.clone())?;
            }
            for parent_id in &stale {
                next.remove(parent_id);
            }
            let stats = next.persist().await?;
            info!(
                "Rewrote parent index: {} vectors, {} bytes",
                stats.vectors, stats.bytes
            );
            *parents = next;

            for parent_id in &stale {
                let deleted = self.children.delete_by_parent(parent_id).await?;
                debug!("Removed parent {} and {} children", parent_id, deleted);
            }
            report.removed = stale.len();

            cache.commit(commit).await?;

            if self.config.retrieval.hybrid {
                let rebuilt = KeywordIndex::build(&self.children.all_chunks().await?);
                *self.keywords.write().await = Some(rebuilt);
            }
        }

        report.ingested = ingested.len();
        report.chunks_created = ingested.iter().map(|doc| doc.children.len()).sum();
        report.elapsed = started.elapsed();
        info!(
            "Indexed {} documents ({} chunks), removed {}, skipped {}, in {:?}",
            report.ingested,
            report.chunks_created,
            report.removed,
            report.failed.len(),
            report.elapsed
        );
        Ok(report)
    }

    async fn ingest_all(
        &self,
        documents: &[Document],
        report: &mut IndexReport,
    ) -> Result<Vec<IngestedDocument>> {
        let pipeline = &self.pipeline;
        let tasks: Vec<_> = documents
            .iter()
            .map(|document| async move {
                (document.relative_path.clone(), pipeline.ingest(document).await)
            })
            .collect();
        let results: Vec<(String, Result<IngestedDocument>)> = stream::iter(tasks)
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await;

        let mut ingested = Vec::with_capacity(results.len());
        let mut fatal = None;
        for (path, result) in results {
            match result {
                Ok(doc) => ingested.push(doc),
                Err(e) if e.is_document_level() => {
                    warn!("Skipping {}: {}", path, e);
                    report.failed.push((path, e.to_string()));
                }
                Err(e) => {
                    error!("Ingestion of {} failed: {}", path, e);
                    fatal.get_or_insert(e);
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        ingested.sort_by(|a, b| a.parent.relative_path.cmp(&b.parent.relative_path));
        Ok(ingested)
    }

    /// Answer `query` with the configured retrieval settings.
    pub async fn query(&self, query: &str) -> Result<RetrievalResult> {
        let settings = self.retriever.config();
        self.query_with(query, settings.top_parents, settings.top_chunks)
            .await
    }

    /// Answer `query` from one consistent snapshot of the stores.
    pub async fn query_with(
        &self,
        query: &str,
        top_parents: usize,
        top_chunks: usize,
    ) -> Result<RetrievalResult> {
        let parents = self.parents.read().await;
        let keywords = self.keywords.read().await;
        let result = self
            .retriever
            .retrieve(
                &parents,
                self.children.as_ref(),
                keywords.as_ref(),
                query,
                top_parents,
                top_chunks,
            )
            .await?;
        info!(
            "Query {:?}: {} parents, {} chunks ({:?})",
            query,
            result.parents.len(),
            result.chunks.len(),
            result.ranking
        );
        Ok(result)
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let cache = self.writer.lock().await;
        let parents = self.parents.read().await;
        IndexStatus::gather(&self.config, Some(&parents), Some(self.children.as_ref()), &cache)
            .await
    }

    /// Delete every state file so the next index run rebuilds from scratch.
    ///
    /// This is the recovery path for [`RagError::IndexCorruption`] and
    /// [`RagError::ModelMismatch`]. Source documents are never touched.
    pub async fn reset_storage(config: &RagConfig) -> Result<usize> {
        let child_store = config.child_store_path();
        let mut targets = vec![config.cache_path(), config.parent_index_path()];
        for suffix in ["", "-wal", "-shm"] {
            let mut name = child_store.clone().into_os_string();
            name.push(suffix);
            targets.push(name.into());
        }

        let mut removed = 0;
        for path in targets {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!("Removed {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RagError::from(e)),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reset_storage_removes_state_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = RagConfig::for_data_dir(dir.path());
        let state = config.state_dir();
        std::fs::create_dir_all(&state)?;
        for name in ["cache.json", "parents.fpi", "children.db", "children.db-wal"] {
            std::fs::write(state.join(name), b"x")?;
        }
        std::fs::write(dir.path().join("A.txt"), b"source")?;

        let removed = IndexingEngine::reset_storage(&config).await?;

        assert_eq!(removed, 4);
        assert!(std::fs::read_dir(&state)?.next().is_none());
        assert!(dir.path().join("A.txt").exists());
        assert_eq!(IndexingEngine::reset_storage(&config).await?, 0);
        Ok(())
    }
}

//! Index status and consistency report.
//!
//! Status is read straight from the state files, so it works without loading
//! any model and reports on an index built with a different embedding model
//! than the one currently configured.

use crate::config::RagConfig;
use crate::document::ParentId;
use crate::error::Result;
use crate::retrieval::cache_manager::CacheManager;
use crate::storage::ChildStore;
use crate::storage::parent_index::{EmbeddingModelMetadata, ParentIndex};
use crate::storage::sqlite_store::SqliteChildStore;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Cross-store consistency findings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Parents referenced by child chunks but missing from the parent index
    pub orphaned_child_parents: usize,
    /// Cache entries whose parent is missing from the parent index
    pub dangling_cache_entries: usize,
    /// Parents in the index with no cache entry
    pub untracked_parents: usize,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
    pub parents: usize,
    pub children: usize,
    pub cache_entries: usize,
    /// Model the parent index was built with, if one exists
    pub model: Option<EmbeddingModelMetadata>,
    pub metric: Option<String>,
    /// Model the configuration asks for
    pub configured_model: String,
    pub consistency: ConsistencyReport,
}

impl IndexStatus {
    /// Summarize already-open stores.
    pub async fn gather(
        config: &RagConfig,
        index: Option<&ParentIndex>,
        children: Option<&dyn ChildStore>,
        cache: &CacheManager,
    ) -> Result<Self> {
        let parent_ids: HashSet<ParentId> = index.map(|i| i.parent_ids()).unwrap_or_default();

        let (child_count, child_parents) = match children {
            Some(store) => (store.count().await?, store.parent_ids().await?),
            None => (0, HashSet::new()),
        };
        let cache_parents = cache.parent_ids();

        let consistency = ConsistencyReport {
            orphaned_child_parents: child_parents.difference(&parent_ids).count(),
            dangling_cache_entries: cache
                .entries()
                .filter(|e| !parent_ids.contains(&e.parent_id))
                .count(),
            untracked_parents: parent_ids.difference(&cache_parents).count(),
        };

        Ok(Self {
            data_dir: config.data_dir.clone(),
            state_dir: config.state_dir(),
            parents: parent_ids.len(),
            children: child_count,
            cache_entries: cache.len(),
            model: index.map(|i| i.model().clone()),
            metric: index.map(|i| i.metric().as_str().to_string()),
            configured_model: config.embedding.model_name.clone(),
            consistency,
        })
    }

    /// Read the state files named by `config`. Missing files count as empty
    /// and nothing is created.
    pub async fn collect(config: &RagConfig) -> Result<Self> {
        let index = ParentIndex::load_existing(&config.parent_index_path()).await?;

        let child_path = config.child_store_path();
        let children = if tokio::fs::try_exists(&child_path).await? {
            Some(SqliteChildStore::open(&child_path).await?)
        } else {
            None
        };

        let cache_path = config.cache_path();
        let cache = if tokio::fs::try_exists(&cache_path).await? {
            CacheManager::load(&cache_path).await?
        } else {
            CacheManager::in_memory()
        };

        Self::gather(
            config,
            index.as_ref(),
            children.as_ref().map(|c| c as &dyn ChildStore),
            &cache,
        )
        .await
    }

    pub fn is_empty(&self) -> bool {
        self.parents == 0 && self.children == 0 && self.cache_entries == 0
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Data directory:  {}", self.data_dir.display())?;
        writeln!(f, "State directory: {}", self.state_dir.display())?;
        writeln!(f, "Parents:         {}", self.parents)?;
        writeln!(f, "Child chunks:    {}", self.children)?;
        writeln!(f, "Cache entries:   {}", self.cache_entries)?;
        match &self.model {
            Some(model) => writeln!(
                f,
                "Embedding model: {} ({}, {} dims, metric {})",
                model.model_name,
                model.provider,
                model.dimension,
                self.metric.as_deref().unwrap_or("unknown")
            )?,
            None => writeln!(f, "Embedding model: none (index not built yet)")?,
        }
        if self.model.as_ref().is_some_and(|m| m.model_name != self.configured_model) {
            writeln!(
                f,
                "Warning: configured model {} differs from the index; run `finrag index --reset`",
                self.configured_model
            )?;
        }
        if self.consistency.is_consistent() {
            write!(f, "Consistency:     ok")
        } else {
            write!(
                f,
                "Consistency:     {} orphaned child parent(s), {} dangling cache entr(ies), {} untracked parent(s)",
                self.consistency.orphaned_child_parents,
                self.consistency.dangling_cache_entries,
                self.consistency.untracked_parents
            )
        }
    }
}

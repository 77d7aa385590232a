//! Hash-gated cache table deciding which documents need (re)ingestion.
//!
//! The table maps each document's relative path to the content hash it was
//! indexed with and the parent/child identifiers that ingestion produced. It
//! is the only record of "already indexed": a restart reloads it from
//! `cache.json` and compares hashes again.
//!
//! Classification ([`CacheManager::sync`]) has no side effects. The table only
//! changes through [`CacheManager::commit`], which the indexing engine calls
//! after the parent index and child store writes of a batch have succeeded.

use crate::document::{ContentHash, Document, ParentId};
use crate::error::{RagError, Result};
use crate::storage::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CACHE_FORMAT_VERSION: u32 = 1;

/// What the cache remembers about one indexed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub relative_path: String,
    /// Hash of the content at index time
    pub hash: ContentHash,
    pub parent_id: ParentId,
    pub child_ids: Vec<String>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// Result of comparing the documents on disk with the cache table
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Documents that are new, changed, or forced
    pub to_ingest: Vec<Document>,
    /// Parents whose ParentRecord and children must be purged
    pub to_remove: Vec<ParentId>,
    /// Parents of documents whose hash still matches
    pub unchanged: Vec<ParentId>,
    /// Cache keys whose backing file no longer exists
    pub vanished: Vec<String>,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.to_ingest.is_empty() && self.to_remove.is_empty()
    }
}

/// Changes applied to the table in one commit
#[derive(Debug, Default)]
pub struct CacheCommit {
    pub upserts: Vec<CacheEntry>,
    pub removed_paths: Vec<String>,
}

#[derive(Debug)]
pub struct CacheManager {
    path: Option<PathBuf>,
    entries: BTreeMap<String, CacheEntry>,
}

impl CacheManager {
    /// Cache table that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
        }
    }

    /// Load the table at `path`. A missing file is an empty table.
    pub async fn load(path: &Path) -> Result<Self> {
        let entries = if tokio::fs::try_exists(path).await? {
            let bytes = tokio::fs::read(path).await?;
            let file: CacheFile = serde_json::from_slice(&bytes)
                .map_err(|e| RagError::corruption(path, format!("unreadable cache table: {e}")))?;
            if file.version != CACHE_FORMAT_VERSION {
                return Err(RagError::corruption(
                    path,
                    format!("unsupported cache table version {}", file.version),
                ));
            }
            file.entries
                .into_iter()
                .map(|entry| (entry.relative_path.clone(), entry))
                .collect()
        } else {
            BTreeMap::new()
        };

        info!(
            "Loaded cache table {} with {} entries",
            path.display(),
            entries.len()
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    pub fn get(&self, relative_path: &str) -> Option<&CacheEntry> {
        self.entries.get(relative_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn parent_ids(&self) -> HashSet<ParentId> {
        self.entries.values().map(|e| e.parent_id.clone()).collect()
    }

    /// Parent IDs the table will reference once `commit` is applied.
    pub fn live_after(&self, commit: &CacheCommit) -> HashSet<ParentId> {
        let removed: HashSet<&str> = commit.removed_paths.iter().map(String::as_str).collect();
        let upserted: HashSet<&str> = commit
            .upserts
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        self.entries
            .values()
            .filter(|e| {
                !removed.contains(e.relative_path.as_str())
                    && !upserted.contains(e.relative_path.as_str())
            })
            .chain(commit.upserts.iter())
            .map(|e| e.parent_id.clone())
            .collect()
    }

    /// Classify `documents` against the table.
    ///
    /// With `force_rebuild` every document is re-ingested and every existing
    /// parent is scheduled for removal, except parents that the re-ingestion
    /// will produce again (same path and content), which are replaced in place.
    pub fn sync(&self, documents: Vec<Document>, force_rebuild: bool) -> SyncPlan {
        let mut plan = SyncPlan::default();
        let mut seen = HashSet::with_capacity(documents.len());

        for document in documents {
            seen.insert(document.relative_path.clone());
            let parent_id = document.parent_id();

            match self.entries.get(&document.relative_path) {
                Some(entry) if force_rebuild => {
                    if entry.parent_id != parent_id {
                        plan.to_remove.push(entry.parent_id.clone());
                    }
                    plan.to_ingest.push(document);
                }
                Some(entry) if entry.hash == document.hash => {
                    plan.unchanged.push(entry.parent_id.clone());
                }
                Some(entry) => {
                    debug!(
                        "{} changed ({} -> {})",
                        document.relative_path, entry.hash, document.hash
                    );
                    plan.to_remove.push(entry.parent_id.clone());
                    plan.to_ingest.push(document);
                }
                None => plan.to_ingest.push(document),
            }
        }

        for (relative_path, entry) in &self.entries {
            if !seen.contains(relative_path) {
                debug!("{} no longer exists", relative_path);
                plan.to_remove.push(entry.parent_id.clone());
                plan.vanished.push(relative_path.clone());
            }
        }

        plan
    }

    /// Drop entries whose parent is not live, so their documents are
    /// re-ingested on the next sync. Returns how many were dropped.
    pub fn retain_live(&mut self, is_live: impl Fn(&ParentId) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, entry| {
            let live = is_live(&entry.parent_id);
            if !live {
                warn!(
                    "Cache entry for {} points at missing parent {}; it will be re-ingested",
                    path, entry.parent_id
                );
            }
            live
        });
        before - self.entries.len()
    }

    /// Apply `commit` and atomically rewrite the table.
    pub async fn commit(&mut self, commit: CacheCommit) -> Result<()> {
        let mut next = self.entries.clone();
        for path in &commit.removed_paths {
            next.remove(path);
        }
        for entry in commit.upserts {
            next.insert(entry.relative_path.clone(), entry);
        }

        if let Some(path) = &self.path {
            let file = CacheFile {
                version: CACHE_FORMAT_VERSION,
                entries: next.values().cloned().collect(),
            };
            let bytes = serde_json::to_vec_pretty(&file)
                .map_err(|e| RagError::config(format!("cannot encode cache table: {e}")))?;
            write_atomic(path, bytes).await?;
            debug!("Wrote cache table {} ({} entries)", path.display(), next.len());
        }

        self.entries = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry_for(document: &Document) -> CacheEntry {
        let parent_id = document.parent_id();
        CacheEntry {
            relative_path: document.relative_path.clone(),
            hash: document.hash,
            child_ids: vec![format!("{parent_id}:0")],
            parent_id,
            indexed_at: Utc::now(),
        }
    }

    async fn seeded(documents: &[Document]) -> CacheManager {
        let mut cache = CacheManager::in_memory();
        cache
            .commit(CacheCommit {
                upserts: documents.iter().map(entry_for).collect(),
                removed_paths: Vec::new(),
            })
            .await
            .unwrap();
        cache
    }

    #[tokio::test]
    async fn test_sync_classifies_documents() {
        let a = Document::from_text("A.txt", "Portfolio risk overview");
        let b = Document::from_text("B.txt", "Bond ladder notes");
        let gone = Document::from_text("C.txt", "Deleted later");
        let cache = seeded(&[a.clone(), b.clone(), gone.clone()]).await;

        let b_edited = Document::from_text("B.txt", "Bond ladder notes, revised");
        let d = Document::from_text("D.txt", "New document");
        let plan = cache.sync(vec![a.clone(), b_edited.clone(), d.clone()], false);

        let ingest: Vec<_> = plan.to_ingest.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(ingest, vec!["B.txt", "D.txt"]);
        assert_eq!(plan.unchanged, vec![a.parent_id()]);
        assert_eq!(plan.to_remove, vec![b.parent_id(), gone.parent_id()]);
        assert_eq!(plan.vanished, vec!["C.txt".to_string()]);
        assert!(!plan.is_noop());
    }

    #[tokio::test]
    async fn test_unchanged_documents_are_a_noop() {
        let a = Document::from_text("A.txt", "Portfolio risk overview");
        let cache = seeded(&[a.clone()]).await;

        let plan = cache.sync(vec![a], false);
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged.len(), 1);
    }

    #[tokio::test]
    async fn test_force_rebuild_ingests_everything() {
        let a = Document::from_text("A.txt", "Portfolio risk overview");
        let b = Document::from_text("B.txt", "Bond ladder notes");
        let cache = seeded(&[a.clone(), b.clone()]).await;

        let plan = cache.sync(vec![a, b], true);
        assert_eq!(plan.to_ingest.len(), 2);
        assert!(plan.unchanged.is_empty());
        // same content, same parent id: replaced in place rather than removed
        assert!(plan.to_remove.is_empty());
    }

    #[tokio::test]
    async fn test_retain_live_drops_dangling_entries() {
        let a = Document::from_text("A.txt", "alpha");
        let b = Document::from_text("B.txt", "beta");
        let mut cache = seeded(&[a.clone(), b.clone()]).await;

        let live = a.parent_id();
        assert_eq!(cache.retain_live(|id| *id == live), 1);
        assert!(cache.get("A.txt").is_some());
        assert!(cache.get("B.txt").is_none());

        let plan = cache.sync(vec![a, b], false);
        assert_eq!(plan.to_ingest.len(), 1);
        assert_eq!(plan.to_ingest[0].relative_path, "B.txt");
    }

    #[tokio::test]
    async fn test_commit_persists_and_reloads() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cache.json");
        let a = Document::from_text("A.txt", "alpha");
        let b = Document::from_text("B.txt", "beta");

        let mut cache = CacheManager::load(&path).await?;
        assert!(cache.is_empty());
        cache
            .commit(CacheCommit {
                upserts: vec![entry_for(&a), entry_for(&b)],
                removed_paths: Vec::new(),
            })
            .await?;
        cache
            .commit(CacheCommit {
                upserts: Vec::new(),
                removed_paths: vec!["A.txt".to_string()],
            })
            .await?;

        let pending = CacheCommit {
            upserts: vec![entry_for(&a)],
            removed_paths: vec!["B.txt".to_string()],
        };
        assert_eq!(cache.live_after(&pending), HashSet::from([a.parent_id()]));

        let reloaded = CacheManager::load(&path).await?;
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("B.txt"), cache.get("B.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_table_is_corruption() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{ not json")?;

        let err = CacheManager::load(&path).await.unwrap_err();
        assert!(matches!(err, RagError::IndexCorruption { .. }));
        Ok(())
    }
}

//! Storage layer for the two retrieval tiers.
//!
//! Parents and children live in different stores because they are accessed
//! differently:
//!
//! - **[`parent_index::ParentIndex`]**: one summary embedding per document,
//!   searched by vector similarity. Small (O(#documents)), held in memory and
//!   persisted as a single file.
//! - **[`ChildStore`]**: the raw, unembedded chunks of every document, looked
//!   up by parent for fan-out. Large (O(#chunks)), kept in SQLite.
//!
//! ```text
//! ParentRecord (summary + vector) ──child_ids──► ChildChunk ... ChildChunk
//!        ▲                                            │
//!        └──────────────── parent_id ─────────────────┘
//! ```

use crate::document::{ContentHash, ParentId};
use crate::error::Result;
use async_trait::async_trait;
use half::f16;
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

pub mod parent_index;
pub mod sqlite_store;

/// One document's summary-level entry in the parent index.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRecord {
    pub parent_id: ParentId,
    pub relative_path: String,
    pub content_hash: ContentHash,
    pub summary: String,
    /// Summary embedding, L2-normalized
    pub embedding: Vec<f16>,
    /// Child IDs in sequence order
    pub child_ids: Vec<String>,
}

/// A window of a document's raw text, stored without an embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildChunk {
    /// `<parent_id>:<sequence>`
    pub id: String,
    pub parent_id: ParentId,
    pub sequence: usize,
    pub relative_path: String,
    /// Character offsets of `text` in the parent document, `[char_start, char_end)`
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
    /// `[File: ..] [Context: ..]` line shown to the re-ranker ahead of `text`
    pub prefix: Option<String>,
}

impl ChildChunk {
    pub fn child_id(parent_id: &ParentId, sequence: usize) -> String {
        format!("{parent_id}:{sequence}")
    }

    /// The text that is scored and shown: prefix, newline, chunk text.
    pub fn contextualized_text(&self) -> String {
        finrag_context::contextualize(self.prefix.as_deref(), &self.text)
    }
}

/// Durable child chunk storage with a parent-to-children secondary index.
#[async_trait]
pub trait ChildStore: Send + Sync {
    /// Insert or overwrite a single chunk
    async fn put(&self, chunk: &ChildChunk) -> Result<()>;

    async fn get(&self, child_id: &str) -> Result<Option<ChildChunk>>;

    /// All chunks of a parent, ordered by sequence
    async fn children_of(&self, parent_id: &ParentId) -> Result<Vec<ChildChunk>>;

    /// Delete every chunk of a parent, returning how many were removed
    async fn delete_by_parent(&self, parent_id: &ParentId) -> Result<usize>;

    /// Atomically swap a parent's chunk set for `chunks`
    async fn replace_children(&self, parent_id: &ParentId, chunks: &[ChildChunk]) -> Result<()>;

    /// Distinct parent IDs referenced by stored chunks
    async fn parent_ids(&self) -> Result<HashSet<ParentId>>;

    /// Delete chunks whose parent is not in `live`, returning how many were removed
    async fn retain_parents(&self, live: &HashSet<ParentId>) -> Result<usize>;

    /// Every stored chunk, ordered by parent and sequence
    async fn all_chunks(&self) -> Result<Vec<ChildChunk>>;

    async fn count(&self) -> Result<usize>;
}

/// Write `bytes` to `path` so that readers see either the old or the new file.
///
/// The data goes to a temporary file in the same directory, is fsynced and
/// then renamed over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_child_id_and_context() {
        let parent = ParentId::from("abc123".to_string());
        let chunk = ChildChunk {
            id: ChildChunk::child_id(&parent, 4),
            parent_id: parent,
            sequence: 4,
            relative_path: "A.txt".to_string(),
            char_start: 10,
            char_end: 20,
            text: "Value at Risk".to_string(),
            prefix: Some("[File: A.txt] [Context: Risk overview]".to_string()),
        };

        assert_eq!(chunk.id, "abc123:4");
        assert_eq!(
            chunk.contextualized_text(),
            "[File: A.txt] [Context: Risk overview]\nValue at Risk"
        );
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state").join("cache.json");

        write_atomic(&path, b"first".to_vec()).await?;
        write_atomic(&path, b"second".to_vec()).await?;

        assert_eq!(std::fs::read(&path)?, b"second");
        let leftovers = std::fs::read_dir(path.parent().unwrap())?.count();
        assert_eq!(leftovers, 1, "temporary files must not be left behind");
        Ok(())
    }
}

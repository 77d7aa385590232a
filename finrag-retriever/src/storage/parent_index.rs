//! Flat vector index over parent summary embeddings.
//!
//! The index is exact: every search scores the query against every parent.
//! With one vector per document this stays cheap well past the corpus sizes a
//! single assistant indexes, and it makes replacement and removal O(1)
//! (swap-remove) with no rebuild.
//!
//! ## Metric
//!
//! Inner product over L2-normalized vectors, i.e. cosine similarity; higher
//! is more similar. Vectors are normalized on the way in, and the metric is
//! written into the file header so an index can never be reloaded under a
//! different one.
//!
//! ## File format (`parents.fpi`)
//!
//! ```text
//! offset  size  field
//! 0       4     magic "FRPI"
//! 4       2     format version (u16 LE)
//! 6       4     header length N (u32 LE)
//! 10      N     JSON header: model metadata, metric, dimension, records
//! 10+N    ...   vector slab: records × dimension f16 values, little endian
//! ```
//!
//! The whole file is rewritten through a temp-file-then-rename on every
//! commit, so a crash leaves the previous index intact.

use super::{ParentRecord, write_atomic};
use crate::document::{ContentHash, ParentId};
use crate::error::{RagError, Result};
use chrono::{DateTime, Utc};
use half::f16;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PARENT_INDEX_MAGIC: &[u8; 4] = b"FRPI";
pub const PARENT_INDEX_VERSION: u16 = 1;
const PREAMBLE_LEN: usize = 4 + 2 + 4;

/// Metadata about the embedding model the index vectors came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelMetadata {
    /// Name of the embedding model (e.g., "bge-base-en-v1.5")
    pub model_name: String,
    /// Provider of the embedding model (e.g., "fastembed")
    pub provider: String,
    /// Dimension of the embedding vectors
    pub dimension: usize,
    /// Version/revision of the model
    #[serde(default)]
    pub model_version: Option<String>,
    /// Whether embeddings are normalized
    pub normalized: bool,
}

impl EmbeddingModelMetadata {
    pub fn new(model_name: String, provider: String, dimension: usize) -> Self {
        Self {
            model_name,
            provider,
            dimension,
            model_version: None,
            normalized: true,
        }
    }

    pub fn with_version(mut self, version: String) -> Self {
        self.model_version = Some(version);
        self
    }

    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    /// Create a unique identifier for this model configuration
    pub fn model_id(&self) -> String {
        let version_part = self.model_version.as_deref().unwrap_or("latest");
        let normalized_part = if self.normalized { "norm" } else { "raw" };
        format!(
            "{}:{}:{}:{}:{}",
            self.provider, self.model_name, version_part, self.dimension, normalized_part
        )
    }
}

/// Similarity metric used by the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Dot product of L2-normalized vectors (cosine similarity)
    InnerProduct,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InnerProduct => "inner_product",
        }
    }
}

/// A parent record without its vector, as stored in the file header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ParentEntry {
    parent_id: ParentId,
    relative_path: String,
    content_hash: ContentHash,
    summary: String,
    child_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexHeader {
    model: EmbeddingModelMetadata,
    metric: SimilarityMetric,
    dimension: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    records: Vec<ParentEntry>,
}

/// Descriptive fields of a parent, without its vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentInfo {
    pub parent_id: ParentId,
    pub relative_path: String,
    pub summary: String,
    pub child_count: usize,
}

/// Size of the last persisted index, reported after every commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PersistStats {
    pub vectors: usize,
    pub bytes: usize,
}

/// In-memory parent index with optional file backing
#[derive(Debug, Clone)]
pub struct ParentIndex {
    path: Option<PathBuf>,
    model: EmbeddingModelMetadata,
    metric: SimilarityMetric,
    created_at: DateTime<Utc>,
    entries: Vec<ParentEntry>,
    /// Row-major slab, `entries.len() * dimension` values
    vectors: Vec<f16>,
    positions: HashMap<ParentId, usize>,
}

impl ParentIndex {
    /// Empty index that lives only in memory; `persist` is a no-op.
    pub fn new(model: EmbeddingModelMetadata) -> Self {
        Self {
            path: None,
            model,
            metric: SimilarityMetric::InnerProduct,
            created_at: Utc::now(),
            entries: Vec::new(),
            vectors: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Load the index at `path`, or start an empty one bound to it.
    ///
    /// Fails with [`RagError::IndexCorruption`] when the file cannot be
    /// decoded and with [`RagError::ModelMismatch`] when it was built with a
    /// different embedding model than `model`.
    pub async fn open(path: &Path, model: EmbeddingModelMetadata) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            info!(
                "No parent index at {}; starting empty ({})",
                path.display(),
                model.model_id()
            );
            let mut index = Self::new(model);
            index.path = Some(path.to_path_buf());
            return Ok(index);
        }

        let bytes = tokio::fs::read(path).await?;
        let mut index = Self::decode(&bytes, path)?;

        if !model_compatible(&index.model, &model) {
            return Err(RagError::ModelMismatch {
                stored: index.model.model_id(),
                configured: model.model_id(),
            });
        }

        info!(
            "Loaded parent index {} with {} parents ({})",
            path.display(),
            index.len(),
            index.model.model_id()
        );
        index.path = Some(path.to_path_buf());
        Ok(index)
    }

    /// Load an existing index whatever model it was built with, for inspection.
    pub async fn load_existing(path: &Path) -> Result<Option<Self>> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(None);
        }
        let bytes = tokio::fs::read(path).await?;
        let mut index = Self::decode(&bytes, path)?;
        index.path = Some(path.to_path_buf());
        Ok(Some(index))
    }

    pub fn model(&self) -> &EmbeddingModelMetadata {
        &self.model
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, parent_id: &ParentId) -> bool {
        self.positions.contains_key(parent_id)
    }

    pub fn parent_ids(&self) -> HashSet<ParentId> {
        self.positions.keys().cloned().collect()
    }

    /// Insert a parent, or replace it in place if the ID is already present.
    pub fn add(&mut self, record: ParentRecord) -> Result<()> {
        let dimension = self.dimension();
        if record.embedding.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: record.embedding.len(),
            });
        }

        let vector = normalize(&record.embedding);
        let entry = ParentEntry {
            parent_id: record.parent_id.clone(),
            relative_path: record.relative_path,
            content_hash: record.content_hash,
            summary: record.summary,
            child_ids: record.child_ids,
        };

        match self.positions.get(&record.parent_id) {
            Some(&position) => {
                let start = position * dimension;
                self.vectors[start..start + dimension].copy_from_slice(&vector);
                self.entries[position] = entry;
            }
            None => {
                self.positions
                    .insert(record.parent_id.clone(), self.entries.len());
                self.entries.push(entry);
                self.vectors.extend_from_slice(&vector);
            }
        }
        Ok(())
    }

    /// Remove a parent. Returns whether it was present.
    pub fn remove(&mut self, parent_id: &ParentId) -> bool {
        let Some(position) = self.positions.remove(parent_id) else {
            return false;
        };
        let dimension = self.dimension();
        let last = self.entries.len() - 1;

        self.entries.swap_remove(position);
        if position != last {
            let (head, tail) = self.vectors.split_at_mut(last * dimension);
            head[position * dimension..(position + 1) * dimension]
                .copy_from_slice(&tail[..dimension]);
            let moved = self.entries[position].parent_id.clone();
            self.positions.insert(moved, position);
        }
        self.vectors.truncate(last * dimension);
        true
    }

    /// Full record, including the stored (normalized) vector.
    pub fn get(&self, parent_id: &ParentId) -> Option<ParentRecord> {
        let position = *self.positions.get(parent_id)?;
        let entry = &self.entries[position];
        Some(ParentRecord {
            parent_id: entry.parent_id.clone(),
            relative_path: entry.relative_path.clone(),
            content_hash: entry.content_hash,
            summary: entry.summary.clone(),
            embedding: self.vector_at(position).to_vec(),
            child_ids: entry.child_ids.clone(),
        })
    }

    pub fn info(&self, parent_id: &ParentId) -> Option<ParentInfo> {
        let entry = &self.entries[*self.positions.get(parent_id)?];
        Some(ParentInfo {
            parent_id: entry.parent_id.clone(),
            relative_path: entry.relative_path.clone(),
            summary: entry.summary.clone(),
            child_count: entry.child_ids.len(),
        })
    }

    fn vector_at(&self, position: usize) -> &[f16] {
        let dimension = self.dimension();
        &self.vectors[position * dimension..(position + 1) * dimension]
    }

    /// The `k` most similar parents, best first.
    ///
    /// Ties are broken by parent ID so results do not depend on insertion
    /// history.
    pub fn search(&self, query: &[f16], k: usize) -> Result<Vec<(ParentId, f32)>> {
        if query.len() != self.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let query: Vec<f32> = normalize(query).iter().map(|v| v.to_f32()).collect();
        let mut scored: Vec<(usize, f32)> = (0..self.entries.len())
            .map(|position| {
                let score = self
                    .vector_at(position)
                    .iter()
                    .zip(&query)
                    .map(|(a, b)| a.to_f32() * b)
                    .sum::<f32>();
                (position, score)
            })
            .collect();

        scored.sort_by(|(pa, a), (pb, b)| {
            descending(*a, *b).then_with(|| {
                self.entries[*pa]
                    .parent_id
                    .cmp(&self.entries[*pb].parent_id)
            })
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| (self.entries[position].parent_id.clone(), score))
            .collect())
    }

    /// Rewrite the backing file atomically. No-op for in-memory indexes.
    pub async fn persist(&self) -> Result<PersistStats> {
        let Some(path) = &self.path else {
            return Ok(PersistStats {
                vectors: self.len(),
                bytes: 0,
            });
        };

        let bytes = self.encode()?;
        let stats = PersistStats {
            vectors: self.len(),
            bytes: bytes.len(),
        };
        write_atomic(path, bytes).await?;
        debug!(
            "Persisted parent index {} ({} vectors, {} bytes)",
            path.display(),
            stats.vectors,
            stats.bytes
        );
        Ok(stats)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let header = IndexHeader {
            model: self.model.clone(),
            metric: self.metric,
            dimension: self.dimension(),
            created_at: self.created_at,
            updated_at: Utc::now(),
            records: self.entries.clone(),
        };
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| RagError::config(format!("cannot encode parent index header: {e}")))?;
        let header_len = u32::try_from(header_json.len())
            .map_err(|_| RagError::config("parent index header exceeds 4 GiB"))?;

        let mut bytes =
            Vec::with_capacity(PREAMBLE_LEN + header_json.len() + self.vectors.len() * 2);
        bytes.extend_from_slice(PARENT_INDEX_MAGIC);
        bytes.extend_from_slice(&PARENT_INDEX_VERSION.to_le_bytes());
        bytes.extend_from_slice(&header_len.to_le_bytes());
        bytes.extend_from_slice(&header_json);
        for value in &self.vectors {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Ok(bytes)
    }

    fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        let corrupt = |reason: String| RagError::corruption(path, reason);

        if bytes.len() < PREAMBLE_LEN {
            return Err(corrupt(format!("file is truncated ({} bytes)", bytes.len())));
        }
        if &bytes[0..4] != PARENT_INDEX_MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != PARENT_INDEX_VERSION {
            return Err(corrupt(format!("unsupported format version {version}")));
        }
        let header_len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let slab_start = PREAMBLE_LEN
            .checked_add(header_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| corrupt("header length exceeds file size".to_string()))?;

        let header: IndexHeader = serde_json::from_slice(&bytes[PREAMBLE_LEN..slab_start])
            .map_err(|e| corrupt(format!("unreadable header: {e}")))?;
        if header.dimension != header.model.dimension || header.dimension == 0 {
            return Err(corrupt(format!(
                "header dimension {} disagrees with model dimension {}",
                header.dimension, header.model.dimension
            )));
        }

        let slab = &bytes[slab_start..];
        let expected = header
            .records
            .len()
            .checked_mul(header.dimension)
            .and_then(|n| n.checked_mul(2))
            .ok_or_else(|| {
                corrupt(format!(
                    "{} records of dimension {} overflow the slab size",
                    header.records.len(),
                    header.dimension
                ))
            })?;
        if slab.len() != expected {
            return Err(corrupt(format!(
                "vector slab is {} bytes, expected {} for {} records",
                slab.len(),
                expected,
                header.records.len()
            )));
        }
        let vectors: Vec<f16> = slab
            .chunks_exact(2)
            .map(|pair| f16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let mut positions = HashMap::with_capacity(header.records.len());
        for (position, entry) in header.records.iter().enumerate() {
            if positions.insert(entry.parent_id.clone(), position).is_some() {
                return Err(corrupt(format!("duplicate parent {}", entry.parent_id)));
            }
        }

        Ok(Self {
            path: None,
            model: header.model,
            metric: header.metric,
            created_at: header.created_at,
            entries: header.records,
            vectors,
            positions,
        })
    }
}

fn model_compatible(stored: &EmbeddingModelMetadata, configured: &EmbeddingModelMetadata) -> bool {
    stored.model_name == configured.model_name
        && stored.provider == configured.provider
        && stored.dimension == configured.dimension
        && stored.normalized == configured.normalized
}

/// Descending order with NaN last
pub(crate) fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

fn normalize(vector: &[f16]) -> Vec<f16> {
    let norm = vector
        .iter()
        .map(|v| v.to_f32() * v.to_f32())
        .sum::<f32>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return vector.to_vec();
    }
    vector
        .iter()
        .map(|v| f16::from_f32(v.to_f32() / norm))
        .collect()
}

use crate::document::ParentId;
use crate::error::{RagError, Result};
use crate::storage::ChildChunk;
use finrag_context::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_TEXT_DELIMITERS, TextSplitter,
    build_context_prefix,
};
use serde::{Deserialize, Serialize};

/// Configuration for chunking documents into child windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum size of each chunk in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,
    /// Length of the summary excerpt in each chunk's context prefix
    pub summary_excerpt_chars: usize,
    /// Summaries longer than this are cut before embedding
    pub max_summary_chars: usize,
    /// Split delimiters as regex patterns, most significant first
    pub delimiters: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            summary_excerpt_chars: 200,
            max_summary_chars: 1000,
            delimiters: DEFAULT_TEXT_DELIMITERS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

impl ChunkingConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }
}

/// Turns a document's text and summary into prefixed child chunks
#[derive(Debug, Clone)]
pub struct ChunkingStrategy {
    config: ChunkingConfig,
    splitter: TextSplitter,
}

impl ChunkingStrategy {
    /// Fails with [`RagError::Config`] on an unusable geometry or delimiter.
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        let patterns: Vec<&str> = config.delimiters.iter().map(String::as_str).collect();
        let splitter = TextSplitter::new(&patterns, config.chunk_size, config.chunk_overlap)
            .map_err(|e| RagError::config(format!("invalid chunking settings: {e}")))?;
        Ok(Self { config, splitter })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split `text` and attach the `[File: ..] [Context: ..]` prefix to every window.
    pub fn chunk_document(
        &self,
        parent_id: &ParentId,
        relative_path: &str,
        file_name: &str,
        text: &str,
        summary: &str,
    ) -> Vec<ChildChunk> {
        let prefix = build_context_prefix(file_name, summary, self.config.summary_excerpt_chars);

        let chunks: Vec<ChildChunk> = self
            .splitter
            .split(text)
            .into_iter()
            .map(|window| ChildChunk {
                id: ChildChunk::child_id(parent_id, window.sequence),
                parent_id: parent_id.clone(),
                sequence: window.sequence,
                relative_path: relative_path.to_string(),
                char_start: window.char_start,
                char_end: window.char_end,
                text: window.text,
                prefix: prefix.clone(),
            })
            .collect();

        tracing::debug!(
            "Chunked {} into {} chunks (size {}, overlap {})",
            relative_path,
            chunks.len(),
            self.config.chunk_size,
            self.config.chunk_overlap
        );
        chunks
    }
}

//! Workspace configuration, read from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! configuration for `./data_investment`:
//!
//! ```toml
//! data_dir = "./data_investment"
//! extensions = ["txt", "md"]
//!
//! [summarizer]
//! endpoint = "http://127.0.0.1:8080/v1/chat/completions"
//! api_key_env = "FINRAG_LLM_KEY"
//!
//! [retrieval]
//! top_parents = 3
//! top_chunks = 3
//! min_parent_similarity = 0.35
//! hybrid = true
//! ```

use crate::error::{RagError, Result};
use crate::retrieval::call_policy::CallPolicy;
use crate::retrieval::chunking_strategy::ChunkingConfig;
use crate::retrieval::retriever::RetrievalConfig;
use finrag_models::{EmbedConfig, RerankConfig, SummarizerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR: &str = "./data_investment";
pub const STATE_DIR_NAME: &str = ".finrag";
pub const CACHE_FILE_NAME: &str = "cache.json";
pub const PARENT_INDEX_FILE_NAME: &str = "parents.fpi";
pub const CHILD_STORE_FILE_NAME: &str = "children.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Directory holding the source documents
    pub data_dir: PathBuf,
    /// Where index state lives; `<data_dir>/.finrag` when unset
    pub state_dir: Option<PathBuf>,
    /// File extensions to index, without the dot
    pub extensions: Vec<String>,
    /// Descend into subdirectories of `data_dir`
    pub recursive: bool,
    /// Documents ingested concurrently
    pub max_workers: usize,
    pub embedding: EmbedConfig,
    pub reranker: RerankConfig,
    pub summarizer: SummarizerConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    /// Timeout and retry policy for every model call
    pub calls: CallPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            state_dir: None,
            extensions: vec!["txt".to_string()],
            recursive: false,
            max_workers: 4,
            embedding: EmbedConfig::default(),
            reranker: RerankConfig::default(),
            summarizer: SummarizerConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            calls: CallPolicy::default(),
        }
    }
}

impl RagConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            RagError::config(format!("cannot parse config file {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::config("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::config(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size",
            ));
        }
        if self.chunking.max_summary_chars == 0 {
            return Err(RagError::config("chunking.max_summary_chars must be > 0"));
        }
        if self.extensions.is_empty() {
            return Err(RagError::config("extensions must not be empty"));
        }
        if self.max_workers == 0 {
            return Err(RagError::config("max_workers must be >= 1"));
        }
        if self.calls.max_attempts == 0 {
            return Err(RagError::config("calls.max_attempts must be >= 1"));
        }
        if self.retrieval.rerank_max_input_chars == 0 || self.retrieval.rerank_batch_size == 0 {
            return Err(RagError::config(
                "retrieval.rerank_max_input_chars and retrieval.rerank_batch_size must be > 0",
            ));
        }
        if let Some(floor) = self.retrieval.min_parent_similarity {
            if !(-1.0..=1.0).contains(&floor) {
                return Err(RagError::config(
                    "retrieval.min_parent_similarity must be in [-1.0, 1.0]",
                ));
            }
        }
        if self.summarizer.endpoint.trim().is_empty() {
            return Err(RagError::config("summarizer.endpoint must not be empty"));
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(STATE_DIR_NAME))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.state_dir().join(CACHE_FILE_NAME)
    }

    pub fn parent_index_path(&self) -> PathBuf {
        self.state_dir().join(PARENT_INDEX_FILE_NAME)
    }

    pub fn child_store_path(&self) -> PathBuf {
        self.state_dir().join(CHILD_STORE_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data_investment"));
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.retrieval.top_parents, 3);
        assert_eq!(config.retrieval.min_parent_similarity, None);
        assert_eq!(config.embedding.model_name, "bge-base-en-v1.5");
        assert_eq!(config.reranker.model_name, "bge-reranker-base");
        assert_eq!(
            config.parent_index_path(),
            PathBuf::from("./data_investment/.finrag/parents.fpi")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_toml() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("finrag.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/reports"
state_dir = "/var/lib/finrag"
extensions = ["txt", "md"]

[chunking]
chunk_size = 800
chunk_overlap = 100

[retrieval]
min_parent_similarity = 0.4
hybrid = true

[calls]
timeout_ms = 5000
"#,
        )?;

        let config = RagConfig::load(&path)?;
        assert_eq!(config.data_dir, PathBuf::from("/srv/reports"));
        assert_eq!(config.cache_path(), PathBuf::from("/var/lib/finrag/cache.json"));
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.summary_excerpt_chars, 200);
        assert_eq!(config.retrieval.min_parent_similarity, Some(0.4));
        assert!(config.retrieval.hybrid);
        assert_eq!(config.retrieval.top_chunks, 3);
        assert_eq!(config.calls.timeout_ms, 5000);
        assert_eq!(config.calls.max_attempts, 3);
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("finrag.toml");

        for body in [
            "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
            "max_workers = 0\n",
            "[retrieval]\nmin_parent_similarity = 2.0\n",
            "extensions = []\n",
            "data_dir = [1, 2]\n",
        ] {
            std::fs::write(&path, body)?;
            let err = RagConfig::load(&path).unwrap_err();
            assert!(matches!(err, RagError::Config { .. }), "{body}: {err}");
        }
        Ok(())
    }
}

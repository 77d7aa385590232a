//! Configuration for the embedding, rerank and summarization collaborators

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory FastEmbed downloads ONNX weights into unless told otherwise.
pub const DEFAULT_MODEL_CACHE_DIR: &str = ".fastembed_cache";

/// Configuration for the summary embedding model
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(default)]
pub struct EmbedConfig {
    /// Name of the embedding model, e.g. `bge-base-en-v1.5`
    #[builder(default = r#""bge-base-en-v1.5".to_string()"#)]
    pub model_name: String,
    /// Directory where model weights are cached
    #[builder(default = "PathBuf::from(DEFAULT_MODEL_CACHE_DIR)")]
    pub cache_dir: PathBuf,
    /// Maximum batch size for embedding generation
    #[builder(default = "32")]
    pub batch_size: usize,
    /// Whether to L2-normalize embeddings
    #[builder(default = "true")]
    pub normalize: bool,
    /// Print download progress while fetching weights
    #[builder(default = "false")]
    pub show_download_progress: bool,
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Default model with weights cached under `cache_dir`
    pub fn default_with_path<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        EmbedConfigBuilder::default()
            .build()
            .expect("Failed to build default EmbedConfig")
    }
}

/// Configuration for the cross-encoder used to re-rank child chunks
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(default)]
pub struct RerankConfig {
    /// Name of the cross-encoder, e.g. `bge-reranker-base`
    #[builder(default = r#""bge-reranker-base".to_string()"#)]
    pub model_name: String,
    /// Directory where model weights are cached
    #[builder(default = "PathBuf::from(DEFAULT_MODEL_CACHE_DIR)")]
    pub cache_dir: PathBuf,
    /// Pairs scored per ONNX session run
    #[builder(default = "32")]
    pub batch_size: usize,
    #[builder(default = "false")]
    pub show_download_progress: bool,
}

impl RerankConfig {
    pub fn builder() -> RerankConfigBuilder {
        RerankConfigBuilder::default()
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        RerankConfigBuilder::default()
            .build()
            .expect("Failed to build default RerankConfig")
    }
}

/// Configuration for the chat-completions endpoint that writes document summaries.
///
/// Any OpenAI-compatible server works; the default points at a local
/// llama.cpp server.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(default)]
pub struct SummarizerConfig {
    /// Full URL of the chat completions route
    #[builder(default = r#""http://127.0.0.1:8080/v1/chat/completions".to_string()"#)]
    pub endpoint: String,
    /// Model identifier sent with every request
    #[builder(default = r#""qwen3-4b".to_string()"#)]
    pub model: String,
    /// Completion token limit for one summary
    #[builder(default = "256")]
    pub max_tokens: u32,
    #[builder(default = "0.1")]
    pub temperature: f32,
    /// Name of the environment variable holding a bearer token, if any
    #[builder(default)]
    pub api_key_env: Option<String>,
    /// Per-request HTTP timeout in seconds
    #[builder(default = "120")]
    pub request_timeout_secs: u64,
}

impl SummarizerConfig {
    pub fn builder() -> SummarizerConfigBuilder {
        SummarizerConfigBuilder::default()
    }

    /// Resolve the API key from the configured environment variable.
    ///
    /// Unset or empty variables yield `None`.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        SummarizerConfigBuilder::default()
            .build()
            .expect("Failed to build default SummarizerConfig")
    }
}

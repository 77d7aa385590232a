//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{ModelError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, OnceLock};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result. The dimension is taken from the first
    /// vector, or 0 when there are none.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Name of the model behind this provider, recorded in index metadata
    fn model_name(&self) -> &str;
}

/// Map a configured model name onto a built-in FastEmbed model.
///
/// Accepts both the bare name (`bge-base-en-v1.5`) and the Hugging Face
/// repository form (`BAAI/bge-base-en-v1.5`), case-insensitively.
pub fn resolve_embedding_model(name: &str) -> Result<EmbeddingModel> {
    let normalized = name.trim().to_ascii_lowercase();
    let bare = normalized
        .rsplit_once('/')
        .map(|(_, model)| model)
        .unwrap_or(&normalized);

    match bare {
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        _ => Err(ModelError::UnknownModel {
            kind: "embedding",
            name: name.to_string(),
        }),
    }
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider. Call [`initialize`](Self::initialize)
    /// or use [`create`](Self::create) before embedding.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            // bge-base-en-v1.5; replaced by the probed dimension on initialize
            dimension: 768,
        }
    }

    /// Loads the embedding model, reusing a process-wide cached instance when
    /// the same configuration was loaded before.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );

        let cache_key = self.create_cache_key()?;

        let cached_data = {
            let cache = get_model_cache()
                .lock()
                .map_err(|_| ModelError::LockPoisoned)?;
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((cached_model, cached_dimension)) = cached_data {
            tracing::info!("Using cached model for: {}", self.config.model_name());
            self.model = Some(cached_model);
            self.dimension = cached_dimension;
            return self.validate_model().await;
        }

        let model_kind = resolve_embedding_model(self.config.model_name())?;
        let config = self.config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model_name());

                let init_options = InitOptions::new(model_kind)
                    .with_cache_dir(config.cache_dir.clone())
                    .with_show_download_progress(config.show_download_progress);

                let mut model =
                    TextEmbedding::try_new(init_options).map_err(ModelError::model_init)?;

                // Probe the dimension with a throwaway embedding
                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(ModelError::model_init)?;
                let dimension = probe
                    .first()
                    .map(|emb| emb.len())
                    .filter(|len| *len > 0)
                    .ok_or(ModelError::EmptyOutput {
                        what: "probe embedding",
                    })?;

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        let model_arc = Arc::new(Mutex::new(model));
        {
            let mut cache = get_model_cache()
                .lock()
                .map_err(|_| ModelError::LockPoisoned)?;
            cache.insert(cache_key, (Arc::clone(&model_arc), dimension));
        }

        self.model = Some(model_arc);
        self.dimension = dimension;

        self.validate_model().await
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Cache key derived from the whole configuration
    fn create_cache_key(&self) -> Result<String> {
        let config_json = serde_json::to_string(&self.config)?;

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    /// Check that the loaded model produces finite vectors of the expected size
    async fn validate_model(&self) -> Result<()> {
        let embedding = self.embed_text("validation test").await?;

        if embedding.len() != self.dimension {
            return Err(ModelError::invalid_config(format!(
                "Model validation failed: expected dimension {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(ModelError::invalid_config(
                "Model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model_name());
        Ok(())
    }

    fn convert_to_f16(&self, embeddings: Vec<Vec<f32>>) -> Vec<Vec<f16>> {
        embeddings
            .into_iter()
            .map(|embedding| to_f16(embedding, self.config.normalize))
            .collect()
    }
}

/// Convert an f32 vector to f16, optionally L2-normalizing it first.
pub fn to_f16(embedding: Vec<f32>, normalize: bool) -> Vec<f16> {
    let norm = if normalize {
        embedding.iter().map(|x| x * x).sum::<f32>().sqrt()
    } else {
        1.0
    };
    let scale = if norm > 0.0 { norm } else { 1.0 };

    embedding
        .into_iter()
        .map(|value| f16::from_f32(value / scale))
        .collect()
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or(ModelError::EmptyOutput { what: "embedding" })
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            ModelError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let batch_size = self.config.batch_size.max(1);
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(batch_size) {
            let chunk = chunk.to_vec();
            let model_clone = Arc::clone(model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", chunk.len());

                let mut model_guard = model_clone.lock().map_err(|_| ModelError::LockPoisoned)?;
                model_guard
                    .embed(chunk, None)
                    .map_err(ModelError::embedding_gen)
            })
            .await??;

            all_embeddings.extend(self.convert_to_f16(batch_embeddings));
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_name(&self) -> &str {
        self.config.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_result() {
        let embeddings = vec![
            vec![f16::from_f32(0.1), f16::from_f32(0.2), f16::from_f32(0.3)],
            vec![f16::from_f32(0.4), f16::from_f32(0.5), f16::from_f32(0.6)],
        ];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_fastembed_provider_creation() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());

        assert_eq!(provider.provider_name(), "fastembed");
        assert_eq!(provider.model_name(), "bge-base-en-v1.5");
        assert_eq!(provider.embedding_dimension(), 768);
    }

    #[test]
    fn test_resolve_embedding_model_names() {
        assert!(matches!(
            resolve_embedding_model("BAAI/bge-base-en-v1.5"),
            Ok(EmbeddingModel::BGEBaseENV15)
        ));
        assert!(matches!(
            resolve_embedding_model("all-MiniLM-L6-v2"),
            Ok(EmbeddingModel::AllMiniLML6V2)
        ));
        assert!(matches!(
            resolve_embedding_model("modernbert"),
            Err(ModelError::UnknownModel { .. })
        ));
    }

    #[test]
    fn test_to_f16_normalizes() {
        let vector = to_f16(vec![3.0, 4.0], true);
        assert!((vector[0].to_f32() - 0.6).abs() < 1e-3);
        assert!((vector[1].to_f32() - 0.8).abs() < 1e-3);

        let zero = to_f16(vec![0.0, 0.0], true);
        assert!(zero.iter().all(|v| v.to_f32() == 0.0));

        let raw = to_f16(vec![3.0, 4.0], false);
        assert!((raw[1].to_f32() - 4.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_embed_before_initialize_fails() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());
        let err = provider.embed_text("hello").await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfig { .. }));
    }

    #[test]
    fn test_cache_key_generation() {
        let key1 = FastEmbedProvider::new(EmbedConfig::default())
            .create_cache_key()
            .unwrap();
        let key2 = FastEmbedProvider::new(EmbedConfig::default())
            .create_cache_key()
            .unwrap();
        assert_eq!(key1, key2, "Same config should produce same cache key");
        assert!(key1.starts_with("v1:"));

        let other = EmbedConfig {
            model_name: "bge-small-en-v1.5".to_string(),
            ..EmbedConfig::default()
        };
        let key3 = FastEmbedProvider::new(other).create_cache_key().unwrap();
        assert_ne!(key1, key3, "Different model should produce different key");
    }

    #[tokio::test]
    #[ignore] // Downloads the real BGE base model - run with: cargo test test_bge_embedding -- --ignored
    async fn test_bge_embedding() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let provider = FastEmbedProvider::create(EmbedConfig::default_with_path(temp_dir.path()))
            .await?;

        let texts = vec![
            "Quarterly revenue grew 12 percent.".to_string(),
            "The central bank held rates steady.".to_string(),
        ];
        let result = provider.embed_texts(&texts).await?;

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 768);
        for embedding in &result.embeddings {
            let norm: f32 = embedding.iter().map(|v| v.to_f32().powi(2)).sum();
            assert!((norm.sqrt() - 1.0).abs() < 0.01);
        }
        Ok(())
    }
}

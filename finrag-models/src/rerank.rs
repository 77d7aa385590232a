//! Cross-encoder re-ranking providers

use crate::config::RerankConfig;
use crate::error::{ModelError, Result};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::{Arc, Mutex};

/// Scores passages for relevance to a query.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Score every text against `query`.
    ///
    /// Returns exactly one score per input, in input order. Higher is more
    /// relevant; scores are only comparable within one query.
    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

/// Map a configured model name onto a built-in FastEmbed cross-encoder.
pub fn resolve_reranker_model(name: &str) -> Result<RerankerModel> {
    let normalized = name.trim().to_ascii_lowercase();
    let bare = normalized
        .rsplit_once('/')
        .map(|(_, model)| model)
        .unwrap_or(&normalized);

    match bare {
        "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
        _ => Err(ModelError::UnknownModel {
            kind: "reranker",
            name: name.to_string(),
        }),
    }
}

/// FastEmbed cross-encoder running locally through ONNX Runtime
#[derive(Clone)]
pub struct FastEmbedReranker {
    config: RerankConfig,
    model: Arc<Mutex<TextRerank>>,
}

impl std::fmt::Debug for FastEmbedReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedReranker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FastEmbedReranker {
    /// Load the configured cross-encoder, downloading weights if needed.
    pub async fn create(config: RerankConfig) -> Result<Self> {
        let model_kind = resolve_reranker_model(&config.model_name)?;
        tracing::info!("Loading reranker model: {}", config.model_name);

        let init_config = config.clone();
        let model = tokio::task::spawn_blocking(move || -> Result<TextRerank> {
            let options = RerankInitOptions::new(model_kind)
                .with_cache_dir(init_config.cache_dir.clone())
                .with_show_download_progress(init_config.show_download_progress);
            TextRerank::try_new(options).map_err(ModelError::model_init)
        })
        .await??;

        tracing::info!("Reranker model loaded: {}", config.model_name);
        Ok(Self {
            config,
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl RerankProvider for FastEmbedReranker {
    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let query = query.to_string();
        let documents = texts.to_vec();
        let batch_size = self.config.batch_size.max(1);
        let model = Arc::clone(&self.model);

        let results = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().map_err(|_| ModelError::LockPoisoned)?;
            let refs: Vec<&str> = documents.iter().map(String::as_str).collect();
            guard
                .rerank(query.as_str(), refs, false, Some(batch_size))
                .map_err(ModelError::rerank)
        })
        .await??;

        // FastEmbed returns results sorted by score; put them back in input order
        let mut scores = vec![f32::NAN; texts.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        if scores.iter().any(|score| score.is_nan()) {
            return Err(ModelError::EmptyOutput {
                what: "rerank score",
            });
        }

        tracing::debug!("Scored {} passages", scores.len());
        Ok(scores)
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reranker_model_names() {
        assert!(matches!(
            resolve_reranker_model("BAAI/bge-reranker-base"),
            Ok(RerankerModel::BGERerankerBase)
        ));
        assert!(matches!(
            resolve_reranker_model("ms-marco"),
            Err(ModelError::UnknownModel {
                kind: "reranker",
                ..
            })
        ));
    }

    #[tokio::test]
    #[ignore] // Downloads the real BGE reranker - run with: cargo test test_bge_reranker -- --ignored
    async fn test_bge_reranker() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = RerankConfig {
            cache_dir: temp_dir.path().to_path_buf(),
            ..RerankConfig::default()
        };
        let reranker = FastEmbedReranker::create(config).await?;

        let texts = vec![
            "Bananas are rich in potassium.".to_string(),
            "Apple reported record iPhone revenue this quarter.".to_string(),
        ];
        let scores = reranker
            .score_batch("How did Apple's revenue do?", &texts)
            .await?;

        assert_eq!(scores.len(), 2);
        assert!(scores[1] > scores[0]);
        Ok(())
    }
}

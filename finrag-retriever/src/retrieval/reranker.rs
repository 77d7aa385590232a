//! Cross-encoder re-ranking of fan-out candidates.

use super::call_policy::{CallError, CallPolicy};
use crate::error::{RagError, Result};
use crate::storage::ChildChunk;
use crate::storage::parent_index::descending;
use finrag_models::{ModelError, RerankProvider};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A child chunk with the score that ordered it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: ChildChunk,
    pub score: f32,
}

#[derive(Clone)]
pub struct Reranker {
    provider: Arc<dyn RerankProvider>,
    policy: CallPolicy,
    max_input_chars: usize,
    batch_size: usize,
}

impl std::fmt::Debug for Reranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reranker")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_name())
            .field("max_input_chars", &self.max_input_chars)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Reranker {
    pub fn new(provider: Arc<dyn RerankProvider>, policy: CallPolicy) -> Self {
        Self {
            provider,
            policy,
            max_input_chars: 2048,
            batch_size: 32,
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Score every candidate against `query` and order them best first.
    ///
    /// Candidates with equal scores keep their input order. An empty
    /// candidate list returns immediately without calling the model.
    ///
    /// # Errors
    ///
    /// [`RagError::RerankTimeout`] when a batch times out on every attempt,
    /// [`RagError::Rerank`] for any other model failure.
    pub async fn rerank(&self, query: &str, candidates: Vec<ChildChunk>) -> Result<Vec<ScoredChunk>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|chunk| truncate_chars(&chunk.contextualized_text(), self.max_input_chars))
            .collect();

        let mut scores = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let batch_scores = self
                .policy
                .run("re-ranking", || self.provider.score_batch(query, batch))
                .await
                .map_err(|source| {
                    if source.is_timeout() {
                        RagError::RerankTimeout {
                            attempts: source.attempts(),
                        }
                    } else {
                        RagError::Rerank { source }
                    }
                })?;

            if batch_scores.len() != batch.len() {
                return Err(RagError::Rerank {
                    source: CallError::rejected(
                        "re-ranking",
                        ModelError::rerank(anyhow::anyhow!(
                            "expected {} scores, got {}",
                            batch.len(),
                            batch_scores.len()
                        )),
                    ),
                });
            }
            scores.extend(batch_scores);
        }

        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .zip(scores)
            .map(|(chunk, score)| ScoredChunk { chunk, score })
            .collect();
        // sort_by is stable, so ties keep candidate order
        scored.sort_by(|a, b| descending(a.score, b.score));

        debug!(
            "Re-ranked {} candidates with {}",
            scored.len(),
            self.provider.model_name()
        );
        Ok(scored)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}

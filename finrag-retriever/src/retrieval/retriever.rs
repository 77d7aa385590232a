//! Query path: summary search, fan-out to children, re-rank.
//!
//! ```text
//! query ──embed──► ParentIndex::search(top_parents) ──floor──┐
//!   │                                                       ├─► parents
//!   └──(hybrid)──► KeywordIndex::search ────────────────────┘
//!                                                              │
//!                     ChildStore::children_of(parent) for each ◄┘
//!                                                              │
//!                     Reranker::rerank ──► top_chunks ◄────────┘
//! ```
//!
//! Every child of a matched parent is a candidate, not only the chunks near
//! the query: summary-level relevance says nothing about which part of the
//! document answers the question. Results therefore only ever contain chunks
//! of parents matched in the first step.

use super::call_policy::CallPolicy;
use super::reranker::{Reranker, ScoredChunk};
use super::sparse::KeywordIndex;
use crate::document::ParentId;
use crate::error::{RagError, Result};
use crate::storage::{ChildChunk, ChildStore};
use crate::storage::parent_index::ParentIndex;
use finrag_models::EmbeddingProvider;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NO_RESULTS_MESSAGE: &str = "No relevant documents found.";

/// Query-time settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_parents: usize,
    pub top_chunks: usize,
    /// Parents scoring below this cosine similarity are ignored
    pub min_parent_similarity: Option<f32>,
    /// Cap on fan-out candidates passed to the re-ranker, 0 for no cap
    pub max_candidates: usize,
    /// Characters of each candidate the re-ranker sees
    pub rerank_max_input_chars: usize,
    pub rerank_batch_size: usize,
    /// Union BM25 keyword matches with the dense parent matches
    pub hybrid: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_parents: 3,
            top_chunks: 3,
            min_parent_similarity: None,
            max_candidates: 200,
            rerank_max_input_chars: 2048,
            rerank_batch_size: 32,
            hybrid: false,
        }
    }
}

/// How the returned chunks were ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingSource {
    CrossEncoder,
    /// The re-ranker timed out; chunks follow their parents' similarity
    ParentSimilarity,
}

/// A parent selected by the first retrieval stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParentMatch {
    pub parent_id: ParentId,
    pub relative_path: String,
    pub summary: String,
    /// Cosine similarity to the query; `None` for keyword-only matches
    pub similarity: Option<f32>,
    pub via_keyword: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub parents: Vec<ParentMatch>,
    pub chunks: Vec<ScoredChunk>,
    pub ranking: RankingSource,
}

impl RetrievalResult {
    pub fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            parents: Vec::new(),
            chunks: Vec::new(),
            ranking: RankingSource::CrossEncoder,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// `[Source: <file>]` blocks separated by blank lines, as handed to the LLM.
    pub fn render_context(&self) -> String {
        if self.chunks.is_empty() {
            return NO_RESULTS_MESSAGE.to_string();
        }
        self.chunks
            .iter()
            .map(|scored| {
                format!(
                    "[Source: {}]\n{}",
                    scored.chunk.relative_path, scored.chunk.text
                )
            })
            .join("\n\n")
    }
}

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Reranker,
    policy: CallPolicy,
    config: RetrievalConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder.model_name())
            .field("reranker", &self.reranker)
            .field("config", &self.config)
            .finish()
    }
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Reranker,
        policy: CallPolicy,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            reranker,
            policy,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run a query against one consistent view of the index and store.
    ///
    /// `keywords` is consulted only when hybrid retrieval is enabled.
    pub async fn retrieve(
        &self,
        index: &ParentIndex,
        children: &dyn ChildStore,
        keywords: Option<&KeywordIndex>,
        query: &str,
        top_parents: usize,
        top_chunks: usize,
    ) -> Result<RetrievalResult> {
        if top_parents == 0 || top_chunks == 0 || index.is_empty() || query.trim().is_empty() {
            return Ok(RetrievalResult::empty(query));
        }

        let embedding = self
            .policy
            .run("query embedding", || self.embedder.embed_text(query))
            .await
            .map_err(|source| RagError::Embedding { source })?;
        if embedding.len() != index.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedding.len(),
            });
        }

        let mut parents: Vec<ParentMatch> = Vec::new();
        for (parent_id, similarity) in index.search(&embedding, top_parents)? {
            if let Some(floor) = self.config.min_parent_similarity {
                if similarity < floor {
                    debug!(
                        "Dropping parent {} below similarity floor ({:.3} < {:.3})",
                        parent_id, similarity, floor
                    );
                    continue;
                }
            }
            if let Some(info) = index.info(&parent_id) {
                parents.push(ParentMatch {
                    parent_id,
                    relative_path: info.relative_path,
                    summary: info.summary,
                    similarity: Some(similarity),
                    via_keyword: false,
                });
            }
        }

        if self.config.hybrid {
            if let Some(keywords) = keywords {
                self.add_keyword_parents(index, keywords, query, top_parents, &mut parents);
            }
        }

        if parents.is_empty() {
            info!("No parents matched query {:?}", query);
            return Ok(RetrievalResult::empty(query));
        }

        let mut candidates = Vec::new();
        for parent in &parents {
            candidates.extend(children.children_of(&parent.parent_id).await?);
        }
        if self.config.max_candidates > 0 && candidates.len() > self.config.max_candidates {
            debug!(
                "Capping {} candidates at {}",
                candidates.len(),
                self.config.max_candidates
            );
            candidates.truncate(self.config.max_candidates);
        }
        debug!(
            "Fan-out from {} parents produced {} candidates",
            parents.len(),
            candidates.len()
        );

        let (mut chunks, ranking) = match self.reranker.rerank(query, candidates.clone()).await {
            Ok(scored) => (scored, RankingSource::CrossEncoder),
            Err(RagError::RerankTimeout { attempts }) => {
                warn!(
                    "Re-ranking timed out after {} attempt(s); ordering by parent similarity",
                    attempts
                );
                (
                    parent_similarity_order(&parents, candidates),
                    RankingSource::ParentSimilarity,
                )
            }
            Err(e) => return Err(e),
        };
        chunks.truncate(top_chunks);

        Ok(RetrievalResult {
            query: query.to_string(),
            parents,
            chunks,
            ranking,
        })
    }

    fn add_keyword_parents(
        &self,
        index: &ParentIndex,
        keywords: &KeywordIndex,
        query: &str,
        top_parents: usize,
        parents: &mut Vec<ParentMatch>,
    ) {
        let mut seen: HashSet<ParentId> = parents.iter().map(|p| p.parent_id.clone()).collect();
        let mut added = 0;

        // Chunks of one document tend to cluster, so look past top_parents hits.
        for hit in keywords.search(query, top_parents.saturating_mul(4)) {
            if added == top_parents {
                break;
            }
            if seen.contains(&hit.parent_id) {
                continue;
            }
            let Some(info) = index.info(&hit.parent_id) else {
                continue;
            };
            seen.insert(hit.parent_id.clone());
            parents.push(ParentMatch {
                parent_id: hit.parent_id,
                relative_path: info.relative_path,
                summary: info.summary,
                similarity: None,
                via_keyword: true,
            });
            added += 1;
        }

        if added > 0 {
            debug!("Keyword search added {} parents", added);
        }
    }
}

/// Candidates in parent rank order, each scored with its parent's similarity.
fn parent_similarity_order(
    parents: &[ParentMatch],
    candidates: Vec<ChildChunk>,
) -> Vec<ScoredChunk> {
    let mut scored: Vec<(usize, ScoredChunk)> = candidates
        .into_iter()
        .map(|chunk| {
            let rank = parents
                .iter()
                .position(|p| p.parent_id == chunk.parent_id)
                .unwrap_or(parents.len());
            let score = parents
                .get(rank)
                .and_then(|p| p.similarity)
                .unwrap_or(0.0);
            (rank, ScoredChunk { chunk, score })
        })
        .collect();
    scored.sort_by_key(|(rank, _)| *rank);
    scored.into_iter().map(|(_, chunk)| chunk).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(path: &str, text: &str, prefix: Option<&str>) -> ScoredChunk {
        let parent = ParentId::from("p".to_string());
        ScoredChunk {
            chunk: ChildChunk {
                id: ChildChunk::child_id(&parent, 0),
                parent_id: parent,
                sequence: 0,
                relative_path: path.to_string(),
                char_start: 0,
                char_end: text.chars().count(),
                text: text.to_string(),
                prefix: prefix.map(str::to_string),
            },
            score: 1.0,
        }
    }

    #[test]
    fn test_render_context() {
        let mut result = RetrievalResult::empty("What is VaR?");
        assert_eq!(result.render_context(), NO_RESULTS_MESSAGE);

        result.chunks = vec![
            scored("A.txt", "VaR is a loss threshold.", Some("[File: A.txt] [Context: Risk]")),
            scored("B.txt", "Duration measures rate risk.", None),
        ];
        assert_eq!(
            result.render_context(),
            "[Source: A.txt]\nVaR is a loss threshold.\n\n\
             [Source: B.txt]\nDuration measures rate risk."
        );
    }

    #[test]
    fn test_parent_similarity_order_is_stable() {
        let matches: Vec<ParentMatch> = ["x", "y"]
            .iter()
            .enumerate()
            .map(|(i, id)| ParentMatch {
                parent_id: ParentId::from(id.to_string()),
                relative_path: format!("{id}.txt"),
                summary: String::new(),
                similarity: Some(0.9 - i as f32 * 0.1),
                via_keyword: false,
            })
            .collect();
        let chunk = |parent: &str, seq: usize| {
            let parent_id = ParentId::from(parent.to_string());
            ChildChunk {
                id: ChildChunk::child_id(&parent_id, seq),
                parent_id,
                sequence: seq,
                relative_path: format!("{parent}.txt"),
                char_start: 0,
                char_end: 1,
                text: "t".to_string(),
                prefix: None,
            }
        };

        let ordered = parent_similarity_order(
            &matches,
            vec![chunk("y", 0), chunk("x", 0), chunk("y", 1), chunk("x", 1)],
        );
        let ids: Vec<&str> = ordered.iter().map(|s| s.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["x:0", "x:1", "y:0", "y:1"]);
        assert!((ordered[0].score - 0.9).abs() < 1e-6);
    }
}

//! In-memory BM25 keyword index over child chunk text.
//!
//! Used by hybrid retrieval to pull in documents whose summaries miss a
//! query's exact terms (tickers, figures, names). Rebuilt from the child
//! store rather than persisted.

use crate::document::ParentId;
use crate::storage::ChildChunk;
use crate::storage::parent_index::descending;
use std::collections::HashMap;

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// One keyword hit
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub child_id: String,
    pub parent_id: ParentId,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    child_id: String,
    parent_id: ParentId,
    length: usize,
}

#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    chunks: Vec<IndexedChunk>,
    /// term -> (chunk position, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    avg_length: f32,
}

/// Lowercased alphanumeric runs
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl KeywordIndex {
    /// Index the contextualized text of every chunk.
    pub fn build(chunks: &[ChildChunk]) -> Self {
        let mut index = Self::default();
        let mut total_length = 0usize;

        for (position, chunk) in chunks.iter().enumerate() {
            let tokens = tokenize(&chunk.contextualized_text());
            total_length += tokens.len();

            let mut frequencies: HashMap<String, u32> = HashMap::new();
            for token in tokens.iter() {
                *frequencies.entry(token.clone()).or_default() += 1;
            }
            for (term, tf) in frequencies {
                index.postings.entry(term).or_default().push((position, tf));
            }

            index.chunks.push(IndexedChunk {
                child_id: chunk.id.clone(),
                parent_id: chunk.parent_id.clone(),
                length: tokens.len(),
            });
        }

        if !index.chunks.is_empty() {
            index.avg_length = total_length as f32 / index.chunks.len() as f32;
        }
        index
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The `k` best-scoring chunks with a positive score, best first.
    pub fn search(&self, query: &str, k: usize) -> Vec<KeywordHit> {
        if k == 0 || self.chunks.is_empty() {
            return Vec::new();
        }

        let n = self.chunks.len() as f32;
        let mut scores: HashMap<usize, f32> = HashMap::new();
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for &(position, tf) in postings {
                let tf = tf as f32;
                let length = self.chunks[position].length as f32;
                let norm = if self.avg_length > 0.0 {
                    length / self.avg_length
                } else {
                    1.0
                };
                let score = idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * norm));
                *scores.entry(position).or_default() += score;
            }
        }

        let mut ranked: Vec<(usize, f32)> =
            scores.into_iter().filter(|(_, score)| *score > 0.0).collect();
        ranked.sort_by(|(pa, a), (pb, b)| descending(*a, *b).then(pa.cmp(pb)));
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(position, score)| {
                let chunk = &self.chunks[position];
                KeywordHit {
                    child_id: chunk.child_id.clone(),
                    parent_id: chunk.parent_id.clone(),
                    score,
                }
            })
            .collect()
    }
}

//! Deterministic stand-ins for the model collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use finrag_models::{
    EmbeddingProvider, EmbeddingResult, ModelError, RerankProvider, Result as ModelResult,
    Summarizer,
};
use finrag_retriever::retrieval::call_policy::CallPolicy;
use finrag_retriever::{Collaborators, IndexingEngine, RagConfig};
use half::f16;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const DIMENSION: usize = 1024;

/// Lowercased alphanumeric tokens of three or more characters
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Bag-of-words embedding over a growing vocabulary: texts sharing words are
/// similar and texts with no word in common are orthogonal.
pub struct VocabularyEmbedder {
    pub dimension: usize,
    pub model: String,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    vocabulary: Mutex<HashMap<String, usize>>,
}

impl VocabularyEmbedder {
    pub fn new() -> Self {
        Self::with_model("bag-of-words", DIMENSION)
    }

    pub fn with_model(model: &str, dimension: usize) -> Self {
        Self {
            dimension,
            model: model.to_string(),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            vocabulary: Mutex::new(HashMap::new()),
        }
    }

    fn vector(&self, text: &str) -> Vec<f16> {
        let mut vector = vec![0f32; self.dimension];
        let mut vocabulary = self.vocabulary.lock().unwrap();
        for token in tokens(text) {
            let next = vocabulary.len();
            let slot = *vocabulary.entry(token).or_insert(next) % self.dimension;
            vector[slot] += 1.0;
        }
        vector.into_iter().map(f16::from_f32).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for VocabularyEmbedder {
    async fn embed_text(&self, text: &str) -> ModelResult<Vec<f16>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModelError::invalid_config("embedding model unavailable"));
        }
        Ok(self.vector(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> ModelResult<EmbeddingResult> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Returns the first words of the document and records every call.
pub struct ExtractiveSummarizer {
    pub words: usize,
    pub seen: Mutex<Vec<String>>,
    /// Documents containing this marker fail to summarize
    pub fail_marker: Mutex<Option<String>>,
}

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self {
            words: 30,
            seen: Mutex::new(Vec::new()),
            fail_marker: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn calls_containing(&self, needle: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|text| text.contains(needle))
            .count()
    }

    pub fn fail_on(&self, marker: Option<&str>) {
        *self.fail_marker.lock().unwrap() = marker.map(str::to_string);
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, text: &str) -> ModelResult<String> {
        self.seen.lock().unwrap().push(text.to_string());
        let marker = self.fail_marker.lock().unwrap().clone();
        if marker.is_some_and(|m| text.contains(&m)) {
            return Err(ModelError::EmptyOutput { what: "summary" });
        }
        Ok(text
            .split_whitespace()
            .take(self.words)
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn summarizer_name(&self) -> &str {
        "extractive"
    }
}

/// Scores a passage by how many query tokens it contains.
pub struct OverlapReranker {
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl OverlapReranker {
    pub fn new() -> Self {
        Self {
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn stalled() -> Self {
        Self {
            delay: Some(Duration::from_secs(10)),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RerankProvider for OverlapReranker {
    async fn score_batch(&self, query: &str, texts: &[String]) -> ModelResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let query_tokens = tokens(query);
        Ok(texts
            .iter()
            .map(|text| {
                let passage = tokens(text);
                query_tokens.iter().filter(|t| passage.contains(t)).count() as f32
            })
            .collect())
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    fn model_name(&self) -> &str {
        "overlap"
    }
}

/// A data directory plus handles on the fakes wired into its engine
pub struct Fixture {
    pub dir: TempDir,
    pub config: RagConfig,
    pub summarizer: Arc<ExtractiveSummarizer>,
    pub embedder: Arc<VocabularyEmbedder>,
    pub reranker: Arc<OverlapReranker>,
}

impl Fixture {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let data_dir = dir.path().join("data_investment");
        std::fs::create_dir_all(&data_dir)?;

        let mut config = RagConfig::for_data_dir(&data_dir);
        config.chunking.chunk_size = 120;
        config.chunking.chunk_overlap = 20;
        config.calls =
            CallPolicy::new(Duration::from_millis(200), 2).with_backoff(Duration::from_millis(1));

        Ok(Self {
            dir,
            config,
            summarizer: Arc::new(ExtractiveSummarizer::new()),
            embedder: Arc::new(VocabularyEmbedder::new()),
            reranker: Arc::new(OverlapReranker::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn write(&self, name: &str, text: &str) -> anyhow::Result<PathBuf> {
        let path = self.data_dir().join(name);
        std::fs::write(&path, text)?;
        Ok(path)
    }

    pub fn remove(&self, name: &str) -> anyhow::Result<()> {
        std::fs::remove_file(self.data_dir().join(name))?;
        Ok(())
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            summarizer: self.summarizer.clone(),
            embedder: self.embedder.clone(),
            reranker: self.reranker.clone(),
        }
    }

    pub async fn engine(&self) -> finrag_retriever::Result<IndexingEngine> {
        IndexingEngine::open(self.config.clone(), self.collaborators()).await
    }
}

pub const PORTFOLIO_RISK: &str = "Portfolio risk overview for the equity book. VaR, or Value at Risk, \
estimates the loss threshold that daily losses should not exceed at a 99 percent confidence level. \
\n\nThe desk computes VaR with historical simulation over a 250 day window. Breaches are reported \
to the risk committee and trigger a review of position limits.\n\nStress tests complement VaR by \
replaying the 2008 credit crisis and the 2020 liquidity shock against current holdings.";

pub const BOND_LADDER: &str = "Bond ladder notes for the fixed income sleeve. Treasuries mature \
every six months so that proceeds can be reinvested at prevailing yields.\n\nDuration is kept \
below four years. Coupon income funds quarterly distributions to clients.";

pub const SEMICONDUCTORS: &str = "Sector commentary on semiconductors and the supply chain for \
advanced packaging, foundry capacity, memory pricing and lithography equipment lead times across \
Taiwan, Korea and the Netherlands over the coming fiscal year and beyond.\n\nPosition update: \
NVDA remains the largest holding after strong data center revenue growth this quarter.";

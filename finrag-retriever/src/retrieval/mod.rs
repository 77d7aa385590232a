pub mod cache_manager;
pub mod call_policy;
pub mod chunking_strategy;
pub mod indexing_engine;
pub mod ingest;
pub mod reranker;
pub mod retriever;
pub mod sparse;

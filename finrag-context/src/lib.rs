pub mod text;

// Re-export the main chunking types for external use
pub use text::{
    ChunkWindow, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_TEXT_DELIMITERS,
    SplitterError, TextSplitter, build_context_prefix, contextualize, summary_excerpt,
};

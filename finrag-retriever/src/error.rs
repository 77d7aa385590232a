//! Error taxonomy for indexing and retrieval

use crate::retrieval::call_policy::CallError;
use std::path::PathBuf;

/// Result type for indexing and retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Everything that can go wrong between reading a document and returning chunks.
///
/// The variants fall into three propagation classes:
///
/// - **Per document** ([`EmptyDocument`](Self::EmptyDocument),
///   [`Summarization`](Self::Summarization)): the document is skipped, logged
///   and retried on the next run; the rest of the batch continues.
/// - **Per operation** ([`Embedding`](Self::Embedding),
///   [`DimensionMismatch`](Self::DimensionMismatch),
///   [`Rerank`](Self::Rerank), storage and IO errors): the current index run or
///   query is aborted before any index state is written.
/// - **Fatal configuration/state** ([`ModelMismatch`](Self::ModelMismatch),
///   [`IndexCorruption`](Self::IndexCorruption), [`Config`](Self::Config)):
///   surfaced to the caller; corruption is recovered with a full rebuild.
///
/// [`RerankTimeout`](Self::RerankTimeout) never reaches a query caller: the
/// retriever degrades to parent-similarity ordering instead.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// The document has no extractable text (empty, blank or not UTF-8)
    #[error("Document has no extractable text: {path}")]
    EmptyDocument { path: String },

    /// The summarizer failed, timed out or produced an empty summary
    #[error("Summarization failed for {path}: {source}")]
    Summarization {
        path: String,
        #[source]
        source: CallError,
    },

    /// The embedding model failed or timed out
    #[error("Embedding failed: {source}")]
    Embedding {
        #[source]
        source: CallError,
    },

    /// A vector does not have the dimension the index was built with
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The parent index on disk was built with a different embedding model
    #[error(
        "Parent index was built with model {stored}, but {configured} is configured; \
         rebuild the index or restore the original model"
    )]
    ModelMismatch { stored: String, configured: String },

    /// An on-disk index file cannot be read back
    #[error("Index corruption in {}: {reason}", path.display())]
    IndexCorruption { path: PathBuf, reason: String },

    /// Re-ranking kept timing out
    #[error("Re-ranking timed out after {attempts} attempt(s)")]
    RerankTimeout { attempts: u32 },

    /// Re-ranking failed for a reason other than a timeout
    #[error("Re-ranking failed: {source}")]
    Rerank {
        #[source]
        source: CallError,
    },

    /// A model collaborator could not be constructed or loaded
    #[error("Model error: {source}")]
    Model {
        #[from]
        source: finrag_models::ModelError,
    },

    /// Child store (SQLite) errors
    #[error("Storage error: {source}")]
    Storage {
        #[from]
        source: sqlx::Error,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Invalid configuration values or an unreadable config file
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl RagError {
    pub fn corruption<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::IndexCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this failure only affects one document of an ingestion batch.
    pub fn is_document_level(&self) -> bool {
        matches!(self, Self::EmptyDocument { .. } | Self::Summarization { .. })
    }

    /// Whether the caller should rebuild the index from source documents.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Self::IndexCorruption { .. } | Self::ModelMismatch { .. }
        )
    }
}

impl From<tokio::task::JoinError> for RagError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Io {
            source: std::io::Error::other(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let empty = RagError::EmptyDocument {
            path: "blank.txt".to_string(),
        };
        assert!(empty.is_document_level());
        assert!(!empty.requires_rebuild());

        let corrupt = RagError::corruption("/tmp/parents.fpi", "bad magic");
        assert!(!corrupt.is_document_level());
        assert!(corrupt.requires_rebuild());
        assert_eq!(
            corrupt.to_string(),
            "Index corruption in /tmp/parents.fpi: bad magic"
        );

        let mismatch = RagError::DimensionMismatch {
            expected: 768,
            actual: 384,
        };
        assert!(!mismatch.is_document_level());
    }
}

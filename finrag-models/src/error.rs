//! Error types for model collaborators

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Error type for every collaborator call made through this crate.
///
/// Callers that retry (the retrieval pipeline wraps every call in a timeout
/// and a bounded number of attempts) consult [`ModelError::is_retryable`] to
/// tell transient transport failures apart from failures that will repeat.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Error when a configuration value is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// The configured model name has no known binding
    #[error("Unknown {kind} model: {name}")]
    UnknownModel { kind: &'static str, name: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: anyhow::Error,
    },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: anyhow::Error,
    },

    /// Error while scoring query/passage pairs
    #[error("Rerank scoring failed: {source}")]
    Rerank {
        #[source]
        source: anyhow::Error,
    },

    /// Transport-level HTTP failures
    #[error("HTTP request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// The remote endpoint answered with a non-success status
    #[error("Endpoint returned status {status}: {body}")]
    Endpoint { status: u16, body: String },

    /// The model answered but produced nothing usable
    #[error("Model returned empty {what}")]
    EmptyOutput { what: &'static str },

    /// A shared model handle was poisoned by a panicking thread
    #[error("Model lock poisoned")]
    LockPoisoned,

    /// Response payload could not be decoded
    #[error("Malformed response: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// IO errors when reading model files
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl ModelError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a model initialization error from a FastEmbed failure.
    pub fn model_init(source: anyhow::Error) -> Self {
        Self::ModelInitialization { source }
    }

    /// Create an embedding generation error from a FastEmbed failure.
    pub fn embedding_gen(source: anyhow::Error) -> Self {
        Self::EmbeddingGeneration { source }
    }

    /// Create a rerank error from a FastEmbed failure.
    pub fn rerank(source: anyhow::Error) -> Self {
        Self::Rerank { source }
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Transport failures, server-side (5xx) and rate-limit (429) statuses are
    /// transient. Configuration problems, malformed payloads and empty model
    /// output are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { source } => !source.is_builder() && !source.is_decode(),
            Self::Endpoint { status, .. } => *status >= 500 || *status == 429,
            Self::EmbeddingGeneration { .. } | Self::Rerank { .. } | Self::AsyncTask { .. } => {
                true
            }
            Self::Io { .. } => true,
            Self::InvalidConfig { .. }
            | Self::UnknownModel { .. }
            | Self::ModelInitialization { .. }
            | Self::EmptyOutput { .. }
            | Self::LockPoisoned
            | Self::Json { .. } => false,
        }
    }
}

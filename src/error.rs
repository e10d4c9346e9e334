//! Error taxonomy for the indexing and retrieval engine.
//!
//! Preflight errors (`PathNotFound`, `AlreadyIndexed`, ...) are returned
//! synchronously from the engine entry points. Errors raised inside a
//! background indexing run are recorded on the snapshot instead and become
//! visible through `get_indexing_status`.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Errors surfaced by the engine and its capabilities.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("'{0}' is already being indexed")]
    AlreadyIndexing(String),

    #[error("'{0}' is already indexed; pass force to reindex")]
    AlreadyIndexed(String),

    #[error("'{0}' is not indexed")]
    NotIndexed(String),

    #[error("invalid splitter: '{0}' (expected 'ast' or 'text')")]
    InvalidSplitter(String),

    #[error("invalid extension filter entry: '{0}' (expected e.g. '.ts')")]
    InvalidExtensionFilter(String),

    #[error("embedding dimension mismatch: collection expects {expected}, provider produces {actual}; clear and reindex")]
    DimensionMismatch { expected: u32, actual: u32 },

    #[error("embedding provider error: {message}")]
    Embedding { retryable: bool, message: String },

    #[error("vector store error during {operation}: {cause}")]
    Store { operation: String, cause: String },

    #[error("collection limit reached (max {max})")]
    CollectionLimit { max: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation busy for '{0}'")]
    Busy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Shorthand for store failures tagged with the failing operation.
    pub fn store(operation: impl Into<String>, cause: impl ToString) -> Self {
        EngineError::Store {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Non-retryable embedding failure (bad input, auth, 4xx).
    pub fn embedding_permanent(message: impl Into<String>) -> Self {
        EngineError::Embedding {
            retryable: false,
            message: message.into(),
        }
    }

    /// Retryable embedding failure (rate limit, 5xx, network).
    pub fn embedding_retryable(message: impl Into<String>) -> Self {
        EngineError::Embedding {
            retryable: true,
            message: message.into(),
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Embedding { retryable: true, .. })
    }
}

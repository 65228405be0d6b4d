//! Error types for the `cvscreen-rag` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in RAG operations.
///
/// Each variant is a distinct, narrow failure kind so that a serving layer can
/// map it to an appropriate response. See [`RagError::is_client_error`].
#[derive(Debug, Error)]
pub enum RagError {
    /// A required credential or model identifier is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The corpus produced no usable text or no passages.
    #[error("Empty corpus: {0}")]
    EmptyCorpus(String),

    /// No vector index has been built at the configured location.
    #[error("Index not found at '{}': {message}", path.display())]
    IndexNotFound {
        /// The index directory that was inspected.
        path: PathBuf,
        /// Why the index could not be used.
        message: String,
    },

    /// The persisted index was built with a different embedding model.
    #[error("Stale index: built with embedding model '{found}', expected '{expected}'")]
    StaleIndex {
        /// The embedding model the engine is configured with.
        expected: String,
        /// The embedding model recorded in the index manifest.
        found: String,
    },

    /// A vector index cannot be built from zero entries.
    #[error("Cannot build a vector index from zero entries")]
    EmptyIndex,

    /// The embedding backend is not usable or a call to it failed.
    #[error("Embedding unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The generative backend failed to produce a valid answer.
    #[error("Generation error ({provider}): {message}")]
    Generation {
        /// The generation backend that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An argument was rejected before any work was done.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A filesystem operation failed.
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing the index manifest failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Returns `true` when the caller can correct the failure (bad input,
    /// missing configuration, missing or stale index, empty corpus).
    ///
    /// Backend and I/O failures return `false`.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RagError::Configuration(_)
                | RagError::EmptyCorpus(_)
                | RagError::IndexNotFound { .. }
                | RagError::StaleIndex { .. }
                | RagError::InvalidArgument(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RagError::Io { path: path.into(), source }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

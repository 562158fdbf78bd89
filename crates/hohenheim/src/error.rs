//! Error types for Hohenheim

use thiserror::Error;

use crate::evolution::EvolutionError;
use crate::reasoning::BackendError;
use crate::session::SessionIdError;

/// Main error type for Hohenheim operations
#[derive(Error, Debug)]
pub enum HohenheimError {
    /// Invalid configuration, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// The embedding provider could not produce a vector
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// The vector index could not be read or written
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Targeted operation on an id that is not present
    #[error("Not found: {0}")]
    NotFound(String),

    /// Every eligible reasoning backend failed; carries the last failure
    #[error("Reasoning unavailable: {0}")]
    ReasoningUnavailable(BackendError),

    #[error("Invalid session: {0}")]
    Session(#[from] SessionIdError),

    #[error("Evolution error: {0}")]
    Evolution(#[from] EvolutionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for HohenheimError {
    fn from(err: serde_json::Error) -> Self {
        HohenheimError::Serialization(err.to_string())
    }
}

/// Result type alias for Hohenheim operations
pub type Result<T> = std::result::Result<T, HohenheimError>;

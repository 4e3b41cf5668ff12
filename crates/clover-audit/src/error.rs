//! Error types for the access log crate.

use thiserror::Error;

/// Errors that can occur during access log operations.
#[derive(Debug, Error)]
pub enum AccessLogError {
    /// Failed to initialize the access logger.
    #[error("failed to initialize access logger: {0}")]
    InitializationFailed(String),

    /// Storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

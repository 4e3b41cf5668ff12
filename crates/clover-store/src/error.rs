//! Error types for the application stores.

use thiserror::Error;

/// Errors raised by the mapping store, description store, catalog and
/// provisioner.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be reached (pool timeout, I/O, TLS).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other database error.
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// A unique constraint would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Identifier rejected before it reached SQL.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// User id not representable as the store's key type.
    #[error("user id '{0}' does not match the configured user id type")]
    InvalidUserId(String),

    /// Stored JSON could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the error means the store itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => Self::Unavailable(e.to_string()),
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                Self::Conflict(db.message().to_string())
            }
            other => Self::Database(other),
        }
    }
}

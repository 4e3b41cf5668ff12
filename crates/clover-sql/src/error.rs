//! Error types for the SQL crate.

use thiserror::Error;

/// Errors raised while parsing SQL.
#[derive(Debug, Error)]
pub enum SqlError {
    /// SQL parsing failed.
    #[error("failed to parse SQL: {0}")]
    Parse(String),
}

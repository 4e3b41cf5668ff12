//! Query results and the caller-facing error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Category of a failed query, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No role mapping exists for the user.
    UserNotProvisioned,
    /// The mapped role is missing in the database or cannot be assumed.
    RoleAssumptionError,
    /// The validator refused the statement.
    QueryRejected,
    /// The database denied access to an object.
    PermissionDenied,
    /// The application database could not be reached.
    StoreUnavailable,
    /// A bounded operation exceeded its deadline.
    Timeout,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserNotProvisioned => "user_not_provisioned",
            Self::RoleAssumptionError => "role_assumption_error",
            Self::QueryRejected => "query_rejected",
            Self::PermissionDenied => "permission_denied",
            Self::StoreUnavailable => "store_unavailable",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::StoreUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one role-scoped query.
///
/// Every row has exactly `columns.len()` values and `row_count == rows.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Build a successful result. Rows are padded or truncated to the column
    /// count.
    pub fn from_rows(
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
        elapsed: Duration,
    ) -> Self {
        let width = columns.len();
        let rows: Vec<Vec<serde_json::Value>> = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, serde_json::Value::Null);
                row
            })
            .collect();
        Self {
            row_count: rows.len(),
            columns,
            rows,
            execution_time_ms: elapsed.as_millis() as u64,
            success: true,
            error_kind: None,
            error: None,
        }
    }

    /// Build a failed result carrying a caller-safe message.
    pub fn failure(kind: ErrorKind, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: elapsed.as_millis() as u64,
            success: false,
            error_kind: Some(kind),
            error: Some(message.into()),
        }
    }

    /// Whether the row/column shape holds.
    pub fn is_well_formed(&self) -> bool {
        self.row_count == self.rows.len()
            && self.rows.iter().all(|row| row.len() == self.columns.len())
    }
}

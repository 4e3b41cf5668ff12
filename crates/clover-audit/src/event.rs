//! Access log entries.
//!
//! One entry is recorded per table touched by a query attempt (or one entry
//! with table `unknown` when the tables cannot be determined).

use chrono::{DateTime, Utc};
use clover_core::ErrorKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Table name recorded when a statement's tables cannot be determined.
pub const UNKNOWN_TABLE: &str = "unknown";

/// How a schema object was accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Metadata read (schema fetch).
    Read,
    /// Data query.
    Query,
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "READ"),
            Self::Query => write!(f, "QUERY"),
        }
    }
}

/// An access log entry. Entries are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Unique entry ID.
    pub entry_id: Uuid,

    /// When the access happened.
    pub occurred_at: DateTime<Utc>,

    pub user_id: String,
    pub schema_name: String,
    pub table_name: String,
    pub access_type: AccessType,
    pub success: bool,

    /// Database role the query ran under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    /// Failure category (for failed accesses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Number of rows returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

impl AccessLogEntry {
    /// Create an entry with the core fields.
    pub fn new(
        user_id: impl Into<String>,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        access_type: AccessType,
        success: bool,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            user_id: user_id.into(),
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            access_type,
            success,
            role_name: None,
            error_kind: None,
            duration_ms: None,
            row_count: None,
        }
    }

    /// Create a builder for an entry.
    pub fn builder(
        user_id: impl Into<String>,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        access_type: AccessType,
    ) -> AccessLogEntryBuilder {
        AccessLogEntryBuilder {
            entry: Self::new(user_id, schema_name, table_name, access_type, true),
        }
    }

    /// Format the entry as a human-readable log line.
    ///
    /// Format: `[user - schema.table - TYPE - OK|FAILED(kind)]`
    pub fn to_log_line(&self) -> String {
        let outcome = match (self.success, self.error_kind) {
            (true, _) => "OK".to_string(),
            (false, Some(kind)) => format!("FAILED({})", kind),
            (false, None) => "FAILED".to_string(),
        };
        let mut line = format!(
            "[{} - {}.{} - {} - {}]",
            self.user_id, self.schema_name, self.table_name, self.access_type, outcome
        );
        if let Some(role) = &self.role_name {
            line.push_str(&format!(" role={}", role));
        }
        if let Some(ms) = self.duration_ms {
            line.push_str(&format!(" duration={}ms", ms));
        }
        line
    }
}

/// Builder for [`AccessLogEntry`].
#[derive(Debug, Clone)]
pub struct AccessLogEntryBuilder {
    entry: AccessLogEntry,
}

impl AccessLogEntryBuilder {
    pub fn success(mut self, success: bool) -> Self {
        self.entry.success = success;
        self
    }

    pub fn role(mut self, role_name: impl Into<String>) -> Self {
        self.entry.role_name = Some(role_name.into());
        self
    }

    /// Mark the access as failed with the given category.
    pub fn failed(mut self, kind: ErrorKind) -> Self {
        self.entry.success = false;
        self.entry.error_kind = Some(kind);
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.entry.duration_ms = Some(ms);
        self
    }

    pub fn row_count(mut self, rows: u64) -> Self {
        self.entry.row_count = Some(rows);
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.entry.occurred_at = at;
        self
    }

    pub fn build(self) -> AccessLogEntry {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_line_format() {
        let entry = AccessLogEntry::builder("u1", "demo1", "sales", AccessType::Query)
            .role("role_u1")
            .duration_ms(12)
            .build();
        assert_eq!(
            entry.to_log_line(),
            "[u1 - demo1.sales - QUERY - OK] role=role_u1 duration=12ms"
        );
    }

    #[test]
    fn test_failed_entry() {
        let entry = AccessLogEntry::builder("u2", "public", "sales", AccessType::Query)
            .failed(ErrorKind::PermissionDenied)
            .build();
        assert!(!entry.success);
        assert_eq!(
            entry.to_log_line(),
            "[u2 - public.sales - QUERY - FAILED(permission_denied)]"
        );
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let entry = AccessLogEntry::new("u1", "public", "products", AccessType::Read, true);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["access_type"], "read");
        assert!(json.get("role_name").is_none());

        let back: AccessLogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}

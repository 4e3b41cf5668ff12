//! Query history: one row per role-scoped execution.
//!
//! Rows live in `query_history` in the application database. User ids are
//! stored as text regardless of the mapping store's key type, so a rejected
//! id still leaves a trace.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clover_core::{ErrorKind, QueryResult, UserId};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default number of entries returned by [`QueryHistoryStore::user_history`].
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// One executed (or refused) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    pub user_id: String,
    pub database_name: String,
    pub sql_query: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub result_count: u64,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl QueryHistoryEntry {
    /// Entry for `sql` run by `user` with the given outcome.
    pub fn from_result(
        user: &UserId,
        database_name: &str,
        sql: &str,
        result: &QueryResult,
    ) -> Self {
        Self {
            user_id: user.as_str().to_string(),
            database_name: database_name.to_string(),
            sql_query: sql.to_string(),
            success: result.success,
            error_kind: result.error_kind,
            error_message: result.error.clone(),
            result_count: result.row_count as u64,
            execution_time_ms: result.execution_time_ms,
            created_at: Utc::now(),
        }
    }
}

/// Append-only log of executed queries.
#[async_trait]
pub trait QueryHistoryStore: Send + Sync {
    async fn record(&self, entry: &QueryHistoryEntry) -> Result<(), StoreError>;

    /// The user's most recent entries, newest first.
    async fn user_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<QueryHistoryEntry>, StoreError>;
}

fn parse_error_kind(raw: Option<String>) -> Option<ErrorKind> {
    let raw = raw?;
    match serde_json::from_value(serde_json::Value::String(raw.clone())) {
        Ok(kind) => Some(kind),
        Err(_) => {
            tracing::warn!(error_kind = %raw, "Unknown error kind in query history");
            Some(ErrorKind::Internal)
        }
    }
}

fn row_to_entry(row: &PgRow) -> Result<QueryHistoryEntry, StoreError> {
    let result_count: i64 = row.try_get("result_count")?;
    let execution_time_ms: i64 = row.try_get("execution_time_ms")?;
    Ok(QueryHistoryEntry {
        user_id: row.try_get("user_id")?,
        database_name: row.try_get("database_name")?,
        sql_query: row.try_get("sql_query")?,
        success: row.try_get("success")?,
        error_kind: parse_error_kind(row.try_get("error_kind")?),
        error_message: row.try_get("error_message")?,
        result_count: result_count.max(0) as u64,
        execution_time_ms: execution_time_ms.max(0) as u64,
        created_at: row.try_get("created_at")?,
    })
}

/// Postgres-backed query history (application database).
#[derive(Debug, Clone)]
pub struct PgQueryHistoryStore {
    pool: PgPool,
}

impl PgQueryHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryHistoryStore for PgQueryHistoryStore {
    async fn record(&self, entry: &QueryHistoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO query_history
                (user_id, database_name, sql_query, success, error_kind, error_message,
                 result_count, execution_time_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&entry.user_id)
        .bind(&entry.database_name)
        .bind(&entry.sql_query)
        .bind(entry.success)
        .bind(entry.error_kind.map(|k| k.as_str()))
        .bind(&entry.error_message)
        .bind(i64::try_from(entry.result_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(entry.execution_time_ms).unwrap_or(i64::MAX))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<QueryHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, database_name, sql_query, success, error_kind, error_message,
                   result_count, execution_time_ms, created_at
            FROM query_history
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }
}

/// In-memory query history, for tests and offline tooling.
#[derive(Debug, Default)]
pub struct InMemoryQueryHistoryStore {
    entries: RwLock<Vec<QueryHistoryEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryQueryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every recorded entry in insertion order.
    pub fn entries(&self) -> Vec<QueryHistoryEntry> {
        self.entries
            .read()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory query history marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn lock_error<E: std::fmt::Display>(e: E) -> StoreError {
        StoreError::Unavailable(format!("query history lock poisoned: {}", e))
    }
}

#[async_trait]
impl QueryHistoryStore for InMemoryQueryHistoryStore {
    async fn record(&self, entry: &QueryHistoryEntry) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.write().map_err(Self::lock_error)?;
        entries.push(entry.clone());
        Ok(())
    }

    async fn user_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<QueryHistoryEntry>, StoreError> {
        self.check()?;
        let entries = self.entries.read().map_err(Self::lock_error)?;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn entry(user: &str, sql: &str) -> QueryHistoryEntry {
        let result = QueryResult::from_rows(
            vec!["n".to_string()],
            vec![vec![serde_json::json!(1)]],
            Duration::from_millis(3),
        );
        QueryHistoryEntry::from_result(&UserId::new(user), "cloverdash", sql, &result)
    }

    #[test]
    fn test_entry_from_failure() {
        let result = QueryResult::failure(
            ErrorKind::QueryRejected,
            "Denied keyword: DROP",
            Duration::from_millis(1),
        );
        let entry = QueryHistoryEntry::from_result(
            &UserId::new("u1"),
            "cloverdash",
            "DROP TABLE sales",
            &result,
        );
        assert!(!entry.success);
        assert_eq!(entry.error_kind, Some(ErrorKind::QueryRejected));
        assert_eq!(entry.error_message.as_deref(), Some("Denied keyword: DROP"));
        assert_eq!(entry.result_count, 0);
    }

    #[test]
    fn test_parse_error_kind() {
        assert_eq!(
            parse_error_kind(Some("permission_denied".to_string())),
            Some(ErrorKind::PermissionDenied)
        );
        assert_eq!(
            parse_error_kind(Some("something_new".to_string())),
            Some(ErrorKind::Internal)
        );
        assert_eq!(parse_error_kind(None), None);
    }

    #[tokio::test]
    async fn test_user_history_newest_first_and_limited() {
        let store = InMemoryQueryHistoryStore::new();
        store.record(&entry("u1", "SELECT 1")).await.unwrap();
        store.record(&entry("u2", "SELECT 2")).await.unwrap();
        store.record(&entry("u1", "SELECT 3")).await.unwrap();
        store.record(&entry("u1", "SELECT 4")).await.unwrap();

        let history = store.user_history("u1", 2).await.unwrap();
        let sql: Vec<&str> = history.iter().map(|e| e.sql_query.as_str()).collect();
        assert_eq!(sql, vec!["SELECT 4", "SELECT 3"]);

        assert!(store.user_history("nobody", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = InMemoryQueryHistoryStore::new();
        store.set_unavailable(true);
        let err = store.record(&entry("u1", "SELECT 1")).await.unwrap_err();
        assert!(err.is_unavailable());
    }
}

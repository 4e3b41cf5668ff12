//! Role-scoped sessions on the data database.
//!
//! A session wraps one checked-out connection. Every query runs inside its
//! own transaction and the role, search path and statement timeout are set
//! with `SET LOCAL`, so they end with the transaction. On release the session
//! rolls back and resets the connection, including its prepared statement
//! cache, before it goes back to the pool; a session that is discarded or
//! dropped without release, even while the release itself is in flight,
//! closes its connection instead.

use crate::decode;
use crate::error::{ExecutionError, Phase};
use async_trait::async_trait;
use clover_core::{SearchPath, quote_ident};
use clover_store::reset_session;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::{Column, Connection, Executor, PgConnection, PgPool, Postgres, Statement};
use std::time::Duration;

/// Columns and rows returned by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Hands out sessions on the data database.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn DataSession>, ExecutionError>;
}

/// One checked-out connection, driven through the execution steps in order:
/// [`begin`](Self::begin), [`assume_role`](Self::assume_role),
/// [`set_search_path`](Self::set_search_path), [`fetch`](Self::fetch), then
/// exactly one of [`release`](Self::release) or [`discard`](Self::discard).
#[async_trait]
pub trait DataSession: Send {
    async fn begin(
        &mut self,
        read_only: bool,
        statement_timeout: Duration,
    ) -> Result<(), ExecutionError>;

    async fn assume_role(&mut self, role_name: &str) -> Result<(), ExecutionError>;

    async fn set_search_path(&mut self, path: &SearchPath) -> Result<(), ExecutionError>;

    /// Run a statement and collect its rows. Column names are reported even
    /// when no row is returned.
    async fn fetch(&mut self, sql: &str) -> Result<RowSet, ExecutionError>;

    /// Roll back, reset and return the connection to the pool.
    async fn release(self: Box<Self>) -> Result<(), ExecutionError>;

    /// Close the connection without returning it to the pool.
    fn discard(self: Box<Self>);
}

/// Sessions backed by a `sqlx` pool on the data database.
#[derive(Debug, Clone)]
pub struct PgSessionProvider {
    pool: PgPool,
}

impl PgSessionProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionProvider for PgSessionProvider {
    async fn acquire(&self) -> Result<Box<dyn DataSession>, ExecutionError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ExecutionError::from_sqlx(e, Phase::Acquire, ""))?;
        Ok(Box::new(PgSession {
            conn: Some(conn),
            role: String::new(),
        }))
    }
}

/// A role-scoped session on one pooled Postgres connection.
pub struct PgSession {
    /// `None` once released or discarded.
    conn: Option<PoolConnection<Postgres>>,
    role: String,
}

impl PgSession {
    fn conn(&mut self) -> Result<&mut PgConnection, ExecutionError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| ExecutionError::Internal("session already released".to_string()))
    }

    async fn run(&mut self, sql: &str, phase: Phase) -> Result<(), ExecutionError> {
        let role = self.role.clone();
        let conn = self.conn()?;
        conn.execute(sql)
            .await
            .map_err(|e| ExecutionError::from_sqlx(e, phase, &role))?;
        Ok(())
    }

    /// Column names of `sql` without running it. The statement is prepared
    /// on the server and every cached statement is closed afterwards.
    async fn describe_columns(&mut self, sql: &str) -> Result<Vec<String>, ExecutionError> {
        let role = self.role.clone();
        let conn = self.conn()?;
        let statement = (&mut *conn)
            .prepare(sql)
            .await
            .map_err(|e| ExecutionError::from_sqlx(e, Phase::Query, &role))?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        conn.clear_cached_statements()
            .await
            .map_err(|e| ExecutionError::from_sqlx(e, Phase::Query, &role))?;
        Ok(columns)
    }
}

#[async_trait]
impl DataSession for PgSession {
    async fn begin(
        &mut self,
        read_only: bool,
        statement_timeout: Duration,
    ) -> Result<(), ExecutionError> {
        let begin = if read_only {
            "BEGIN TRANSACTION READ ONLY"
        } else {
            "BEGIN"
        };
        let sql = format!(
            "{}; SET LOCAL statement_timeout = {}",
            begin,
            statement_timeout.as_millis()
        );
        self.run(&sql, Phase::Begin).await
    }

    async fn assume_role(&mut self, role_name: &str) -> Result<(), ExecutionError> {
        self.role = role_name.to_string();
        let sql = format!("SET LOCAL ROLE {}", quote_ident(role_name));
        self.run(&sql, Phase::RoleSwitch).await
    }

    async fn set_search_path(&mut self, path: &SearchPath) -> Result<(), ExecutionError> {
        let sql = format!("SET LOCAL search_path TO {}", path.to_sql());
        self.run(&sql, Phase::SearchPath).await
    }

    async fn fetch(&mut self, sql: &str) -> Result<RowSet, ExecutionError> {
        let role = self.role.clone();
        let conn = self.conn()?;
        let rows = conn
            .fetch_all(sqlx::query(sql).persistent(false))
            .await
            .map_err(|e| ExecutionError::from_sqlx(e, Phase::Query, &role))?;

        let columns = match rows.first() {
            Some(row) => decode::column_names(row),
            None => self.describe_columns(sql).await?,
        };
        let rows = rows.iter().map(decode::row_values).collect();
        Ok(RowSet { columns, rows })
    }

    async fn release(mut self: Box<Self>) -> Result<(), ExecutionError> {
        let Some(conn) = self.conn.as_deref_mut() else {
            return Ok(());
        };
        // The connection stays in the session until the reset completes; a
        // cancelled release drops the session and closes it.
        let reset = reset_session(conn).await;
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        match reset {
            Ok(()) => Ok(()),
            Err(e) => {
                conn.close_on_drop();
                Err(ExecutionError::from_sqlx(e, Phase::Release, &self.role))
            }
        }
    }

    fn discard(mut self: Box<Self>) {
        if let Some(mut conn) = self.conn.take() {
            conn.close_on_drop();
        }
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            tracing::warn!(role = %self.role, "Session dropped without release, closing connection");
            conn.close_on_drop();
        }
    }
}

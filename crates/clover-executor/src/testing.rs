//! In-process fakes for the data database.
//!
//! The fake models one physical connection that is reused across checkouts,
//! with `SET LOCAL` semantics: role and search path live until the
//! transaction ends. Each checkout records the state it found so tests can
//! assert that nothing leaked from the previous user.

use crate::error::ExecutionError;
use crate::session::{DataSession, RowSet, SessionProvider};
use async_trait::async_trait;
use clover_core::SearchPath;
use clover_sql::SqlAnalyzer;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Connection state visible to the next checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub role: Option<String>,
    pub search_path: Option<String>,
    pub in_transaction: bool,
}

#[derive(Debug, Default)]
pub struct FakeLog {
    /// State found at each checkout.
    pub observed: Vec<ConnectionState>,
    /// Statements the fake was asked to run.
    pub statements: Vec<String>,
    pub acquired: usize,
    pub released: usize,
    pub discarded: usize,
}

#[derive(Default)]
struct FakeData {
    /// Existing roles and the tables (`schema.table`) each may read.
    grants: HashMap<String, HashSet<String>>,
    /// Table contents keyed by `schema.table`.
    tables: HashMap<String, RowSet>,
    query_delay: Option<Duration>,
    release_delay: Option<Duration>,
}

/// Fake data database with one reusable connection.
#[derive(Clone, Default)]
pub struct FakeDatabase {
    data: Arc<Mutex<FakeData>>,
    connection: Arc<Mutex<ConnectionState>>,
    log: Arc<Mutex<FakeLog>>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, schema: &str, table: &str, rows: RowSet) -> Self {
        self.data
            .lock()
            .unwrap()
            .tables
            .insert(format!("{}.{}", schema, table), rows);
        self
    }

    pub fn with_role(self, role: &str, readable: &[&str]) -> Self {
        self.data.lock().unwrap().grants.insert(
            role.to_string(),
            readable.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_query_delay(self, delay: Duration) -> Self {
        self.data.lock().unwrap().query_delay = Some(delay);
        self
    }

    pub fn with_release_delay(self, delay: Duration) -> Self {
        self.data.lock().unwrap().release_delay = Some(delay);
        self
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, FakeLog> {
        self.log.lock().unwrap()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionProvider for FakeDatabase {
    async fn acquire(&self) -> Result<Box<dyn DataSession>, ExecutionError> {
        let found = self.connection_state();
        let mut log = self.log.lock().unwrap();
        log.observed.push(found);
        log.acquired += 1;
        Ok(Box::new(FakeSession {
            db: self.clone(),
            finished: false,
        }))
    }
}

/// A checkout. Dropped without release or discard, it counts as discarded:
/// the physical connection is closed rather than returned.
pub struct FakeSession {
    db: FakeDatabase,
    finished: bool,
}

impl FakeSession {
    fn record(&self, statement: String) {
        self.db.log.lock().unwrap().statements.push(statement);
    }

    fn end_transaction(&self) {
        *self.db.connection.lock().unwrap() = ConnectionState::default();
    }
}

#[async_trait]
impl DataSession for FakeSession {
    async fn begin(
        &mut self,
        read_only: bool,
        statement_timeout: Duration,
    ) -> Result<(), ExecutionError> {
        self.record(format!(
            "BEGIN read_only={} timeout={}ms",
            read_only,
            statement_timeout.as_millis()
        ));
        self.db.connection.lock().unwrap().in_transaction = true;
        Ok(())
    }

    async fn assume_role(&mut self, role_name: &str) -> Result<(), ExecutionError> {
        self.record(format!("SET LOCAL ROLE {}", role_name));
        if !self.db.data.lock().unwrap().grants.contains_key(role_name) {
            return Err(ExecutionError::RoleAssumption {
                role: role_name.to_string(),
                message: format!("role \"{}\" does not exist", role_name),
            });
        }
        self.db.connection.lock().unwrap().role = Some(role_name.to_string());
        Ok(())
    }

    async fn set_search_path(&mut self, path: &SearchPath) -> Result<(), ExecutionError> {
        self.record(format!("SET LOCAL search_path TO {}", path));
        self.db.connection.lock().unwrap().search_path = Some(path.to_string());
        Ok(())
    }

    async fn fetch(&mut self, sql: &str) -> Result<RowSet, ExecutionError> {
        self.record(format!("QUERY {}", sql));
        let delay = self.db.data.lock().unwrap().query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.db.connection_state();
        let Some(table) = SqlAnalyzer::new().tables_in(sql).into_iter().next() else {
            return Ok(RowSet {
                columns: vec!["?column?".to_string()],
                rows: vec![vec![json!(1)]],
            });
        };

        let data = self.db.data.lock().unwrap();
        let search_path = state.search_path.unwrap_or_else(|| "public".to_string());
        let candidates: Vec<String> = match &table.schema {
            Some(schema) => vec![format!("{}.{}", schema, table.name)],
            None => search_path
                .split(", ")
                .map(|schema| format!("{}.{}", schema, table.name))
                .collect(),
        };
        let Some(qualified) = candidates.into_iter().find(|t| data.tables.contains_key(t)) else {
            return Err(ExecutionError::Database {
                phase: crate::error::Phase::Query,
                message: format!("relation \"{}\" does not exist", table.name),
            });
        };

        let readable = state
            .role
            .as_ref()
            .and_then(|role| data.grants.get(role))
            .is_some_and(|tables| tables.contains(&qualified));
        if !readable {
            return Err(ExecutionError::PermissionDenied {
                message: format!("permission denied for table {}", table.name),
            });
        }

        let rows = data.tables[&qualified].clone();
        if sql.to_ascii_uppercase().contains("COUNT(*)") {
            return Ok(RowSet {
                columns: vec!["count".to_string()],
                rows: vec![vec![json!(rows.rows.len())]],
            });
        }
        Ok(rows)
    }

    async fn release(self: Box<Self>) -> Result<(), ExecutionError> {
        let mut session = self;
        let delay = session.db.data.lock().unwrap().release_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        session.record("ROLLBACK; RESET ROLE; RESET search_path".to_string());
        session.end_transaction();
        session.finished = true;
        session.db.log.lock().unwrap().released += 1;
        Ok(())
    }

    fn discard(mut self: Box<Self>) {
        self.end_transaction();
        self.finished = true;
        self.db.log.lock().unwrap().discarded += 1;
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if !self.finished {
            self.end_transaction();
            self.db.log.lock().unwrap().discarded += 1;
        }
    }
}

/// Rows of a small `sales` table.
pub fn sales_rows() -> RowSet {
    RowSet {
        columns: vec!["id".to_string(), "total".to_string()],
        rows: vec![
            vec![json!(1), json!(120.5)],
            vec![json!(2), json!(80)],
            vec![json!(3), json!(42.25)],
        ],
    }
}

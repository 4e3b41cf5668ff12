//! Role-scoped query execution.
//!
//! A query for a user moves through
//!
//! ```text
//! Idle -> RoleLookup -> SessionAcquired -> RoleAssumed -> SearchPathSet
//!      -> Validating -> Executing -> ResultReady
//! ```
//!
//! and any step may end in `Failed`. The steps run strictly in order on one
//! session. Once a session is acquired it is released on every exit path,
//! or discarded when a deadline was hit.

use crate::error::{ExecutionError, Phase};
use crate::resolver::SchemaResolver;
use crate::session::{DataSession, RowSet, SessionProvider};
use clover_audit::{AccessLogEntry, AccessLogger, AccessType, UNKNOWN_TABLE};
use clover_core::{ExecutorConfig, QueryResult, SearchPath, UserId, UserRoleMapping};
use clover_sql::{SqlAnalyzer, SqlValidator};
use clover_store::{QueryHistoryEntry, QueryHistoryStore};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where an execution is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    RoleLookup,
    SessionAcquired,
    RoleAssumed,
    SearchPathSet,
    Validating,
    Executing,
    ResultReady,
    Failed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RoleLookup => "role_lookup",
            Self::SessionAcquired => "session_acquired",
            Self::RoleAssumed => "role_assumed",
            Self::SearchPathSet => "search_path_set",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::ResultReady => "result_ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping for one execution.
struct Attempt {
    state: ExecutionState,
    mapping: Option<UserRoleMapping>,
    search_path: SearchPath,
}

impl Attempt {
    fn advance(&mut self, next: ExecutionState) {
        tracing::trace!(from = %self.state, to = %next, "Execution state");
        self.state = next;
    }
}

/// Executes validated SELECT statements under each user's database role.
#[derive(Clone)]
pub struct RoleScopedExecutor {
    resolver: SchemaResolver,
    sessions: Arc<dyn SessionProvider>,
    validator: SqlValidator,
    analyzer: SqlAnalyzer,
    access_log: AccessLogger,
    history: Option<Arc<dyn QueryHistoryStore>>,
    config: ExecutorConfig,
}

impl RoleScopedExecutor {
    pub fn new(
        resolver: SchemaResolver,
        sessions: Arc<dyn SessionProvider>,
        validator: SqlValidator,
        access_log: AccessLogger,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            resolver,
            sessions,
            validator,
            analyzer: SqlAnalyzer::new(),
            access_log,
            history: None,
            config,
        }
    }

    /// Record every execution in `history`.
    pub fn with_history(mut self, history: Arc<dyn QueryHistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn resolver(&self) -> &SchemaResolver {
        &self.resolver
    }

    pub fn validator(&self) -> &SqlValidator {
        &self.validator
    }

    /// Run `sql` for `user_id`.
    ///
    /// Never fails: errors come back as a `QueryResult` with `success = false`,
    /// an error kind and a caller-safe message. Every attempt is recorded in
    /// the access log and, when configured, the query history.
    pub async fn execute_query_with_user(&self, sql: &str, user_id: &UserId) -> QueryResult {
        let started = Instant::now();
        let mut attempt = Attempt {
            state: ExecutionState::Idle,
            mapping: None,
            search_path: self.resolver.search_path_for(None),
        };

        let outcome = self.run(sql, user_id, &mut attempt).await;
        let elapsed = started.elapsed();
        let role = attempt.mapping.as_ref().map(|m| m.role_name.clone());

        let result = match outcome {
            Ok(rows) => {
                attempt.advance(ExecutionState::ResultReady);
                let result = QueryResult::from_rows(rows.columns, rows.rows, elapsed);
                tracing::info!(
                    user_id = %user_id,
                    role = ?role,
                    search_path = %attempt.search_path,
                    rows = result.row_count,
                    duration_ms = result.execution_time_ms,
                    "Query executed"
                );
                result
            }
            Err(e) => {
                let failed_in = attempt.state;
                attempt.advance(ExecutionState::Failed);
                let kind = e.kind();
                if let ExecutionError::QueryRejected(rejection) = &e {
                    tracing::warn!(
                        user_id = %user_id,
                        role = ?role,
                        rule = %rejection.rule,
                        reason = %rejection.reason,
                        sql = %sql,
                        "Query rejected"
                    );
                } else {
                    tracing::warn!(
                        user_id = %user_id,
                        role = ?role,
                        state = %failed_in,
                        kind = %kind,
                        error = %e,
                        "Query failed"
                    );
                }
                QueryResult::failure(kind, e.public_message(), elapsed)
            }
        };

        self.record_access(sql, user_id, &attempt, &result);
        self.record_history(sql, user_id, &result).await;
        result
    }

    async fn run(
        &self,
        sql: &str,
        user_id: &UserId,
        attempt: &mut Attempt,
    ) -> Result<RowSet, ExecutionError> {
        attempt.advance(ExecutionState::RoleLookup);
        let mapping = self.resolver.lookup_mapping(user_id).await?.ok_or_else(|| {
            ExecutionError::UserNotProvisioned {
                user_id: user_id.to_string(),
            }
        })?;
        attempt.search_path = self.resolver.search_path_for(Some(&mapping));
        attempt.mapping = Some(mapping.clone());

        let mut session = bounded(
            self.config.acquire_timeout(),
            Phase::Acquire,
            self.sessions.acquire(),
        )
        .await?;
        attempt.advance(ExecutionState::SessionAcquired);

        let outcome = self
            .run_in_session(session.as_mut(), sql, &mapping, attempt)
            .await;

        match &outcome {
            Err(e) if e.poisons_session() => {
                tracing::warn!(role = %mapping.role_name, error = %e, "Discarding session");
                session.discard();
            }
            _ => {
                let released = bounded(
                    self.config.statement_timeout(),
                    Phase::Release,
                    session.release(),
                )
                .await;
                if let Err(e) = released {
                    tracing::warn!(role = %mapping.role_name, error = %e, "Session release failed");
                }
            }
        }
        outcome
    }

    async fn run_in_session(
        &self,
        session: &mut dyn DataSession,
        sql: &str,
        mapping: &UserRoleMapping,
        attempt: &mut Attempt,
    ) -> Result<RowSet, ExecutionError> {
        let limit = self.config.statement_timeout();

        bounded(
            limit,
            Phase::Begin,
            session.begin(self.config.read_only_transaction, limit),
        )
        .await?;
        bounded(
            limit,
            Phase::RoleSwitch,
            session.assume_role(&mapping.role_name),
        )
        .await?;
        attempt.advance(ExecutionState::RoleAssumed);

        bounded(
            limit,
            Phase::SearchPath,
            session.set_search_path(&attempt.search_path),
        )
        .await?;
        attempt.advance(ExecutionState::SearchPathSet);

        attempt.advance(ExecutionState::Validating);
        let validated = self.validator.validate(sql)?;

        attempt.advance(ExecutionState::Executing);
        bounded(limit, Phase::Query, session.fetch(&validated.sql)).await
    }

    /// One entry per table the statement names, or one `unknown` entry.
    fn record_access(
        &self,
        sql: &str,
        user_id: &UserId,
        attempt: &Attempt,
        result: &QueryResult,
    ) {
        if !self.access_log.is_enabled() {
            return;
        }
        let default_schema = attempt.search_path.primary();
        let mut targets: Vec<(String, String)> = self
            .analyzer
            .tables_in(sql)
            .into_iter()
            .map(|t| {
                (
                    t.schema.unwrap_or_else(|| default_schema.to_string()),
                    t.name,
                )
            })
            .collect();
        if targets.is_empty() {
            targets.push((default_schema.to_string(), UNKNOWN_TABLE.to_string()));
        }

        for (schema, table) in targets {
            let mut entry =
                AccessLogEntry::builder(user_id.as_str(), schema, table, AccessType::Query)
                    .duration_ms(result.execution_time_ms);
            if let Some(mapping) = &attempt.mapping {
                entry = entry.role(mapping.role_name.clone());
            }
            entry = match (result.success, result.error_kind) {
                (true, _) => entry.row_count(result.row_count as u64),
                (false, Some(kind)) => entry.failed(kind),
                (false, None) => entry.success(false),
            };
            self.access_log.log(entry.build());
        }
    }
}

impl RoleScopedExecutor {
    /// History failures are logged and never change the result.
    async fn record_history(&self, sql: &str, user_id: &UserId, result: &QueryResult) {
        let Some(history) = &self.history else {
            return;
        };
        let entry =
            QueryHistoryEntry::from_result(user_id, self.resolver.database_name(), sql, result);
        match tokio::time::timeout(self.config.acquire_timeout(), history.record(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to record query history");
            }
            Err(_) => {
                tracing::warn!(user_id = %user_id, "Recording query history timed out");
            }
        }
    }
}

async fn bounded<T, F>(limit: Duration, phase: Phase, fut: F) -> Result<T, ExecutionError>
where
    F: Future<Output = Result<T, ExecutionError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExecutionError::Timeout {
            phase,
            after: limit,
        }),
    }
}

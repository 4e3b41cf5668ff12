//! Connection pools for the application and data databases.

use crate::error::StoreError;
use clover_core::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use std::time::Duration;

/// Statements that return a connection to its login role and default
/// settings. A leftover transaction is rolled back first.
pub const SESSION_RESET_SQL: &str =
    "ROLLBACK; RESET ROLE; RESET search_path; RESET statement_timeout";

/// Return a connection to its login state: end any transaction, reset role,
/// search path and statement timeout, and close every prepared statement the
/// connection caches. Cached statements are keyed by SQL text alone, so one
/// planned under a previous role or search path must not be reused.
pub async fn reset_session(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    (&mut *conn).execute(SESSION_RESET_SQL).await?;
    conn.clear_cached_statements().await
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .min_connections(config.pool.min_connections)
        .max_connections(config.pool.max_connections)
        .acquire_timeout(Duration::from_secs(config.pool.acquire_timeout_seconds as u64))
        .idle_timeout(Duration::from_secs(config.pool.idle_timeout_seconds as u64))
}

/// Connect to the application database (mappings, descriptions).
pub async fn connect_app_pool(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let pool = pool_options(config)
        .connect(&config.connection_string())
        .await?;
    tracing::info!(database = %config.database_name(), "Connected to application database");
    Ok(pool)
}

/// Connect to the data database.
///
/// Every connection is reset with [`reset_session`] when it is returned to
/// the pool; a connection whose reset fails is closed instead of reused.
pub async fn connect_data_pool(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let pool = pool_options(config)
        .after_release(|conn, _meta| {
            Box::pin(async move {
                match reset_session(conn).await {
                    Ok(_) => Ok(true),
                    Err(e) => {
                        tracing::warn!(error = %e, "Session reset failed, closing connection");
                        Ok(false)
                    }
                }
            })
        })
        .connect(&config.connection_string())
        .await?;
    tracing::info!(database = %config.database_name(), "Connected to data database");
    Ok(pool)
}

//! Application database schema.

use crate::error::StoreError;
use clover_core::UserIdType;
use sqlx::PgPool;

fn user_id_sql_type(ty: UserIdType) -> &'static str {
    match ty {
        UserIdType::Text => "TEXT",
        UserIdType::Bigint => "BIGINT",
        UserIdType::Uuid => "UUID",
    }
}

/// DDL for the application tables. Every statement is idempotent.
pub fn migration_statements(user_id_type: UserIdType) -> Vec<String> {
    vec![
        format!(
            r#"CREATE TABLE IF NOT EXISTS users_role_bd_mapping (
    id BIGSERIAL PRIMARY KEY,
    user_id {} NOT NULL,
    database_name VARCHAR(255) NOT NULL,
    schema_name VARCHAR(255) NOT NULL DEFAULT 'public',
    role_name VARCHAR(63) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT users_role_bd_mapping_user_db_schema_key UNIQUE (user_id, database_name, schema_name),
    CONSTRAINT users_role_bd_mapping_role_name_key UNIQUE (role_name)
)"#,
            user_id_sql_type(user_id_type)
        ),
        "CREATE INDEX IF NOT EXISTS idx_users_role_bd_mapping_user ON users_role_bd_mapping(user_id, database_name)"
            .to_string(),
        r#"CREATE TABLE IF NOT EXISTS database_descriptions (
    id BIGSERIAL PRIMARY KEY,
    database_name VARCHAR(255) NOT NULL,
    table_name VARCHAR(255) NOT NULL,
    object_type VARCHAR(50) NOT NULL DEFAULT 'table',
    table_description JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT database_descriptions_db_table_key UNIQUE (database_name, table_name)
)"#
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_database_descriptions_database ON database_descriptions(database_name)"
            .to_string(),
        r#"CREATE TABLE IF NOT EXISTS query_history (
    id BIGSERIAL PRIMARY KEY,
    user_id TEXT NOT NULL,
    database_name VARCHAR(255) NOT NULL,
    sql_query TEXT NOT NULL,
    success BOOLEAN NOT NULL,
    error_kind VARCHAR(64),
    error_message TEXT,
    result_count BIGINT NOT NULL DEFAULT 0,
    execution_time_ms BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_query_history_user ON query_history(user_id)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_query_history_created_at ON query_history(created_at)"
            .to_string(),
    ]
}

/// Create the application tables if they do not exist.
pub async fn migrate(pool: &PgPool, user_id_type: UserIdType) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    for statement in migration_statements(user_id_type) {
        sqlx::raw_sql(&statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    tracing::info!(user_id_type = ?user_id_type, "Application database migrated");
    Ok(())
}

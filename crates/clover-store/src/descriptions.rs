//! Description store: human-authored table metadata.
//!
//! Rows live in `database_descriptions`, unique on
//! `(database_name, table_name)`, with the description body kept as a JSONB
//! blob.

use crate::error::StoreError;
use async_trait::async_trait;
use clover_core::{ColumnDescription, ObjectType, TableDescription};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// CRUD access to table descriptions.
#[async_trait]
pub trait DescriptionStore: Send + Sync {
    /// Insert or replace the description for `(database_name, table_name)`.
    async fn save_description(&self, description: &TableDescription) -> Result<(), StoreError>;

    async fn get_description(
        &self,
        database_name: &str,
        table_name: &str,
    ) -> Result<Option<TableDescription>, StoreError>;

    /// All descriptions of one database, ordered by table name.
    async fn list_descriptions(
        &self,
        database_name: &str,
    ) -> Result<Vec<TableDescription>, StoreError>;

    /// Returns whether a row was deleted.
    async fn delete_description(
        &self,
        database_name: &str,
        table_name: &str,
    ) -> Result<bool, StoreError>;
}

/// JSON body stored in `table_description`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DescriptionBody {
    #[serde(default)]
    description: String,
    #[serde(default)]
    columns: BTreeMap<String, ColumnDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    imported_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    import_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl DescriptionBody {
    fn from_description(description: &TableDescription) -> Self {
        Self {
            description: description.description.clone(),
            columns: description.columns.clone(),
            imported_from: description.imported_from.clone(),
            import_date: description.import_date.clone(),
            note: description.note.clone(),
        }
    }

    fn into_description(
        self,
        database_name: String,
        table_name: String,
        object_type: ObjectType,
    ) -> TableDescription {
        TableDescription {
            database_name,
            table_name,
            object_type,
            description: self.description,
            columns: self.columns,
            imported_from: self.imported_from,
            import_date: self.import_date,
            note: self.note,
        }
    }
}

/// Postgres-backed description store (application database).
#[derive(Debug, Clone)]
pub struct PgDescriptionStore {
    pool: PgPool,
}

impl PgDescriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_description(row: &PgRow) -> Result<TableDescription, StoreError> {
    let database_name: String = row.try_get("database_name")?;
    let table_name: String = row.try_get("table_name")?;
    let object_type: String = row.try_get("object_type")?;
    let body: serde_json::Value = row.try_get("table_description")?;

    let object_type = object_type.parse().unwrap_or_else(|e| {
        tracing::warn!(table = %table_name, error = %e, "Unknown object type, assuming table");
        ObjectType::Table
    });
    let body: DescriptionBody = serde_json::from_value(body)?;
    Ok(body.into_description(database_name, table_name, object_type))
}

#[async_trait]
impl DescriptionStore for PgDescriptionStore {
    async fn save_description(&self, description: &TableDescription) -> Result<(), StoreError> {
        let body = serde_json::to_value(DescriptionBody::from_description(description))?;
        sqlx::query(
            r#"
            INSERT INTO database_descriptions (database_name, table_name, object_type, table_description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (database_name, table_name)
            DO UPDATE SET
                object_type = EXCLUDED.object_type,
                table_description = EXCLUDED.table_description,
                updated_at = now()
            "#,
        )
        .bind(&description.database_name)
        .bind(&description.table_name)
        .bind(description.object_type.as_str())
        .bind(body)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            database = %description.database_name,
            table = %description.table_name,
            object_type = %description.object_type,
            columns = description.columns.len(),
            "Description saved"
        );
        Ok(())
    }

    async fn get_description(
        &self,
        database_name: &str,
        table_name: &str,
    ) -> Result<Option<TableDescription>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT database_name, table_name, object_type, table_description
            FROM database_descriptions
            WHERE database_name = $1 AND table_name = $2
            "#,
        )
        .bind(database_name)
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_description).transpose()
    }

    async fn list_descriptions(
        &self,
        database_name: &str,
    ) -> Result<Vec<TableDescription>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT database_name, table_name, object_type, table_description
            FROM database_descriptions
            WHERE database_name = $1
            ORDER BY table_name
            "#,
        )
        .bind(database_name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_description).collect()
    }

    async fn delete_description(
        &self,
        database_name: &str,
        table_name: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM database_descriptions WHERE database_name = $1 AND table_name = $2",
        )
        .bind(database_name)
        .bind(table_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// In-memory description store.
///
/// [`set_unavailable`](Self::set_unavailable) makes every call fail with
/// [`StoreError::Unavailable`].
#[derive(Debug, Default)]
pub struct InMemoryDescriptionStore {
    rows: RwLock<BTreeMap<(String, String), TableDescription>>,
    unavailable: AtomicBool,
}

impl InMemoryDescriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory description store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn lock_error<E: std::fmt::Display>(e: E) -> StoreError {
        StoreError::Unavailable(format!("description store lock poisoned: {}", e))
    }
}

#[async_trait]
impl DescriptionStore for InMemoryDescriptionStore {
    async fn save_description(&self, description: &TableDescription) -> Result<(), StoreError> {
        self.check()?;
        let mut rows = self.rows.write().map_err(Self::lock_error)?;
        rows.insert(
            (
                description.database_name.clone(),
                description.table_name.clone(),
            ),
            description.clone(),
        );
        Ok(())
    }

    async fn get_description(
        &self,
        database_name: &str,
        table_name: &str,
    ) -> Result<Option<TableDescription>, StoreError> {
        self.check()?;
        let rows = self.rows.read().map_err(Self::lock_error)?;
        Ok(rows
            .get(&(database_name.to_string(), table_name.to_string()))
            .cloned())
    }

    async fn list_descriptions(
        &self,
        database_name: &str,
    ) -> Result<Vec<TableDescription>, StoreError> {
        self.check()?;
        let rows = self.rows.read().map_err(Self::lock_error)?;
        Ok(rows
            .values()
            .filter(|d| d.database_name == database_name)
            .cloned()
            .collect())
    }

    async fn delete_description(
        &self,
        database_name: &str,
        table_name: &str,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut rows = self.rows.write().map_err(Self::lock_error)?;
        Ok(rows
            .remove(&(database_name.to_string(), table_name.to_string()))
            .is_some())
    }
}

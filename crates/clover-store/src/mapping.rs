//! Credential/role mapping store.
//!
//! Rows live in `users_role_bd_mapping`, unique on
//! `(user_id, database_name, schema_name)` and on `role_name`.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use clover_core::{UserIdType, UserKey, UserRoleMapping};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read/write access to user role mappings.
#[async_trait]
pub trait RoleMappingStore: Send + Sync {
    /// All mappings of a user in one database, most recently updated first.
    async fn find_mappings(
        &self,
        user: &UserKey,
        database_name: &str,
    ) -> Result<Vec<UserRoleMapping>, StoreError>;

    /// The mapping that owns `role_name`, if any.
    async fn find_by_role(&self, role_name: &str) -> Result<Option<UserRoleMapping>, StoreError>;

    /// Insert or replace the mapping for
    /// `(user_id, database_name, schema_name)`.
    async fn upsert_mapping(&self, mapping: &UserRoleMapping)
    -> Result<UserRoleMapping, StoreError>;

    /// Delete one mapping, returning it if it existed.
    async fn delete_mapping(
        &self,
        user: &UserKey,
        database_name: &str,
        schema_name: &str,
    ) -> Result<Option<UserRoleMapping>, StoreError>;

    /// All mappings in one database.
    async fn list_mappings(&self, database_name: &str) -> Result<Vec<UserRoleMapping>, StoreError>;
}

const MAPPING_COLUMNS: &str =
    "user_id::text AS user_id, database_name, schema_name, role_name, created_at, updated_at";

/// Postgres-backed mapping store (application database).
#[derive(Debug, Clone)]
pub struct PgRoleMappingStore {
    pool: PgPool,
    user_id_type: UserIdType,
}

impl PgRoleMappingStore {
    pub fn new(pool: PgPool, user_id_type: UserIdType) -> Self {
        Self { pool, user_id_type }
    }

    fn key_for(&self, user_id: &str) -> Result<UserKey, StoreError> {
        clover_core::UserId::new(user_id)
            .coerce(self.user_id_type)
            .ok_or_else(|| StoreError::InvalidUserId(user_id.to_string()))
    }
}

fn bind_key<'q>(
    query: Query<'q, Postgres, PgArguments>,
    key: &'q UserKey,
) -> Query<'q, Postgres, PgArguments> {
    match key {
        UserKey::Text(s) => query.bind(s.as_str()),
        UserKey::Bigint(n) => query.bind(*n),
        UserKey::Uuid(u) => query.bind(*u),
    }
}

fn row_to_mapping(row: &PgRow) -> Result<UserRoleMapping, sqlx::Error> {
    Ok(UserRoleMapping {
        user_id: row.try_get("user_id")?,
        database_name: row.try_get("database_name")?,
        schema_name: row.try_get("schema_name")?,
        role_name: row.try_get("role_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RoleMappingStore for PgRoleMappingStore {
    async fn find_mappings(
        &self,
        user: &UserKey,
        database_name: &str,
    ) -> Result<Vec<UserRoleMapping>, StoreError> {
        let sql = format!(
            "SELECT {} FROM users_role_bd_mapping \
             WHERE user_id = $1 AND database_name = $2 \
             ORDER BY updated_at DESC, schema_name",
            MAPPING_COLUMNS
        );
        let rows = bind_key(sqlx::query(&sql), user)
            .bind(database_name)
            .fetch_all(&self.pool)
            .await?;
        let mappings = rows
            .iter()
            .map(row_to_mapping)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    async fn find_by_role(&self, role_name: &str) -> Result<Option<UserRoleMapping>, StoreError> {
        let sql = format!(
            "SELECT {} FROM users_role_bd_mapping WHERE role_name = $1",
            MAPPING_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(role_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_mapping).transpose()?)
    }

    async fn upsert_mapping(
        &self,
        mapping: &UserRoleMapping,
    ) -> Result<UserRoleMapping, StoreError> {
        let key = self.key_for(&mapping.user_id)?;
        let sql = format!(
            "INSERT INTO users_role_bd_mapping (user_id, database_name, schema_name, role_name) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, database_name, schema_name) \
             DO UPDATE SET role_name = EXCLUDED.role_name, updated_at = now() \
             RETURNING {}",
            MAPPING_COLUMNS
        );
        let row = bind_key(sqlx::query(&sql), &key)
            .bind(&mapping.database_name)
            .bind(&mapping.schema_name)
            .bind(&mapping.role_name)
            .fetch_one(&self.pool)
            .await?;
        let stored = row_to_mapping(&row)?;
        tracing::info!(
            user_id = %stored.user_id,
            database = %stored.database_name,
            schema = %stored.schema_name,
            role = %stored.role_name,
            "Role mapping saved"
        );
        Ok(stored)
    }

    async fn delete_mapping(
        &self,
        user: &UserKey,
        database_name: &str,
        schema_name: &str,
    ) -> Result<Option<UserRoleMapping>, StoreError> {
        let sql = format!(
            "DELETE FROM users_role_bd_mapping \
             WHERE user_id = $1 AND database_name = $2 AND schema_name = $3 \
             RETURNING {}",
            MAPPING_COLUMNS
        );
        let row = bind_key(sqlx::query(&sql), user)
            .bind(database_name)
            .bind(schema_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_mapping).transpose()?)
    }

    async fn list_mappings(&self, database_name: &str) -> Result<Vec<UserRoleMapping>, StoreError> {
        let sql = format!(
            "SELECT {} FROM users_role_bd_mapping WHERE database_name = $1 \
             ORDER BY user_id, schema_name",
            MAPPING_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(database_name)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(row_to_mapping)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

/// In-memory mapping store with the same uniqueness rules as the table.
///
/// [`set_unavailable`](Self::set_unavailable) makes every call fail with
/// [`StoreError::Unavailable`].
#[derive(Debug, Default)]
pub struct InMemoryRoleMappingStore {
    rows: RwLock<Vec<UserRoleMapping>>,
    unavailable: AtomicBool,
}

impl InMemoryRoleMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with mappings.
    pub fn with_mappings(mappings: impl IntoIterator<Item = UserRoleMapping>) -> Self {
        Self {
            rows: RwLock::new(mappings.into_iter().collect()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory mapping store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn lock_error<E: std::fmt::Display>(e: E) -> StoreError {
        StoreError::Unavailable(format!("mapping store lock poisoned: {}", e))
    }
}

#[async_trait]
impl RoleMappingStore for InMemoryRoleMappingStore {
    async fn find_mappings(
        &self,
        user: &UserKey,
        database_name: &str,
    ) -> Result<Vec<UserRoleMapping>, StoreError> {
        self.check()?;
        let user = user.to_string();
        let rows = self.rows.read().map_err(Self::lock_error)?;
        let mut found: Vec<UserRoleMapping> = rows
            .iter()
            .filter(|m| m.user_id == user && m.database_name == database_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.schema_name.cmp(&b.schema_name))
        });
        Ok(found)
    }

    async fn find_by_role(&self, role_name: &str) -> Result<Option<UserRoleMapping>, StoreError> {
        self.check()?;
        let rows = self.rows.read().map_err(Self::lock_error)?;
        Ok(rows.iter().find(|m| m.role_name == role_name).cloned())
    }

    async fn upsert_mapping(
        &self,
        mapping: &UserRoleMapping,
    ) -> Result<UserRoleMapping, StoreError> {
        self.check()?;
        let mut rows = self.rows.write().map_err(Self::lock_error)?;
        let same_key = |m: &UserRoleMapping| {
            m.user_id == mapping.user_id
                && m.database_name == mapping.database_name
                && m.schema_name == mapping.schema_name
        };

        if rows
            .iter()
            .any(|m| m.role_name == mapping.role_name && !same_key(m))
        {
            return Err(StoreError::Conflict(format!(
                "role_name '{}' is already mapped",
                mapping.role_name
            )));
        }

        let now = Utc::now();
        if let Some(existing) = rows.iter_mut().find(|m| same_key(m)) {
            existing.role_name = mapping.role_name.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let mut stored = mapping.clone();
        stored.created_at = now;
        stored.updated_at = now;
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn delete_mapping(
        &self,
        user: &UserKey,
        database_name: &str,
        schema_name: &str,
    ) -> Result<Option<UserRoleMapping>, StoreError> {
        self.check()?;
        let user = user.to_string();
        let mut rows = self.rows.write().map_err(Self::lock_error)?;
        let position = rows.iter().position(|m| {
            m.user_id == user && m.database_name == database_name && m.schema_name == schema_name
        });
        Ok(position.map(|i| rows.remove(i)))
    }

    async fn list_mappings(&self, database_name: &str) -> Result<Vec<UserRoleMapping>, StoreError> {
        self.check()?;
        let rows = self.rows.read().map_err(Self::lock_error)?;
        Ok(rows
            .iter()
            .filter(|m| m.database_name == database_name)
            .cloned()
            .collect())
    }
}

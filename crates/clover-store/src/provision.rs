//! Role provisioning: creates one database role per (user, schema), grants it
//! read access and records the mapping.

use crate::error::StoreError;
use crate::mapping::RoleMappingStore;
use clover_core::{
    MappingConfig, SearchPath, UserId, UserIdType, UserKey, UserRoleMapping, quote_ident,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Postgres limit on identifier length in bytes.
const MAX_ROLE_NAME_LEN: usize = 63;

/// Validate an identifier supplied by an operator. Only ASCII letters,
/// digits and `_` are accepted.
pub fn checked_ident(ident: &str) -> Result<String, StoreError> {
    if ident.is_empty()
        || ident.len() > MAX_ROLE_NAME_LEN
        || !ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(StoreError::InvalidIdentifier(ident.to_string()));
    }
    Ok(quote_ident(ident))
}

/// Deterministic role name for a user and schema.
///
/// A readable part, `<prefix>_<user>_<schema>` lower-cased with every other
/// character replaced by `_`, followed by `_` and a 64-bit hash of the
/// unmodified parts. The readable part is cut so the whole name fits in 63
/// bytes. `_` is also the separator, so the hash alone distinguishes inputs
/// such as `("a_b", "c")` and `("a", "b_c")`.
pub fn role_name_for(prefix: &str, user_id: &str, schema: &str) -> String {
    let readable: String = format!("{}_{}_{}", prefix, user_id, schema)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    let suffix = format!("_{:016x}", fnv1a(&[prefix, user_id, schema]));
    let keep = MAX_ROLE_NAME_LEN - suffix.len();
    let mut name: String = readable.chars().take(keep).collect();
    name.push_str(&suffix);
    name
}

/// FNV-1a over the parts, each terminated by a 0x1f separator byte.
///
/// Role names are recomputed from this value on every grant and revoke, so
/// it must stay stable across releases: any change orphans existing roles.
fn fnv1a(parts: &[&str]) -> u64 {
    const PRIME: u64 = 0x0100_0000_01b3;
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for byte in part.bytes().chain(std::iter::once(0x1f)) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

/// Fail unless `owner`, the mapping currently holding a role name, is absent
/// or is the mapping of `key` in `database_name`/`schema` itself.
pub fn check_role_owner(
    owner: Option<&UserRoleMapping>,
    key: &UserKey,
    user_id_type: UserIdType,
    database_name: &str,
    schema: &str,
) -> Result<(), StoreError> {
    let Some(owner) = owner else {
        return Ok(());
    };
    let same_user = UserId::new(owner.user_id.as_str()).coerce(user_id_type).as_ref() == Some(key);
    if same_user && owner.database_name == database_name && owner.schema_name == schema {
        return Ok(());
    }
    Err(StoreError::Conflict(format!(
        "role '{}' already belongs to user '{}' in {}.{}",
        owner.role_name, owner.user_id, owner.database_name, owner.schema_name
    )))
}

/// Statements that create (if needed) and grant a role read access to
/// `tables` in `schema`, replacing any previous table grants. An empty table
/// list grants every table in the schema.
pub fn grant_statements(
    role_name: &str,
    schema: &str,
    tables: &[String],
    default_schema: &str,
) -> Result<Vec<String>, StoreError> {
    let role = quote_ident(role_name);
    let schema_ident = checked_ident(schema)?;
    let search_path = SearchPath::for_schema(Some(schema), default_schema);

    let mut statements = vec![
        format!("GRANT {} TO CURRENT_USER", role),
        format!("GRANT USAGE ON SCHEMA {} TO {}", schema_ident, role),
        format!(
            "REVOKE ALL ON ALL TABLES IN SCHEMA {} FROM {}",
            schema_ident, role
        ),
    ];
    if tables.is_empty() {
        statements.push(format!(
            "GRANT SELECT ON ALL TABLES IN SCHEMA {} TO {}",
            schema_ident, role
        ));
    } else {
        for table in tables {
            statements.push(format!(
                "GRANT SELECT ON {}.{} TO {}",
                schema_ident,
                checked_ident(table)?,
                role
            ));
        }
    }
    statements.push(format!(
        "ALTER ROLE {} SET search_path TO {}",
        role,
        search_path.to_sql()
    ));
    Ok(statements)
}

/// Statements that strip a role's privileges in `schema` and drop it.
pub fn revoke_statements(role_name: &str, schema: &str) -> Result<Vec<String>, StoreError> {
    let role = quote_ident(role_name);
    let schema_ident = checked_ident(schema)?;
    Ok(vec![
        format!(
            "REVOKE ALL ON ALL TABLES IN SCHEMA {} FROM {}",
            schema_ident, role
        ),
        format!("REVOKE USAGE ON SCHEMA {} FROM {}", schema_ident, role),
        format!("DROP ROLE IF EXISTS {}", role),
    ])
}

/// Creates, updates and removes per-user roles in the data database and keeps
/// the mapping store in step.
pub struct RoleProvisioner {
    /// Data database pool, connected as an account allowed to create roles.
    pool: PgPool,
    mappings: Arc<dyn RoleMappingStore>,
    database_name: String,
    config: MappingConfig,
}

impl RoleProvisioner {
    pub fn new(
        pool: PgPool,
        mappings: Arc<dyn RoleMappingStore>,
        database_name: impl Into<String>,
        config: MappingConfig,
    ) -> Self {
        Self {
            pool,
            mappings,
            database_name: database_name.into(),
            config,
        }
    }

    /// Grant `user_id` read access to `tables` in `schema` (all tables when
    /// empty). Re-granting replaces the previous table set.
    ///
    /// The mapping row is written before any privilege changes, so a role
    /// name owned by another mapping is rejected before it gains grants. If
    /// the grants fail the mapping is put back as it was.
    pub async fn grant(
        &self,
        user_id: &UserId,
        schema: &str,
        tables: &[String],
    ) -> Result<UserRoleMapping, StoreError> {
        let key = user_id
            .coerce(self.config.user_id_type)
            .ok_or_else(|| StoreError::InvalidUserId(user_id.to_string()))?;
        let role_name = role_name_for(&self.config.role_prefix, user_id.as_str(), schema);
        let statements =
            grant_statements(&role_name, schema, tables, &self.config.default_schema)?;

        let owner = self.mappings.find_by_role(&role_name).await?;
        check_role_owner(
            owner.as_ref(),
            &key,
            self.config.user_id_type,
            &self.database_name,
            schema,
        )?;

        let previous = self
            .mappings
            .find_mappings(&key, &self.database_name)
            .await?
            .into_iter()
            .find(|m| m.schema_name == schema);
        let mapping = self
            .mappings
            .upsert_mapping(&UserRoleMapping::new(
                user_id.as_str(),
                &self.database_name,
                schema,
                &role_name,
            ))
            .await?;

        if let Err(e) = self.apply_grants(&role_name, &statements).await {
            self.restore_mapping(&key, schema, previous).await;
            return Err(e);
        }

        tracing::info!(
            user_id = %user_id,
            schema = %schema,
            role = %role_name,
            tables = tables.len(),
            "Access granted"
        );
        Ok(mapping)
    }

    async fn apply_grants(&self, role_name: &str, statements: &[String]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_roles WHERE rolname = $1")
            .bind(role_name)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            sqlx::raw_sql(&format!("CREATE ROLE {} NOLOGIN", quote_ident(role_name)))
                .execute(&mut *tx)
                .await?;
            tracing::info!(role = %role_name, "Role created");
        }
        for statement in statements {
            sqlx::raw_sql(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Undo the mapping write of a failed grant.
    async fn restore_mapping(&self, key: &UserKey, schema: &str, previous: Option<UserRoleMapping>) {
        let restored = match previous {
            Some(previous) => self.mappings.upsert_mapping(&previous).await.map(|_| ()),
            None => self
                .mappings
                .delete_mapping(key, &self.database_name, schema)
                .await
                .map(|_| ()),
        };
        if let Err(e) = restored {
            tracing::error!(
                user = %key,
                schema = %schema,
                error = %e,
                "Failed to restore role mapping after a failed grant"
            );
        }
    }

    /// Revoke everything `user_id` was granted in `schema`, drop the role and
    /// delete the mapping. Returns `false` when no mapping existed.
    pub async fn revoke(&self, user_id: &UserId, schema: &str) -> Result<bool, StoreError> {
        let key = user_id
            .coerce(self.config.user_id_type)
            .ok_or_else(|| StoreError::InvalidUserId(user_id.to_string()))?;

        let mapping = self
            .mappings
            .find_mappings(&key, &self.database_name)
            .await?
            .into_iter()
            .find(|m| m.schema_name == schema);
        let Some(mapping) = mapping else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        for statement in revoke_statements(&mapping.role_name, schema)? {
            sqlx::raw_sql(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        self.mappings
            .delete_mapping(&key, &self.database_name, schema)
            .await?;

        tracing::info!(
            user_id = %user_id,
            schema = %schema,
            role = %mapping.role_name,
            "Access revoked"
        );
        Ok(true)
    }
}

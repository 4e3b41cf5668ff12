//! Schema resolution: which role and schema a user queries under.

use crate::error::ExecutionError;
use clover_core::{MappingConfig, SearchPath, UserId, UserRoleMapping};
use clover_store::RoleMappingStore;
use std::sync::Arc;

/// Resolves users to role mappings and search paths in one data database.
#[derive(Clone)]
pub struct SchemaResolver {
    mappings: Arc<dyn RoleMappingStore>,
    database_name: String,
    config: MappingConfig,
}

impl SchemaResolver {
    pub fn new(
        mappings: Arc<dyn RoleMappingStore>,
        database_name: impl Into<String>,
        config: MappingConfig,
    ) -> Self {
        Self {
            mappings,
            database_name: database_name.into(),
            config,
        }
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn default_schema(&self) -> &str {
        &self.config.default_schema
    }

    /// The mapping a user's queries run under, if any.
    ///
    /// A user id that cannot be coerced to the store's key type has no
    /// mapping. When a user holds several mappings the most recently updated
    /// one outside the default schema wins.
    pub async fn lookup_mapping(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserRoleMapping>, ExecutionError> {
        let Some(key) = user_id.coerce(self.config.user_id_type) else {
            tracing::debug!(
                user_id = %user_id,
                user_id_type = ?self.config.user_id_type,
                "User id not representable as mapping key"
            );
            return Ok(None);
        };

        let mappings = self
            .mappings
            .find_mappings(&key, &self.database_name)
            .await?;
        Ok(preferred_mapping(mappings, &self.config.default_schema))
    }

    /// Schema the user is mapped to, or `None` when unmapped.
    pub async fn resolve_schema(&self, user_id: &UserId) -> Result<Option<String>, ExecutionError> {
        let schema = self.lookup_mapping(user_id).await?.map(|m| m.schema_name);
        tracing::debug!(user_id = %user_id, schema = ?schema, "Schema resolved");
        Ok(schema)
    }

    /// Effective search path for a user.
    pub async fn search_path(&self, user_id: &UserId) -> Result<SearchPath, ExecutionError> {
        let schema = self.resolve_schema(user_id).await?;
        Ok(SearchPath::for_schema(
            schema.as_deref(),
            &self.config.default_schema,
        ))
    }

    /// Search path implied by an already looked-up mapping.
    pub fn search_path_for(&self, mapping: Option<&UserRoleMapping>) -> SearchPath {
        SearchPath::for_schema(
            mapping.map(|m| m.schema_name.as_str()),
            &self.config.default_schema,
        )
    }
}

/// Pick the mapping to use from mappings ordered most recently updated first.
fn preferred_mapping(
    mappings: Vec<UserRoleMapping>,
    default_schema: &str,
) -> Option<UserRoleMapping> {
    let mut fallback = None;
    for mapping in mappings {
        if mapping.schema_name != default_schema {
            return Some(mapping);
        }
        if fallback.is_none() {
            fallback = Some(mapping);
        }
    }
    fallback
}

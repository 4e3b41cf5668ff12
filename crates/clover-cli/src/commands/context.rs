//! Configuration loading and component wiring shared by the commands.

use anyhow::{Context as _, Result};
use clover_audit::AccessLogger;
use clover_core::CloverConfig;
use clover_executor::{
    LegacyColumnFile, PgSessionProvider, RoleScopedExecutor, SchemaResolver, SchemaService,
};
use clover_sql::SqlValidator;
use clover_store::{
    DescriptionStore, InMemoryDescriptionStore, PgCatalog, PgDescriptionStore,
    PgQueryHistoryStore, PgRoleMappingStore, RoleMappingStore, connect_app_pool,
    connect_data_pool,
};
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_CONFIG_FILE: &str = "clover.yaml";

/// Loaded configuration. Pools are opened per command, only for the
/// databases that command needs.
pub struct Context {
    pub config: CloverConfig,
}

impl Context {
    /// Load the configuration from `path`, or from `clover.yaml` when it
    /// exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => CloverConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                CloverConfig::from_file(DEFAULT_CONFIG_FILE)
                    .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG_FILE))?
            }
            None => CloverConfig::default(),
        };
        Ok(Self { config })
    }

    /// Name of the data database, the context for mappings and descriptions.
    pub fn database_name(&self) -> String {
        self.config.data_database.database_name()
    }

    pub async fn app_pool(&self) -> Result<PgPool> {
        connect_app_pool(&self.config.app_database)
            .await
            .context("Failed to connect to the application database")
    }

    pub async fn data_pool(&self) -> Result<PgPool> {
        connect_data_pool(&self.config.data_database)
            .await
            .context("Failed to connect to the data database")
    }

    pub fn access_logger(&self) -> Result<AccessLogger> {
        AccessLogger::new(&self.config.access_log).context("Failed to start the access logger")
    }

    pub fn mapping_store(&self, app_pool: PgPool) -> Arc<dyn RoleMappingStore> {
        Arc::new(PgRoleMappingStore::new(
            app_pool,
            self.config.mapping.user_id_type,
        ))
    }

    pub fn resolver(&self, app_pool: PgPool) -> SchemaResolver {
        SchemaResolver::new(
            self.mapping_store(app_pool),
            self.database_name(),
            self.config.mapping.clone(),
        )
    }

    pub async fn executor(&self, access_log: AccessLogger) -> Result<RoleScopedExecutor> {
        let app_pool = self.app_pool().await?;
        let data_pool = self.data_pool().await?;
        let executor = RoleScopedExecutor::new(
            self.resolver(app_pool.clone()),
            Arc::new(PgSessionProvider::new(data_pool)),
            SqlValidator::new(&self.config.validator),
            access_log,
            self.config.executor.clone(),
        );
        if self.config.executor.record_history {
            return Ok(executor.with_history(Arc::new(PgQueryHistoryStore::new(app_pool))));
        }
        Ok(executor)
    }

    /// Schema service over the data database catalog. An unreachable
    /// application database only costs the stored descriptions.
    pub async fn schema_service(&self, access_log: AccessLogger) -> Result<SchemaService> {
        let data_pool = self.data_pool().await?;
        let descriptions: Arc<dyn DescriptionStore> = match self.app_pool().await {
            Ok(pool) => Arc::new(PgDescriptionStore::new(pool)),
            Err(e) => {
                tracing::warn!(error = %e, "Application database unreachable, descriptions disabled");
                let store = InMemoryDescriptionStore::new();
                store.set_unavailable(true);
                Arc::new(store)
            }
        };

        let mut service = SchemaService::new(
            Arc::new(PgCatalog::new(data_pool)),
            descriptions,
            self.database_name(),
            self.config.schema.clone(),
            access_log,
        );
        if let Some(path) = &self.config.schema.legacy_descriptions_file {
            service = service.with_legacy(LegacyColumnFile::load(path)?);
        }
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "data_database:\n  database_url: postgres://reader@db:5432/cloverdash\nmapping:\n  user_id_type: bigint"
        )
        .unwrap();

        let ctx = Context::load(Some(file.path())).unwrap();
        assert_eq!(ctx.database_name(), "cloverdash");
        assert_eq!(
            ctx.config.mapping.user_id_type,
            clover_core::UserIdType::Bigint
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Context::load(Some(Path::new("/nonexistent/clover.yaml"))).is_err());
    }
}

//! Configuration types for Clover.
//!
//! A single [`CloverConfig`] is loaded once at process start (YAML) and passed
//! by reference into the resolver, validator, executor and schema service.
//! Nothing in the query path reads ambient globals.
//!
//! # Example
//!
//! ```yaml
//! app_database:
//!   database_url_env: CLOVER_APP_DATABASE_URL
//! data_database:
//!   host: db.internal
//!   database: cloverdash
//!   username: clover_service
//!   password_env: CLOVER_DATA_PASSWORD
//! mapping:
//!   user_id_type: bigint
//! validator:
//!   max_length: 8000
//! executor:
//!   statement_timeout_ms: 15000
//! schema:
//!   legacy_descriptions_file: column_descriptions.json
//! ```

pub mod access_log;
pub mod database;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use access_log::{AccessLogConfig, StorageBackend};
pub use database::{ConnectionPoolConfig, DatabaseConfig, SslMode};
pub use validator::ValidatorConfig;

/// Default environment variable for the application database URL.
pub const APP_DATABASE_URL_ENV: &str = "CLOVER_APP_DATABASE_URL";

/// Default environment variable for the data database URL.
pub const DATA_DATABASE_URL_ENV: &str = "CLOVER_DATA_DATABASE_URL";

/// Complete Clover configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloverConfig {
    /// Application database (role mappings, table descriptions).
    #[serde(default = "default_app_database")]
    pub app_database: DatabaseConfig,

    /// Data database (tenant business data, queried under per-user roles).
    #[serde(default = "default_data_database")]
    pub data_database: DatabaseConfig,

    /// Role mapping lookup settings.
    #[serde(default)]
    pub mapping: MappingConfig,

    /// SQL validator policy.
    #[serde(default)]
    pub validator: ValidatorConfig,

    /// Role-scoped executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Schema enrichment settings.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Access logging.
    #[serde(default)]
    pub access_log: AccessLogConfig,

    /// Process logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CloverConfig {
    fn default() -> Self {
        Self {
            app_database: default_app_database(),
            data_database: default_data_database(),
            mapping: MappingConfig::default(),
            validator: ValidatorConfig::default(),
            executor: ExecutorConfig::default(),
            schema: SchemaConfig::default(),
            access_log: AccessLogConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Primitive type of the `user_id` column in the mapping store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserIdType {
    /// `TEXT` / `VARCHAR`.
    #[default]
    Text,
    /// `BIGINT` (e.g. chat platform numeric ids).
    Bigint,
    /// `UUID`.
    Uuid,
}

/// Role mapping lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Type the mapping store uses for `user_id`; inbound ids are coerced to it.
    #[serde(default)]
    pub user_id_type: UserIdType,

    /// Schema every search path falls back to.
    #[serde(default = "default_schema_name")]
    pub default_schema: String,

    /// Prefix for provisioned role names.
    #[serde(default = "default_role_prefix")]
    pub role_prefix: String,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            user_id_type: UserIdType::default(),
            default_schema: default_schema_name(),
            role_prefix: default_role_prefix(),
        }
    }
}

/// Role-scoped executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Bound on checking a session out of the data pool.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Bound on a single statement (applied client-side and as
    /// `statement_timeout` on the session).
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,

    /// Run every query inside `BEGIN TRANSACTION READ ONLY`.
    #[serde(default = "default_true")]
    pub read_only_transaction: bool,

    /// Record every execution in the application database's query history.
    #[serde(default = "default_true")]
    pub record_history: bool,
}

impl ExecutorConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout_ms(),
            statement_timeout_ms: default_statement_timeout_ms(),
            read_only_transaction: true,
            record_history: true,
        }
    }
}

/// Schema enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Catalog schemas to introspect, in precedence order.
    #[serde(default = "default_catalog_schemas")]
    pub catalog_schemas: Vec<String>,

    /// Whether views are included alongside base tables.
    #[serde(default = "default_true")]
    pub include_views: bool,

    /// Legacy column description file (JSON object keyed by column name).
    #[serde(default)]
    pub legacy_descriptions_file: Option<PathBuf>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            catalog_schemas: default_catalog_schemas(),
            include_views: true,
            legacy_descriptions_file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Process logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_app_database() -> DatabaseConfig {
    DatabaseConfig::from_env_var(APP_DATABASE_URL_ENV)
}

fn default_data_database() -> DatabaseConfig {
    DatabaseConfig::from_env_var(DATA_DATABASE_URL_ENV)
}

fn default_schema_name() -> String {
    "public".to_string()
}

fn default_role_prefix() -> String {
    "clv".to_string()
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

fn default_catalog_schemas() -> Vec<String> {
    vec!["public".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CloverConfig {
    /// Load configuration from a YAML file.
    ///
    /// A relative `schema.legacy_descriptions_file` is resolved against the
    /// directory containing the config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        if let Some(legacy) = &config.schema.legacy_descriptions_file
            && legacy.is_relative()
        {
            config.schema.legacy_descriptions_file = Some(base_dir.join(legacy));
        }

        Ok(config)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the query path unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validator.max_length == 0 {
            return Err(ConfigError::Config(
                "validator.max_length must be greater than zero".to_string(),
            ));
        }
        if self.validator.allowed_leading_keywords.is_empty() {
            return Err(ConfigError::Config(
                "validator.allowed_leading_keywords must not be empty".to_string(),
            ));
        }
        if self.executor.statement_timeout_ms == 0 || self.executor.acquire_timeout_ms == 0 {
            return Err(ConfigError::Config(
                "executor timeouts must be greater than zero".to_string(),
            ));
        }
        if self.schema.catalog_schemas.is_empty() {
            return Err(ConfigError::Config(
                "schema.catalog_schemas must list at least one schema".to_string(),
            ));
        }
        Ok(())
    }
}

//! Shared types for Clover: configuration, user identity, role mappings,
//! table descriptions and query results.

// Configuration types shared across all Clover crates
pub mod config;

pub mod description;
pub mod identity;
pub mod result;

// Re-export commonly used types for convenience
pub use config::{
    AccessLogConfig, CloverConfig, ConfigError, ConnectionPoolConfig, DatabaseConfig,
    ExecutorConfig, LogFormat, LoggingConfig, MappingConfig, SchemaConfig, SslMode,
    StorageBackend, UserIdType, ValidatorConfig,
};
pub use description::{ColumnDescription, ObjectType, TableDescription};
pub use identity::{SearchPath, UserId, UserKey, UserRoleMapping, quote_ident};
pub use result::{ErrorKind, QueryResult};

//! # clover-store
//!
//! Postgres persistence for Clover.
//!
//! - [`RoleMappingStore`]: user → (database role, schema) mappings
//! - [`DescriptionStore`]: human-authored table and column descriptions
//! - [`CatalogIntrospector`]: structural schema of the data database
//! - [`RoleProvisioner`]: creates and drops per-user roles
//! - [`QueryHistoryStore`]: per-user log of executed queries
//! - [`validate_schema_access()`]: what a user's roles can actually read
//! - [`migrate()`]: application database tables
//!
//! Mappings and descriptions live in the application database. Catalog
//! introspection and role provisioning talk to the data database. The two are
//! configured and connected independently.

pub mod access_check;
pub mod catalog;
pub mod descriptions;
pub mod error;
pub mod history;
pub mod mapping;
pub mod migrate;
pub mod pool;
pub mod provision;

pub use access_check::{SchemaAccessDetail, SchemaAccessReport, validate_schema_access};
pub use catalog::{
    CatalogColumn, CatalogIntrospector, CatalogTable, PgCatalog, ReadableTable, StaticCatalog,
};
pub use descriptions::{DescriptionStore, InMemoryDescriptionStore, PgDescriptionStore};
pub use error::StoreError;
pub use history::{
    DEFAULT_HISTORY_LIMIT, InMemoryQueryHistoryStore, PgQueryHistoryStore, QueryHistoryEntry,
    QueryHistoryStore,
};
pub use mapping::{InMemoryRoleMappingStore, PgRoleMappingStore, RoleMappingStore};
pub use migrate::{migrate, migration_statements};
pub use pool::{SESSION_RESET_SQL, connect_app_pool, connect_data_pool, reset_session};
pub use provision::{RoleProvisioner, role_name_for};

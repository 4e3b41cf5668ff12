//! # clover-executor
//!
//! Role-scoped query execution for Clover.
//!
//! - [`SchemaResolver`]: user → role mapping and search path
//! - [`RoleScopedExecutor`]: runs a validated SELECT under the user's role
//! - [`SchemaService`]: catalog schema enriched with stored and legacy
//!   descriptions
//!
//! ## Session hygiene
//!
//! Data database connections are pooled and reused. Each query runs in its
//! own transaction with `SET LOCAL ROLE`, `SET LOCAL search_path` and
//! `SET LOCAL statement_timeout`. On release the session rolls back and
//! resets role and search path; the pool resets again when the connection is
//! checked back in and closes it if that fails. A session that timed out or
//! was dropped without release is closed instead of reused.

pub mod decode;
pub mod enrichment;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod session;

#[cfg(test)]
mod testing;

pub use enrichment::{
    ColumnSchema, DescriptionProvider, LegacyColumnFile, SchemaMap, SchemaService,
    StoredDescriptions, TableSchema, merge_schema,
};
pub use error::{ExecutionError, Phase, classify_sqlstate};
pub use executor::{ExecutionState, RoleScopedExecutor};
pub use resolver::SchemaResolver;
pub use session::{DataSession, PgSession, PgSessionProvider, RowSet, SessionProvider};

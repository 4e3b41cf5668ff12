//! CLI command implementations for Clover.

pub mod access;
pub mod context;
pub mod describe;
pub mod history;
pub mod query;
pub mod roles;
pub mod schema;

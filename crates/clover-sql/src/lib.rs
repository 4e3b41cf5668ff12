//! # clover-sql
//!
//! Static inspection of generated SQL for Clover.
//!
//! This crate provides:
//! - [`SqlValidator`]: the read-only, single-statement policy applied to
//!   every statement before it reaches the data database
//! - [`SqlAnalyzer`]: table extraction used to attribute access log entries
//!
//! ## Policy
//!
//! | Rule | Rejects |
//! |------|---------|
//! | single statement | `SELECT 1; DROP TABLE t` |
//! | leading keyword | `DELETE FROM t` |
//! | denied keyword | `SELECT ... (DELETE ... RETURNING ...)` |
//! | length | statements above `validator.max_length` |
//! | denied function | `SELECT pg_read_file('/etc/passwd')` |
//!
//! The validator is defense in depth. The database role a query runs under
//! has no write privileges either way.

pub mod error;
pub mod parser;
pub mod validator;

pub use error::SqlError;
pub use parser::{SqlAnalyzer, TableReference};
pub use validator::{Rejection, RuleViolation, SqlValidator, ValidatedQuery};

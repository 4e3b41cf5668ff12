//! # clover-audit
//!
//! Schema/table access logging for Clover.
//!
//! This crate provides functionality for:
//! - Recording every schema/table access attempt with its outcome
//! - Buffering entries off the caller's critical path
//! - Storing entries in memory, JSON Lines files or on the console
//! - Per-user access statistics and a daily summary report
//!
//! ## Entry Format
//!
//! Entries follow the format: `[user - schema.table - TYPE - OUTCOME]`
//!
//! - **File output**: JSON Lines (one JSON object per line)
//! - **Console output**: Human-readable log lines
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use clover_audit::{AccessLogger, AccessType};
//! use clover_core::AccessLogConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let logger = AccessLogger::new(&AccessLogConfig::default())?;
//!
//! logger.log_access("u1", "demo1", "sales", AccessType::Query, true);
//! logger.flush().await;
//!
//! let stats = logger.user_stats("u1", None).await?;
//! println!("{} accesses over {} schemas", stats.total_accesses, stats.distinct_schemas());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event;
pub mod logger;
pub mod stats;
pub mod storage;

pub use error::AccessLogError;
pub use event::{AccessLogEntry, AccessLogEntryBuilder, AccessType, UNKNOWN_TABLE};
pub use logger::{AccessFilter, AccessLogger};
pub use stats::{DailyReport, SchemaAccessStats, UserAccessStats};
pub use storage::{
    AccessLogStorage, ConsoleStorage, FileStorage, MemoryStorage, NullStorage, create_storage,
};

//! Access logger implementation.
//!
//! [`AccessLogger::log_access`] never blocks and never fails: entries go into
//! a bounded channel drained by a background writer task. When the channel is
//! full the entry is dropped and counted.

use chrono::{DateTime, NaiveDate, Utc};
use clover_core::AccessLogConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

use crate::error::AccessLogError;
use crate::event::{AccessLogEntry, AccessType};
use crate::stats::{DailyReport, UserAccessStats};
use crate::storage::{AccessLogStorage, NullStorage, create_storage};

enum Command {
    Entry(AccessLogEntry),
    Flush(oneshot::Sender<()>),
}

/// The access logger. Cheap to clone; clones share the writer task.
#[derive(Clone)]
pub struct AccessLogger {
    sender: Option<mpsc::Sender<Command>>,
    storage: Arc<dyn AccessLogStorage>,
    dropped: Arc<AtomicU64>,
}

impl AccessLogger {
    /// Create a logger from configuration. Must be called from within a Tokio
    /// runtime.
    pub fn new(config: &AccessLogConfig) -> Result<Self, AccessLogError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let storage = create_storage(config)?;
        Self::spawn(storage, config.buffer_size)
    }

    /// Create a logger with a custom storage backend.
    pub fn with_storage(
        storage: Arc<dyn AccessLogStorage>,
        buffer_size: usize,
    ) -> Result<Self, AccessLogError> {
        Self::spawn(storage, buffer_size)
    }

    /// Create a disabled (no-op) logger.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            storage: Arc::new(NullStorage),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn spawn(
        storage: Arc<dyn AccessLogStorage>,
        buffer_size: usize,
    ) -> Result<Self, AccessLogError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            AccessLogError::InitializationFailed(format!("no Tokio runtime: {}", e))
        })?;
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        handle.spawn(run_writer(receiver, storage.clone()));

        Ok(Self {
            sender: Some(sender),
            storage,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Check if logging is enabled.
    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Record one access attempt.
    pub fn log_access(
        &self,
        user_id: &str,
        schema_name: &str,
        table_name: &str,
        access_type: AccessType,
        success: bool,
    ) {
        self.log(AccessLogEntry::new(
            user_id,
            schema_name,
            table_name,
            access_type,
            success,
        ));
    }

    /// Record a prepared entry.
    pub fn log(&self, entry: AccessLogEntry) {
        let Some(sender) = &self.sender else {
            return;
        };

        tracing::debug!(
            entry_id = %entry.entry_id,
            user_id = %entry.user_id,
            schema = %entry.schema_name,
            table = %entry.table_name,
            access_type = %entry.access_type,
            success = entry.success,
            "Access"
        );

        if let Err(e) = sender.try_send(Command::Entry(entry)) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!(dropped, "Access log buffer full, entry dropped")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::warn!(dropped, "Access log writer stopped, entry dropped")
                }
            }
        }
    }

    /// Number of entries dropped because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every entry logged before this call has been stored.
    pub async fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if sender.send(Command::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Query stored entries.
    pub async fn query(&self, filter: AccessFilter) -> Result<Vec<AccessLogEntry>, AccessLogError> {
        self.storage.query(filter).await
    }

    /// Access statistics for one user, optionally limited to entries since a
    /// point in time.
    pub async fn user_stats(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<UserAccessStats, AccessLogError> {
        let entries = self
            .query(AccessFilter {
                user_id: Some(user_id.to_string()),
                since,
                ..Default::default()
            })
            .await?;
        Ok(UserAccessStats::from_entries(user_id, &entries))
    }

    /// Summary of one UTC day.
    pub async fn daily_report(&self, date: NaiveDate) -> Result<DailyReport, AccessLogError> {
        let start = date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        let end = date
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());
        let entries = self
            .query(AccessFilter {
                since: start,
                until: end,
                ..Default::default()
            })
            .await?;
        let report = DailyReport::from_entries(date, &entries);

        tracing::info!(
            date = %report.date,
            unique_users = report.unique_users,
            total_accesses = report.total_accesses,
            total_failures = report.total_failures,
            success_rate = report.success_rate,
            "Daily access report"
        );
        Ok(report)
    }
}

async fn run_writer(mut receiver: mpsc::Receiver<Command>, storage: Arc<dyn AccessLogStorage>) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Entry(entry) => {
                if let Err(e) = storage.store(entry).await {
                    tracing::warn!(error = %e, "Failed to store access log entry");
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

/// Filter for querying access log entries.
#[derive(Debug, Clone, Default)]
pub struct AccessFilter {
    /// Filter by user ID.
    pub user_id: Option<String>,
    /// Filter by schema.
    pub schema_name: Option<String>,
    /// Filter by outcome.
    pub success: Option<bool>,
    /// Entries at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Entries strictly before this time.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl AccessFilter {
    /// Whether an entry passes every set criterion (`limit` excluded).
    pub fn matches(&self, entry: &AccessLogEntry) -> bool {
        if let Some(user) = &self.user_id
            && &entry.user_id != user
        {
            return false;
        }
        if let Some(schema) = &self.schema_name
            && &entry.schema_name != schema
        {
            return false;
        }
        if let Some(success) = self.success
            && entry.success != success
        {
            return false;
        }
        if let Some(since) = self.since
            && entry.occurred_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && entry.occurred_at >= until
        {
            return false;
        }
        true
    }
}

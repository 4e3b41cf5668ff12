//! Access log storage backends.

use crate::error::AccessLogError;
use crate::event::AccessLogEntry;
use crate::logger::AccessFilter;
use async_trait::async_trait;
use clover_core::config::{AccessLogConfig, StorageBackend};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Trait for access log storage backends.
#[async_trait]
pub trait AccessLogStorage: Send + Sync {
    /// Store an entry.
    async fn store(&self, entry: AccessLogEntry) -> Result<(), AccessLogError>;

    /// Query entries with filters, oldest first.
    async fn query(&self, filter: AccessFilter) -> Result<Vec<AccessLogEntry>, AccessLogError>;
}

/// Create a storage backend based on configuration.
pub fn create_storage(config: &AccessLogConfig) -> Result<Arc<dyn AccessLogStorage>, AccessLogError> {
    if !config.enabled {
        return Ok(Arc::new(NullStorage));
    }
    match config.storage {
        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageBackend::File => {
            let path = config.file_path.as_deref().unwrap_or("access.log");
            Ok(Arc::new(FileStorage::open(path)?))
        }
        StorageBackend::Console => Ok(Arc::new(ConsoleStorage)),
        StorageBackend::None => Ok(Arc::new(NullStorage)),
    }
}

/// Storage that discards everything.
pub struct NullStorage;

#[async_trait]
impl AccessLogStorage for NullStorage {
    async fn store(&self, _entry: AccessLogEntry) -> Result<(), AccessLogError> {
        Ok(())
    }

    async fn query(&self, _filter: AccessFilter) -> Result<Vec<AccessLogEntry>, AccessLogError> {
        Ok(vec![])
    }
}

/// Console storage (human-readable lines on stdout).
pub struct ConsoleStorage;

#[async_trait]
impl AccessLogStorage for ConsoleStorage {
    async fn store(&self, entry: AccessLogEntry) -> Result<(), AccessLogError> {
        println!("{}", entry.to_log_line());
        Ok(())
    }

    async fn query(&self, _filter: AccessFilter) -> Result<Vec<AccessLogEntry>, AccessLogError> {
        // Console storage doesn't support querying
        Ok(vec![])
    }
}

/// In-memory storage.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<Vec<AccessLogEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: AccessLogEntry) -> Result<(), AccessLogError> {
        let mut entries = self.entries.write().map_err(|e| {
            AccessLogError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;
        entries.push(entry);
        Ok(())
    }

    fn filtered(&self, filter: &AccessFilter) -> Result<Vec<AccessLogEntry>, AccessLogError> {
        let entries = self.entries.read().map_err(|e| {
            AccessLogError::StorageError(format!("Failed to acquire read lock: {}", e))
        })?;

        let mut results: Vec<_> = entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }
}

#[async_trait]
impl AccessLogStorage for MemoryStorage {
    async fn store(&self, entry: AccessLogEntry) -> Result<(), AccessLogError> {
        self.push(entry)
    }

    async fn query(&self, filter: AccessFilter) -> Result<Vec<AccessLogEntry>, AccessLogError> {
        self.filtered(&filter)
    }
}

/// File storage (JSON Lines). Entries are also kept in memory for queries;
/// existing lines are loaded when the file is opened.
pub struct FileStorage {
    path: PathBuf,
    memory: MemoryStorage,
}

impl FileStorage {
    /// Open (or create on first write) a JSON Lines file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AccessLogError> {
        let path = path.as_ref().to_path_buf();
        let memory = MemoryStorage::new();

        if path.exists() {
            let reader = BufReader::new(std::fs::File::open(&path)?);
            for (number, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AccessLogEntry>(&line) {
                    Ok(entry) => memory.push(entry)?,
                    Err(e) => tracing::warn!(
                        path = %path.display(),
                        line = number + 1,
                        error = %e,
                        "Skipping malformed access log line"
                    ),
                }
            }
        }

        Ok(Self { path, memory })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AccessLogStorage for FileStorage {
    async fn store(&self, entry: AccessLogEntry) -> Result<(), AccessLogError> {
        let json = serde_json::to_string(&entry)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;

        self.memory.push(entry)
    }

    async fn query(&self, filter: AccessFilter) -> Result<Vec<AccessLogEntry>, AccessLogError> {
        self.memory.filtered(&filter)
    }
}

//! Access logging configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the schema/table access logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogConfig {
    /// Whether access logging is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Capacity of the in-process buffer between callers and the writer task.
    /// Entries logged while the buffer is full are dropped and counted.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Storage backend.
    #[serde(default)]
    pub storage: StorageBackend,

    /// File path (for the file backend).
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Storage backend type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Keep entries in memory (stats and reports are served from here).
    #[default]
    Memory,
    /// Append JSON lines to a file (also kept in memory for stats).
    File,
    /// Print JSON lines to stdout.
    Console,
    /// Discard entries.
    None,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            buffer_size: default_buffer_size(),
            storage: StorageBackend::default(),
            file_path: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_buffer_size() -> usize {
    1024
}

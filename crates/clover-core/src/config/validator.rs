//! SQL validator configuration.
//!
//! Deny-lists and limits for the read-only statement policy. `INTO` is denied
//! so `SELECT ... INTO` cannot create tables. The function defaults cover
//! Postgres functions that reach the server filesystem or other connections,
//! stall the backend, change session settings or advance sequences.

use serde::{Deserialize, Serialize};

/// Keywords that are never allowed outside quoting.
pub const DEFAULT_DENIED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "CREATE",
    "EXEC", "EXECUTE", "CALL", "COPY", "INTO",
];

/// Function names that are never allowed to be called.
pub const DEFAULT_DENIED_FUNCTIONS: &[&str] = &[
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "pg_ls_logdir",
    "pg_ls_waldir",
    "pg_ls_tmpdir",
    "pg_file_write",
    "pg_file_rename",
    "pg_file_unlink",
    "lo_import",
    "lo_export",
    "lo_get",
    "lo_put",
    "lo_from_bytea",
    "dblink",
    "dblink_exec",
    "dblink_connect",
    "pg_sleep",
    "pg_sleep_for",
    "pg_sleep_until",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "pg_promote",
    "set_config",
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "cursor_to_xml",
    "pg_advisory_lock",
    "pg_advisory_xact_lock",
    "nextval",
    "setval",
    "pg_notify",
];

/// Configuration for the SQL validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Maximum accepted statement length in bytes.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Keywords a statement may start with (case-insensitive).
    #[serde(default = "default_allowed_leading_keywords")]
    pub allowed_leading_keywords: Vec<String>,

    /// Keywords rejected anywhere outside string/identifier quoting.
    #[serde(default = "default_denied_keywords")]
    pub denied_keywords: Vec<String>,

    /// Function names rejected when called (`name(`), schema qualification ignored.
    #[serde(default = "default_denied_functions")]
    pub denied_functions: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            allowed_leading_keywords: default_allowed_leading_keywords(),
            denied_keywords: default_denied_keywords(),
            denied_functions: default_denied_functions(),
        }
    }
}

fn default_max_length() -> usize {
    10_000
}

fn default_allowed_leading_keywords() -> Vec<String> {
    vec!["SELECT".to_string()]
}

fn default_denied_keywords() -> Vec<String> {
    DEFAULT_DENIED_KEYWORDS.iter().map(|s| s.to_string()).collect()
}

fn default_denied_functions() -> Vec<String> {
    DEFAULT_DENIED_FUNCTIONS.iter().map(|s| s.to_string()).collect()
}

//! Execution errors and their mapping onto [`ErrorKind`].

use clover_core::ErrorKind;
use clover_sql::Rejection;
use clover_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Step of the execution in which a database error surfaced. The same
/// SQLSTATE means different things during the role switch and during the
/// query itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Acquire,
    Begin,
    RoleSwitch,
    SearchPath,
    Query,
    Release,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "session acquisition",
            Self::Begin => "transaction start",
            Self::RoleSwitch => "role switch",
            Self::SearchPath => "search path",
            Self::Query => "query execution",
            Self::Release => "session release",
        }
    }
}

/// Errors raised while executing a role-scoped query.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no role mapping for user '{user_id}'")]
    UserNotProvisioned { user_id: String },

    #[error("cannot assume role '{role}': {message}")]
    RoleAssumption { role: String, message: String },

    #[error(transparent)]
    QueryRejected(#[from] Rejection),

    /// `message` is the database's own text, e.g.
    /// `permission denied for table sales`.
    #[error("{message}")]
    PermissionDenied { message: String },

    #[error("application store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{} timed out after {}ms", phase.as_str(), after.as_millis())]
    Timeout { phase: Phase, after: Duration },

    #[error("database error during {}: {message}", phase.as_str())]
    Database { phase: Phase, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotProvisioned { .. } => ErrorKind::UserNotProvisioned,
            Self::RoleAssumption { .. } => ErrorKind::RoleAssumptionError,
            Self::QueryRejected(_) => ErrorKind::QueryRejected,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Database { .. } | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to hand back to the caller. Role names, rejected SQL and
    /// driver text stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::UserNotProvisioned { .. } => {
                "You do not have access to the data yet. Request access from an administrator."
                    .to_string()
            }
            Self::RoleAssumption { .. } => {
                "Your data access is misconfigured. Contact an administrator.".to_string()
            }
            Self::QueryRejected(_) => {
                "The query was rejected: only single read-only SELECT statements are allowed."
                    .to_string()
            }
            Self::PermissionDenied { message } => message.clone(),
            Self::StoreUnavailable(_) => {
                "The service is temporarily unavailable. Try again later.".to_string()
            }
            Self::Timeout { .. } => "The query took too long. Try again or simplify it.".to_string(),
            Self::Database { .. } | Self::Internal(_) => {
                "The query could not be executed.".to_string()
            }
        }
    }

    /// Whether the session must be discarded rather than returned to the pool.
    pub fn poisons_session(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Classify a driver error raised during `phase`.
    pub fn from_sqlx(error: sqlx::Error, phase: Phase, role: &str) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::Timeout {
                phase,
                after: Duration::ZERO,
            },
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                classify_sqlstate(code.as_deref(), phase, role, db.message())
            }
            other => Self::Database {
                phase,
                message: other.to_string(),
            },
        }
    }
}

/// Map a SQLSTATE onto an execution error.
///
/// `42501` insufficient_privilege, `42704` undefined_object and `22023`
/// invalid_parameter_value during the role switch mean the role cannot be
/// assumed. `42501` anywhere else is a missing grant. `57014` query_canceled
/// is the server-side statement timeout.
pub fn classify_sqlstate(
    code: Option<&str>,
    phase: Phase,
    role: &str,
    message: &str,
) -> ExecutionError {
    match (phase, code) {
        (Phase::RoleSwitch, Some("42501" | "42704" | "22023")) => ExecutionError::RoleAssumption {
            role: role.to_string(),
            message: message.to_string(),
        },
        (_, Some("42501")) => ExecutionError::PermissionDenied {
            message: message.to_string(),
        },
        (_, Some("57014")) => ExecutionError::Timeout {
            phase,
            after: Duration::ZERO,
        },
        _ => ExecutionError::Database {
            phase,
            message: match code {
                Some(code) => format!("{} (SQLSTATE {})", message, code),
                None => message.to_string(),
            },
        },
    }
}

impl From<StoreError> for ExecutionError {
    fn from(e: StoreError) -> Self {
        if e.is_unavailable() {
            Self::StoreUnavailable(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_switch_failures_are_role_assumption() {
        for code in ["42501", "42704", "22023"] {
            let err = classify_sqlstate(
                Some(code),
                Phase::RoleSwitch,
                "clv_u1_demo1",
                "role \"clv_u1_demo1\" does not exist",
            );
            assert_eq!(err.kind(), ErrorKind::RoleAssumptionError, "{}", code);
        }
    }

    #[test]
    fn test_insufficient_privilege_during_query_is_permission_denied() {
        let err = classify_sqlstate(
            Some("42501"),
            Phase::Query,
            "clv_u2_public",
            "permission denied for table sales",
        );
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.public_message(), "permission denied for table sales");
    }

    #[test]
    fn test_query_canceled_is_timeout() {
        let err = classify_sqlstate(Some("57014"), Phase::Query, "r", "canceling statement");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.poisons_session());
    }

    #[test]
    fn test_other_sqlstate_is_internal_and_hidden() {
        let err = classify_sqlstate(
            Some("42P01"),
            Phase::Query,
            "r",
            "relation \"secret_table\" does not exist",
        );
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.public_message().contains("secret_table"));
    }

    #[test]
    fn test_pool_timeout_is_timeout() {
        let err = ExecutionError::from_sqlx(sqlx::Error::PoolTimedOut, Phase::Acquire, "");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_store_errors() {
        let err: ExecutionError = StoreError::Unavailable("refused".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        let err: ExecutionError = StoreError::InvalidIdentifier("x".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_public_messages_do_not_leak_role_names() {
        let err = ExecutionError::RoleAssumption {
            role: "clv_u1_demo1".to_string(),
            message: "role \"clv_u1_demo1\" does not exist".to_string(),
        };
        assert!(!err.public_message().contains("clv_u1_demo1"));
        assert!(err.to_string().contains("clv_u1_demo1"));
    }
}

// error.rs — Error types for access control.

use thiserror::Error;

use crate::permission::Permission;

#[derive(Debug, Error)]
pub enum RbacError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Audit(#[from] ag_audit::AuditError),

    /// Unknown user or wrong password. Deliberately does not say which.
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("user '{0}' is deactivated")]
    UserInactive(String),

    #[error("user '{0}' already exists")]
    UserExists(String),

    #[error("user '{0}' not found")]
    UserNotFound(String),

    #[error("invalid username '{name}': {reason}")]
    InvalidUsername { name: String, reason: String },

    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    #[error("permission denied: {user} lacks {permission}")]
    PermissionDenied { user: String, permission: Permission },

    #[error("invalid access policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },

    #[error("secret unavailable: {0}")]
    Secret(String),

    #[error("unknown {kind} '{value}'")]
    Unknown { kind: &'static str, value: String },
}

impl RbacError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        RbacError::Io {
            path: path.to_string(),
            source,
        }
    }

    /// Session problems the caller should answer by logging in again.
    pub fn is_session_error(&self) -> bool {
        matches!(self, RbacError::SessionExpired | RbacError::SessionNotFound)
    }
}

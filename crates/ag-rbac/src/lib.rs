//! # ag-rbac
//!
//! Role-based access control for Agent Guard.
//!
//! [`AccessControl`] authenticates users into [`Session`]s with a fixed
//! lifetime and answers permission checks against the session's [`Role`].
//! Every check, granted or not, is written to the hash-chained audit log.
//! Named [`AccessPolicy`]s refine the role check with resource patterns and
//! request conditions.
//!
//! Passwords are stored as salted SHA-256 digests peppered with a secret
//! from a [`SecretProvider`]; the pepper is never persisted with the users
//! and never logged.

pub mod access;
pub mod error;
pub mod permission;
pub mod policy;
pub mod report;
pub mod secret;
pub mod session;
pub mod user;

pub use access::{AccessControl, DEFAULT_SESSION_TTL_HOURS};
pub use error::RbacError;
pub use permission::{Permission, Role};
pub use policy::{AccessPolicy, PolicyContext, PolicyStore};
pub use report::{
    AccessLogFilter, AuditSummary, PermissionUsage, UserAccessStats, UserSummary,
    USER_SUMMARY_RECENT,
};
pub use secret::{
    Credentials, EnvSecretProvider, FileSecretProvider, PasswordHash, SecretProvider,
    StaticSecretProvider, SECRET_ENV_VAR,
};
pub use session::{Session, SessionStore, DEFAULT_SESSION_IDLE_MINUTES};
pub use user::{User, UserStore, MIN_PASSWORD_LEN};

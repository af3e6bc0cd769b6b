//! # ag-audit
//!
//! Append-only audit log and artifact hashing for Agent Guard.
//!
//! Every permission check, authentication, rule mutation and deployment
//! action is recorded as an [`AuditEvent`] in a JSONL (JSON Lines) log file.
//! Events are hash-chained: each one carries the SHA-256 of the previous
//! line, so insertion, deletion or modification is detectable.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use ag_audit::{AuditAction, AuditEvent, AuditLog};
//!
//! let mut log = AuditLog::open("/tmp/audit.jsonl").unwrap();
//! let mut event = AuditEvent::new("alice", AuditAction::PermissionCheck)
//!     .with_permission("deploy_system")
//!     .with_target("deployment")
//!     .with_allowed(false);
//! log.append(&mut event).unwrap();
//! ```

pub mod error;
pub mod event;
pub mod hasher;
pub mod log;

pub use error::AuditError;
pub use event::{AuditAction, AuditEvent};
pub use log::{AuditLog, ChainReport};

// error.rs — Error types for the audit log and hashing helpers.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line that is not a well-formed event.
    #[error("malformed audit event: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `previous_hash` on `line` does not match the hash of the line before
    /// it: the log was edited, truncated or reordered.
    #[error("audit chain broken at line {line}: expected previous hash {expected}, found {actual}")]
    IntegrityViolation {
        line: usize,
        expected: String,
        actual: String,
    },

    #[error("cannot hash {path}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

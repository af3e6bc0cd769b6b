// error.rs — Error types for the policy subsystem.
//
// A deny is a decision, never an error. Errors here are either a broken
// rule artifact (RuleLoadError), a malformed request (ValidationError), or
// infrastructure failures while persisting rules.

use std::path::PathBuf;

use thiserror::Error;

/// A rule artifact could not be turned into an appliable rule set.
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("failed to read rule artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rule artifact: {0}")]
    Parse(String),

    #[error("unsupported rule artifact format '{extension}' (expected yaml, yml or json)")]
    UnsupportedFormat { extension: String },

    #[error("rule #{position} has an empty id")]
    EmptyId { position: usize },

    #[error("duplicate rule id '{rule_id}'")]
    DuplicateId { rule_id: String },

    /// A pattern failed to compile. Patterns are compiled at load time so
    /// evaluation never sees an invalid matcher.
    #[error("rule '{rule_id}': invalid {field} '{pattern}': {reason}")]
    InvalidPattern {
        rule_id: String,
        field: String,
        pattern: String,
        reason: String,
    },

    #[error("failed to serialize rule artifact: {0}")]
    Serialize(String),
}

/// A validation request is malformed and cannot be evaluated.
///
/// Malformed requests are rejected before the cache is consulted and are
/// never cached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("operation must not be empty")]
    EmptyOperation,

    #[error("target must not be empty")]
    EmptyTarget,

    #[error("{field} exceeds {max} bytes ({len})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Outcome of `CommandInterceptor::guard` when the caller must not proceed.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The operation was denied; the caller must refuse to perform it.
    #[error("operation refused by rule '{rule_id}': {rationale}")]
    Refused { rule_id: String, rationale: String },
}

/// Crate-level error for operations that touch the filesystem.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Load(#[from] RuleLoadError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to persist rule artifact to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// error.rs — Error types for the deployment subsystem.
//
// A deployment that fails validation, backup or health checking is not an
// error: it ends as a `failed` or `rolled_back` record. These variants are
// for requests that could not be carried out at all.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    RuleLoad(#[from] ag_policy::RuleLoadError),

    #[error(transparent)]
    Policy(#[from] ag_policy::PolicyError),

    /// Another deployment holds the in-flight lock.
    #[error("a deployment is already in progress")]
    DeploymentInProgress,

    #[error("deployment not found: {0}")]
    DeploymentNotFound(Uuid),

    #[error("invalid transition from {from} to {to} for deployment {deployment_id}")]
    InvalidTransition {
        deployment_id: Uuid,
        from: String,
        to: String,
    },

    #[error("deployment {deployment_id} is {status} and cannot be rolled back; restore its backup instead")]
    NotRollbackable { deployment_id: Uuid, status: String },

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("backup '{0}' already exists")]
    BackupExists(String),

    #[error("invalid backup name '{name}': {reason}")]
    InvalidBackupName { name: String, reason: String },

    /// A backup's artifact no longer matches its manifest.
    #[error("backup '{backup_id}' is corrupt: {artifact} hash {actual} does not match manifest {expected}")]
    BackupCorrupt {
        backup_id: String,
        artifact: String,
        expected: String,
        actual: String,
    },

    #[error("backup failed: {0}")]
    BackupFailure(String),
}

impl DeployError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        DeployError::Io {
            path: path.to_string(),
            source,
        }
    }
}

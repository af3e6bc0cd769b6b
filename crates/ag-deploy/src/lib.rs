//! # ag-deploy
//!
//! Rule-set deployment for Agent Guard.
//!
//! The [`DeploymentOrchestrator`] moves a candidate rule artifact through
//! `Validating → BackingUp → Applying → HealthChecking` and either commits
//! it or rolls back to the [`Backup`] taken before the swap. Every attempt
//! leaves a [`DeploymentRecord`] on disk, except dry runs which persist
//! nothing.
//!
//! Backups are immutable directories with a SHA-256 manifest and are
//! verified before anything is restored from them.

pub mod backup;
pub mod error;
pub mod gate;
pub mod lock;
pub mod orchestrator;
pub mod record;

pub use backup::{Backup, BackupReason, BackupStore, RULES_ARTIFACT};
pub use error::DeployError;
pub use gate::HealthGate;
pub use lock::DeployLock;
pub use orchestrator::{DeployOptions, DeploymentOrchestrator};
pub use record::{
    DeployMode, DeploymentFailure, DeploymentPhase, DeploymentRecord, DeploymentRecordStore,
    DeploymentStatus, FailureKind, PhaseEntry, RestoreSource, RollbackReport,
};

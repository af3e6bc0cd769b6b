// record.rs — DeploymentRecord: one record per deployment attempt.
//
// The phase machine:
//   Idle → Validating → BackingUp → Applying → HealthChecking
//     → Committed
//     → RollingBack → RolledBack
//   Applying → RollingBack   (apply overran its timeout)
//   Applying → Committed     (force mode skips the health gate)
//   Any phase → Failed
//
// The coarse status (pending, applied, committed, rolled_back, failed) is
// derived from the phase and kept alongside it for readers of the JSON.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ag_monitor::HealthCheckReport;
use ag_policy::LintFinding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DeployError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Applied,
    Committed,
    RolledBack,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Committed | DeploymentStatus::RolledBack | DeploymentStatus::Failed
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Applied => "applied",
            DeploymentStatus::Committed => "committed",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    Idle,
    Validating,
    BackingUp,
    Applying,
    HealthChecking,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

impl DeploymentPhase {
    pub fn can_transition_to(self, next: DeploymentPhase) -> bool {
        use DeploymentPhase::*;

        if next == Failed {
            return !matches!(self, Committed | RolledBack | Failed);
        }

        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, BackingUp)
                | (BackingUp, Applying)
                | (Applying, HealthChecking)
                | (Applying, Committed)
                | (Applying, RollingBack)
                | (HealthChecking, Committed)
                | (HealthChecking, RollingBack)
                | (RollingBack, RolledBack)
        )
    }

    pub fn status(self) -> DeploymentStatus {
        match self {
            DeploymentPhase::Idle | DeploymentPhase::Validating | DeploymentPhase::BackingUp => {
                DeploymentStatus::Pending
            }
            DeploymentPhase::Applying
            | DeploymentPhase::HealthChecking
            | DeploymentPhase::RollingBack => DeploymentStatus::Applied,
            DeploymentPhase::Committed => DeploymentStatus::Committed,
            DeploymentPhase::RolledBack => DeploymentStatus::RolledBack,
            DeploymentPhase::Failed => DeploymentStatus::Failed,
        }
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentPhase::Idle => "idle",
            DeploymentPhase::Validating => "validating",
            DeploymentPhase::BackingUp => "backing_up",
            DeploymentPhase::Applying => "applying",
            DeploymentPhase::HealthChecking => "health_checking",
            DeploymentPhase::Committed => "committed",
            DeploymentPhase::RollingBack => "rolling_back",
            DeploymentPhase::RolledBack => "rolled_back",
            DeploymentPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a deployment treats its gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    /// Lint and health gates enforced; unhealthy results roll back.
    #[default]
    Safe,
    /// Lint and health gates skipped. A backup is still taken.
    Force,
    /// Validation only. Nothing is mutated or persisted.
    DryRun,
}

impl FromStr for DeployMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "safe" => Ok(DeployMode::Safe),
            "force" => Ok(DeployMode::Force),
            "dry-run" | "dry_run" | "dryrun" => Ok(DeployMode::DryRun),
            other => Err(format!(
                "unknown deploy mode '{}' (expected safe, force or dry-run)",
                other
            )),
        }
    }
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployMode::Safe => f.write_str("safe"),
            DeployMode::Force => f.write_str("force"),
            DeployMode::DryRun => f.write_str("dry-run"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub phase: DeploymentPhase,
    pub entered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Backup,
    Apply,
    HealthCheck,
    Timeout,
    Internal,
}

/// Why a deployment did not commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentFailure {
    pub phase: DeploymentPhase,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreSource {
    Backup,
    /// The backup could not be read; the in-memory previous set was used.
    PreviousSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    pub backup_id: Option<String>,
    pub restored_from: RestoreSource,
    /// Fingerprint of the rule set active after the rollback.
    pub fingerprint: String,
    pub health: Option<HealthCheckReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: Uuid,
    /// Version of the rule set being deployed.
    pub version: String,
    pub mode: DeployMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    pub status: DeploymentStatus,
    pub phase: DeploymentPhase,
    #[serde(default)]
    pub phases: Vec<PhaseEntry>,
    pub previous_version: String,
    pub previous_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lint: Vec<LintFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_report: Option<HealthCheckReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<DeploymentFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_report: Option<RollbackReport>,
    /// Set when this deployment restores a named backup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn new(
        version: impl Into<String>,
        mode: DeployMode,
        previous_version: impl Into<String>,
        previous_fingerprint: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            deployment_id: Uuid::new_v4(),
            version: version.into(),
            mode,
            backup_id: None,
            status: DeploymentStatus::Pending,
            phase: DeploymentPhase::Idle,
            phases: vec![PhaseEntry {
                phase: DeploymentPhase::Idle,
                entered_at: now,
            }],
            previous_version: previous_version.into(),
            previous_fingerprint: previous_fingerprint.into(),
            new_fingerprint: None,
            lint: Vec::new(),
            health_report: None,
            failure: None,
            rollback_report: None,
            restored_from: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to `next`, recording it in the phase history.
    pub fn advance(&mut self, next: DeploymentPhase) -> Result<(), DeployError> {
        if !self.phase.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                deployment_id: self.deployment_id,
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        self.phase = next;
        self.status = next.status();
        self.phases.push(PhaseEntry {
            phase: next,
            entered_at: now,
        });
        self.updated_at = now;
        if self.status.is_terminal() {
            self.finished_at = Some(now);
        }
        tracing::debug!(
            deployment_id = %self.deployment_id,
            phase = %next,
            "deployment phase entered"
        );
        Ok(())
    }

    /// Record a failure and move to `Failed`.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> Result<(), DeployError> {
        self.failure = Some(DeploymentFailure {
            phase: self.phase,
            kind,
            message: message.into(),
        });
        self.advance(DeploymentPhase::Failed)
    }
}

/// Persistent store for deployment records, one JSON file per record:
/// `<dir>/<deployment_id>.json`.
pub struct DeploymentRecordStore {
    dir: PathBuf,
}

impl DeploymentRecordStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, DeployError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| DeployError::io(dir.display(), e))?;
        Ok(Self { dir })
    }

    /// Create or overwrite.
    pub fn save(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let path = self.record_file(record.deployment_id);
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json).map_err(|e| DeployError::io(path.display(), e))?;
        Ok(())
    }

    pub fn get(&self, deployment_id: Uuid) -> Result<Option<DeploymentRecord>, DeployError> {
        let path = self.record_file(deployment_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|e| DeployError::io(path.display(), e))?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// All records, newest first.
    pub fn list(&self) -> Result<Vec<DeploymentRecord>, DeployError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| DeployError::io(self.dir.display(), e))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DeployError::io(self.dir.display(), e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let json =
                    fs::read_to_string(&path).map_err(|e| DeployError::io(path.display(), e))?;
                let record: DeploymentRecord = serde_json::from_str(&json)?;
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    fn record_file(&self, deployment_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", deployment_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record() -> DeploymentRecord {
        DeploymentRecord::new("2", DeployMode::Safe, "1", "abc")
    }

    #[test]
    fn happy_path_transitions() {
        let mut r = record();
        for phase in [
            DeploymentPhase::Validating,
            DeploymentPhase::BackingUp,
            DeploymentPhase::Applying,
            DeploymentPhase::HealthChecking,
            DeploymentPhase::Committed,
        ] {
            r.advance(phase).unwrap();
        }
        assert_eq!(r.status, DeploymentStatus::Committed);
        assert!(r.finished_at.is_some());
        assert_eq!(r.phases.len(), 6);
    }

    #[test]
    fn phases_cannot_be_skipped() {
        let mut r = record();
        let err = r.advance(DeploymentPhase::Applying).unwrap_err();
        assert!(matches!(err, DeployError::InvalidTransition { .. }));
        assert_eq!(r.phase, DeploymentPhase::Idle);
    }

    #[test]
    fn terminal_phases_are_final() {
        let mut r = record();
        r.advance(DeploymentPhase::Validating).unwrap();
        r.fail(FailureKind::Validation, "duplicate id").unwrap();
        assert_eq!(r.status, DeploymentStatus::Failed);
        assert_eq!(r.failure.as_ref().unwrap().phase, DeploymentPhase::Validating);
        assert!(r.advance(DeploymentPhase::Failed).is_err());
        assert!(r.advance(DeploymentPhase::BackingUp).is_err());
    }

    #[test]
    fn status_follows_phase() {
        assert_eq!(DeploymentPhase::BackingUp.status(), DeploymentStatus::Pending);
        assert_eq!(DeploymentPhase::RollingBack.status(), DeploymentStatus::Applied);
        assert_eq!(DeploymentPhase::RolledBack.status(), DeploymentStatus::RolledBack);
    }

    #[test]
    fn mode_parses() {
        assert_eq!("dry-run".parse::<DeployMode>().unwrap(), DeployMode::DryRun);
        assert_eq!("FORCE".parse::<DeployMode>().unwrap(), DeployMode::Force);
        assert!("yolo".parse::<DeployMode>().is_err());
    }

    #[test]
    fn store_round_trip_newest_first() {
        let dir = tempdir().unwrap();
        let store = DeploymentRecordStore::new(dir.path()).unwrap();
        let first = record();
        store.save(&first).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = record();
        store.save(&second).unwrap();

        let loaded = store.get(first.deployment_id).unwrap().unwrap();
        assert_eq!(loaded.version, "2");
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());

        let ids: Vec<_> = store.list().unwrap().iter().map(|r| r.deployment_id).collect();
        assert_eq!(ids, vec![second.deployment_id, first.deployment_id]);
    }
}

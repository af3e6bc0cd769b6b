// orchestrator.rs — Staged rule-set rollout with backup and automatic rollback.
//
// Only one deployment runs at a time, across processes when a lock file is
// configured. A second request while one is in flight fails with
// `DeploymentInProgress` instead of queueing. Once the lock is held the
// store is brought in line with the artifact on disk, so a deployment made
// by another process is the baseline for this one.
//
// Validating, BackingUp and HealthChecking run on a worker thread and are
// abandoned after `phase_timeout`. Applying runs inline because the swap
// must not be torn; if it overruns, the deployment is rolled back.
//
// Failures before Applying leave the store untouched and end `failed`.
// Failures from Applying onwards roll back and end `rolled_back`.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use ag_monitor::{CheckMode, HealthCheckReport};
use ag_policy::{DecisionCache, RuleArtifact, RuleSet, RuleStore, StagedRuleSet};
use uuid::Uuid;

use crate::backup::{Backup, BackupReason, BackupStore};
use crate::error::DeployError;
use crate::gate::HealthGate;
use crate::lock::DeployLock;
use crate::record::{
    DeployMode, DeploymentFailure, DeploymentPhase, DeploymentRecord, DeploymentRecordStore,
    DeploymentStatus, FailureKind, RestoreSource, RollbackReport,
};

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub phase_timeout: Duration,
    /// Degraded components tolerated by the health gate.
    pub max_degraded_components: usize,
    pub health_mode: CheckMode,
    /// Backups kept after a committed deployment.
    pub retain_backups: usize,
    /// Where the active artifact is persisted on apply.
    pub artifact_path: Option<PathBuf>,
    /// Other files captured with every backup.
    pub dependents: Vec<PathBuf>,
    /// Lock file shared with other processes deploying the same state.
    pub lock_file: Option<PathBuf>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_secs(30),
            max_degraded_components: 1,
            health_mode: CheckMode::Quick,
            retain_backups: 20,
            artifact_path: None,
            dependents: Vec::new(),
            lock_file: None,
        }
    }
}

/// Held while a deployment operation runs.
struct InFlight<'a> {
    _local: MutexGuard<'a, ()>,
    _shared: Option<DeployLock>,
}

pub struct DeploymentOrchestrator {
    store: Arc<RuleStore>,
    cache: Arc<DecisionCache>,
    health: Arc<dyn HealthGate>,
    backups: BackupStore,
    records: DeploymentRecordStore,
    options: DeployOptions,
    in_flight: Mutex<()>,
}

impl DeploymentOrchestrator {
    pub fn new(
        store: Arc<RuleStore>,
        cache: Arc<DecisionCache>,
        health: Arc<dyn HealthGate>,
        backups: BackupStore,
        records: DeploymentRecordStore,
    ) -> Self {
        Self {
            store,
            cache,
            health,
            backups,
            records,
            options: DeployOptions::default(),
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_options(mut self, options: DeployOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    fn lock(&self) -> Result<InFlight<'_>, DeployError> {
        let local = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(DeployError::DeploymentInProgress),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let shared = match &self.options.lock_file {
            Some(path) => Some(DeployLock::try_acquire(path)?.ok_or(DeployError::DeploymentInProgress)?),
            None => None,
        };
        self.sync_from_disk();
        Ok(InFlight {
            _local: local,
            _shared: shared,
        })
    }

    fn sync_from_disk(&self) {
        let Some(path) = self.options.artifact_path.as_deref().filter(|p| p.exists()) else {
            return;
        };
        match self.store.sync_from(path) {
            Ok(Some(_)) => {
                self.cache.invalidate_all();
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "artifact on disk not loadable, keeping active set");
            }
        }
    }

    /// Deploy an artifact. Gate failures are reported in the returned
    /// record, not as errors.
    pub fn deploy(
        &self,
        artifact: RuleArtifact,
        mode: DeployMode,
    ) -> Result<DeploymentRecord, DeployError> {
        let _guard = self.lock()?;
        self.run(artifact, mode, BackupReason::PreDeployment, None)
    }

    /// Deploy an artifact file. A file that cannot be loaded fails
    /// validation like any other invalid rule set.
    pub fn deploy_path(&self, path: &Path, mode: DeployMode) -> Result<DeploymentRecord, DeployError> {
        let _guard = self.lock()?;
        match RuleArtifact::load(path) {
            Ok(artifact) => self.run(artifact, mode, BackupReason::PreDeployment, None),
            Err(e) => {
                let previous = self.store.current();
                let mut record =
                    DeploymentRecord::new("unknown", mode, previous.version(), previous.fingerprint());
                record.advance(DeploymentPhase::Validating)?;
                record.fail(FailureKind::Validation, e.to_string())?;
                self.finish(record)
            }
        }
    }

    fn run(
        &self,
        artifact: RuleArtifact,
        mode: DeployMode,
        reason: BackupReason,
        restoring: Option<&Backup>,
    ) -> Result<DeploymentRecord, DeployError> {
        let previous = self.store.current();
        let mut record = DeploymentRecord::new(
            artifact.version.clone(),
            mode,
            previous.version(),
            previous.fingerprint(),
        );
        record.restored_from = restoring.map(|b| b.id.clone());
        tracing::info!(
            deployment_id = %record.deployment_id,
            version = %record.version,
            mode = %mode,
            "deployment started"
        );

        // Validating
        record.advance(DeploymentPhase::Validating)?;
        let store = Arc::clone(&self.store);
        let staged = match run_with_timeout(self.options.phase_timeout, move || {
            store.stage(artifact)
        }) {
            Some(Ok(staged)) => staged,
            Some(Err(e)) => {
                record.fail(FailureKind::Validation, e.to_string())?;
                return self.finish(record);
            }
            None => {
                record.fail(FailureKind::Timeout, "validation timed out")?;
                return self.finish(record);
            }
        };
        record.lint = staged.lint();
        record.new_fingerprint = Some(staged.ruleset().fingerprint().to_string());
        if mode != DeployMode::Force {
            if let Some(finding) = record.lint.iter().find(|f| f.is_error()) {
                let message = format!("lint: {}", finding.message);
                record.fail(FailureKind::Validation, message)?;
                return self.finish(record);
            }
        }
        if mode == DeployMode::DryRun {
            tracing::info!(
                deployment_id = %record.deployment_id,
                findings = record.lint.len(),
                "dry run validated"
            );
            return Ok(record);
        }

        // BackingUp
        record.advance(DeploymentPhase::BackingUp)?;
        let backups = self.backups.clone();
        let snapshot = Arc::clone(&previous);
        let dependents = self.options.dependents.clone();
        let backup = match run_with_timeout(self.options.phase_timeout, move || {
            backups.create(None, reason, &snapshot, &dependents)
        }) {
            Some(Ok(backup)) => backup,
            Some(Err(e)) => {
                record.fail(FailureKind::Backup, e.to_string())?;
                return self.finish(record);
            }
            None => {
                record.fail(FailureKind::Timeout, "backup timed out")?;
                return self.finish(record);
            }
        };
        record.backup_id = Some(backup.id.clone());

        // Applying
        record.advance(DeploymentPhase::Applying)?;
        self.records.save(&record)?;
        let started = Instant::now();
        if let Err(e) = self.apply(staged) {
            record.fail(FailureKind::Apply, e.to_string())?;
            return self.finish(record);
        }
        if let Some(source) = restoring {
            if let Err(e) = self.backups.restore_dependents(source) {
                tracing::warn!(backup_id = %source.id, error = %e, "dependent artifacts not restored");
            }
        }
        if started.elapsed() > self.options.phase_timeout {
            self.roll_back_after(&mut record, FailureKind::Timeout, "apply timed out", &previous)?;
            return self.finish(record);
        }

        if mode == DeployMode::Force {
            record.advance(DeploymentPhase::Committed)?;
            return self.commit(record);
        }

        // HealthChecking
        record.advance(DeploymentPhase::HealthChecking)?;
        match self.check_health() {
            Some(report) => {
                let acceptable = report.is_acceptable(self.options.max_degraded_components);
                let overall = report.overall;
                record.health_report = Some(report);
                if acceptable {
                    record.advance(DeploymentPhase::Committed)?;
                    self.commit(record)
                } else {
                    let message = format!("health check reported {}", overall);
                    self.roll_back_after(&mut record, FailureKind::HealthCheck, message, &previous)?;
                    self.finish(record)
                }
            }
            None => {
                self.roll_back_after(&mut record, FailureKind::Timeout, "health check timed out", &previous)?;
                self.finish(record)
            }
        }
    }

    /// Persist, swap, invalidate. The artifact is written first so a write
    /// failure leaves the store untouched.
    fn apply(&self, staged: StagedRuleSet) -> Result<(), DeployError> {
        if let Some(path) = &self.options.artifact_path {
            staged.ruleset().artifact().write_atomic(path)?;
        }
        self.store.swap(staged);
        self.cache.invalidate_all();
        Ok(())
    }

    fn check_health(&self) -> Option<HealthCheckReport> {
        let health = Arc::clone(&self.health);
        let mode = self.options.health_mode;
        run_with_timeout(self.options.phase_timeout, move || health.check_health(mode))
    }

    fn roll_back_after(
        &self,
        record: &mut DeploymentRecord,
        kind: FailureKind,
        message: impl Into<String>,
        previous: &RuleSet,
    ) -> Result<(), DeployError> {
        let message = message.into();
        tracing::warn!(
            deployment_id = %record.deployment_id,
            phase = %record.phase,
            reason = %message,
            "deployment rolling back"
        );
        record.failure = Some(DeploymentFailure {
            phase: record.phase,
            kind,
            message,
        });
        record.advance(DeploymentPhase::RollingBack)?;
        let report = self.restore_previous(record.backup_id.as_deref(), Some(previous))?;
        record.rollback_report = Some(report);
        record.advance(DeploymentPhase::RolledBack)
    }

    /// Put back the set captured in `backup_id`, or `fallback` if the backup
    /// cannot be read. Health is re-checked but never changes the outcome.
    fn restore_previous(
        &self,
        backup_id: Option<&str>,
        fallback: Option<&RuleSet>,
    ) -> Result<RollbackReport, DeployError> {
        let from_backup = backup_id.map(|id| self.stage_backup(id));
        let (staged, backup, restored_from) = match (from_backup, fallback) {
            (Some(Ok((backup, staged))), _) => (staged, Some(backup), RestoreSource::Backup),
            (Some(Err(e)), Some(snapshot)) => {
                tracing::warn!(error = %e, "backup unreadable, restoring in-memory snapshot");
                (self.store.restage(snapshot), None, RestoreSource::PreviousSnapshot)
            }
            (None, Some(snapshot)) => (self.store.restage(snapshot), None, RestoreSource::PreviousSnapshot),
            (Some(Err(e)), None) => return Err(e),
            (None, None) => {
                return Err(DeployError::BackupFailure(
                    "no backup or previous rule set to restore".to_string(),
                ))
            }
        };

        if let Some(path) = &self.options.artifact_path {
            if let Err(e) = staged.ruleset().artifact().write_atomic(path) {
                tracing::error!(path = %path.display(), error = %e, "could not persist restored artifact");
            }
        }
        self.store.swap(staged);
        self.cache.invalidate_all();
        if let Some(backup) = &backup {
            if let Err(e) = self.backups.restore_dependents(backup) {
                tracing::error!(backup_id = %backup.id, error = %e, "dependent artifacts not restored");
            }
        }

        let fingerprint = self.store.current().fingerprint().to_string();
        tracing::info!(
            backup_id = backup_id.unwrap_or("-"),
            source = ?restored_from,
            fingerprint = %fingerprint,
            "rule set restored"
        );
        Ok(RollbackReport {
            backup_id: backup_id.map(str::to_string),
            restored_from,
            fingerprint,
            health: self.check_health(),
        })
    }

    fn stage_backup(&self, id: &str) -> Result<(Backup, StagedRuleSet), DeployError> {
        let backup = self.backups.load(id)?;
        let artifact = self.backups.load_artifact(id)?;
        let staged = self.store.stage(artifact)?;
        Ok((backup, staged))
    }

    fn commit(&self, record: DeploymentRecord) -> Result<DeploymentRecord, DeployError> {
        let pinned: Vec<&str> = record.backup_id.as_deref().into_iter().collect();
        if let Err(e) = self.backups.prune(self.options.retain_backups, &pinned) {
            tracing::warn!(error = %e, "backup pruning failed");
        }
        self.finish(record)
    }

    fn finish(&self, record: DeploymentRecord) -> Result<DeploymentRecord, DeployError> {
        if record.mode != DeployMode::DryRun {
            self.records.save(&record)?;
        }
        match record.status {
            DeploymentStatus::Committed => tracing::info!(
                deployment_id = %record.deployment_id,
                version = %record.version,
                "deployment committed"
            ),
            status => tracing::warn!(
                deployment_id = %record.deployment_id,
                version = %record.version,
                status = %status,
                failure = record.failure.as_ref().map(|f| f.message.as_str()).unwrap_or(""),
                "deployment not committed"
            ),
        }
        Ok(record)
    }

    /// Take a manual backup of the active rule set.
    pub fn backup(&self, name: Option<&str>) -> Result<Backup, DeployError> {
        let _guard = self.lock()?;
        let current = self.store.current();
        self.backups
            .create(name, BackupReason::Manual, &current, &self.options.dependents)
    }

    /// Deploy the contents of a backup through the safe path. A safety
    /// backup of the current set is taken first and restored if the health
    /// gate fails.
    pub fn restore(&self, name: &str) -> Result<DeploymentRecord, DeployError> {
        let _guard = self.lock()?;
        let backup = self.backups.load(name)?;
        let artifact = self.backups.load_artifact(name)?;
        self.run(artifact, DeployMode::Safe, BackupReason::PreRestore, Some(&backup))
    }

    /// Roll back a deployment that did not finish.
    ///
    /// Already rolled-back records are returned unchanged. Committed and
    /// failed records are rejected; restore their backup instead.
    pub fn rollback(&self, deployment_id: Uuid) -> Result<DeploymentRecord, DeployError> {
        let _guard = self.lock()?;
        let mut record = self
            .records
            .get(deployment_id)?
            .ok_or(DeployError::DeploymentNotFound(deployment_id))?;

        match record.status {
            DeploymentStatus::RolledBack => return Ok(record),
            DeploymentStatus::Committed | DeploymentStatus::Failed => {
                return Err(DeployError::NotRollbackable {
                    deployment_id,
                    status: record.status.to_string(),
                })
            }
            DeploymentStatus::Pending => {
                record.fail(FailureKind::Internal, "interrupted before apply; nothing to roll back")?;
                return self.finish(record);
            }
            DeploymentStatus::Applied => {}
        }

        if record.phase != DeploymentPhase::RollingBack {
            record.advance(DeploymentPhase::RollingBack)?;
        }
        match self.restore_previous(record.backup_id.as_deref(), None) {
            Ok(report) => {
                record.rollback_report = Some(report);
                record.advance(DeploymentPhase::RolledBack)?;
            }
            Err(e) => record.fail(FailureKind::Internal, format!("rollback failed: {}", e))?,
        }
        self.finish(record)
    }

    pub fn get_deployment(&self, deployment_id: Uuid) -> Result<Option<DeploymentRecord>, DeployError> {
        self.records.get(deployment_id)
    }

    pub fn list_deployments(&self) -> Result<Vec<DeploymentRecord>, DeployError> {
        self.records.list()
    }

    pub fn list_backups(&self) -> Result<Vec<Backup>, DeployError> {
        self.backups.list()
    }
}

/// Run `f` on a worker thread, giving up after `timeout`. The thread is left
/// to finish on its own; its result is dropped.
fn run_with_timeout<T, F>(timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).ok()
}

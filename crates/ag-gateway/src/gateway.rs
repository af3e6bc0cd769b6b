// gateway.rs — Gateway: one process's wiring of every Agent Guard component.
//
// Agent-facing calls (`intercept`) need no session: the agent is the
// subject, identified by the detector. Operator-facing calls take a session
// id and are checked against RBAC first; the check itself is audited, and
// so is the outcome of every mutating action.
//
// Several processes may open the same project. Each re-reads the rule
// artifact before deciding anything when it changed on disk, so a
// deployment made by one is enforced by all.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use ag_audit::{AuditAction, AuditEvent, AuditLog, ChainReport};
use ag_deploy::{
    Backup, BackupStore, DeployMode, DeploymentOrchestrator, DeploymentRecord,
    DeploymentRecordStore, DeploymentStatus, HealthGate,
};
use ag_identity::{AgentIdentity, DetectionContext, IdentityDetector};
use ag_monitor::{
    replay, Alert, CheckMode, ComplianceMonitor, HealthCheckReport, JsonlAlertSink,
    TracingAlertSink,
};
use ag_policy::{
    ArtifactWatch, CommandInterceptor, DecisionCache, DefaultPolicy, EvaluationTrace, PolicyEvaluator,
    RuleArtifact, RuleStore, ValidationRequest, ValidationResult,
};
use ag_rbac::{
    AccessControl, AccessLogFilter, AccessPolicy, AuditSummary, Credentials, EnvSecretProvider,
    FileSecretProvider, Permission, PolicyContext, RbacError, Role, SecretProvider, Session,
    UserSummary, SECRET_ENV_VAR,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::GuardConfig;
use crate::error::GatewayError;

/// Files `init` created; empty when everything already existed.
#[derive(Debug, Default)]
pub struct InitReport {
    pub created: Vec<String>,
}

pub struct Gateway {
    config: GuardConfig,
    store: Arc<RuleStore>,
    cache: Arc<DecisionCache>,
    evaluator: Arc<PolicyEvaluator>,
    monitor: Arc<ComplianceMonitor>,
    orchestrator: DeploymentOrchestrator,
    access: AccessControl,
    identity: AgentIdentity,
    rules_watch: ArtifactWatch,
}

impl Gateway {
    /// Create the `.ag/` layout, default rules, default config and secret
    /// key. Existing files are left alone, so running it twice is harmless.
    pub fn init(config: &GuardConfig) -> Result<InitReport, GatewayError> {
        let mut report = InitReport::default();
        for dir in [
            &config.state_dir,
            &config.rbac_dir,
            &config.backups_dir,
            &config.deployments_dir,
        ] {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| GatewayError::io(dir.display(), e))?;
                report.created.push(dir.display().to_string());
            }
        }
        if !config.rules_file.exists() {
            RuleArtifact::builtin()?.write_atomic(&config.rules_file)?;
            report.created.push(config.rules_file.display().to_string());
        }
        if !config.config_file.exists() {
            let rendered = config.settings.to_toml()?;
            fs::write(&config.config_file, rendered)
                .map_err(|e| GatewayError::io(config.config_file.display(), e))?;
            report.created.push(config.config_file.display().to_string());
        }
        if std::env::var(SECRET_ENV_VAR).is_err() && !config.secret_key_file.exists() {
            FileSecretProvider::load_or_create(&config.secret_key_file)?;
            report.created.push(config.secret_key_file.display().to_string());
        }
        tracing::info!(
            root = %config.project_root.display(),
            created = report.created.len(),
            "initialized"
        );
        Ok(report)
    }

    /// Wire up every component for an initialized project.
    pub fn open(config: GuardConfig) -> Result<Self, GatewayError> {
        if !config.rules_file.exists() {
            return Err(GatewayError::NotInitialized(config.project_root.clone()));
        }
        let settings = &config.settings;

        let store = Arc::new(RuleStore::load(&config.rules_file)?);
        let rules_watch = ArtifactWatch::new(&config.rules_file);
        rules_watch.sync(&store)?;
        let cache = Arc::new(DecisionCache::new(settings.cache.capacity));
        let defaults = DefaultPolicy::new(
            settings.policy.default_decision,
            &settings.policy.protected_paths,
        )?;
        let evaluator = Arc::new(
            PolicyEvaluator::new(Arc::clone(&store), Arc::clone(&cache))
                .with_defaults(defaults)
                .with_cache_ttl(Duration::from_secs(settings.cache.ttl_secs)),
        );

        let monitor = ComplianceMonitor::standard(
            Arc::clone(&store),
            Arc::clone(&cache),
            &config.monitor_settings(),
        )
        .map_err(|e| GatewayError::ErrorPattern(e.to_string()))?
        .with_sink(Box::new(JsonlAlertSink::new(&config.alerts_log)))
        .with_sink(Box::new(TracingAlertSink));
        let monitor = Arc::new(monitor);

        let health: Arc<dyn HealthGate> = monitor.clone();
        let orchestrator = DeploymentOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            health,
            BackupStore::new(&config.backups_dir)?,
            DeploymentRecordStore::new(&config.deployments_dir)?,
        )
        .with_options(config.deploy_options());

        let secrets: Arc<dyn SecretProvider> = if std::env::var(SECRET_ENV_VAR).is_ok() {
            Arc::new(EnvSecretProvider::default())
        } else {
            Arc::new(FileSecretProvider::load_or_create(&config.secret_key_file)?)
        };
        let session_ttl = i64::try_from(settings.session.ttl_secs).unwrap_or(i64::MAX);
        let session_idle = i64::try_from(settings.session.idle_secs).unwrap_or(i64::MAX);
        let access = AccessControl::open(&config.rbac_dir, &config.audit_log, secrets)?
            .with_session_ttl(chrono::Duration::seconds(session_ttl))
            .with_idle_timeout(chrono::Duration::seconds(session_idle));

        let identity =
            IdentityDetector::new(DetectionContext::from_process(Some(&config.project_root)))
                .detect();

        Ok(Self {
            config,
            store,
            cache,
            evaluator,
            monitor,
            orchestrator,
            access,
            identity,
            rules_watch,
        })
    }

    /// Replace the detected agent identity.
    pub fn with_identity(mut self, identity: AgentIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<ComplianceMonitor> {
        &self.monitor
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Install the rule artifact on disk if another process changed it,
    /// dropping every cached decision. Returns whether the set changed. An
    /// artifact that does not load is logged and the active set kept.
    pub fn refresh_rules(&self) -> bool {
        match self.rules_watch.sync(&self.store) {
            Ok(Some(previous)) => {
                self.cache.invalidate_all();
                let current = self.store.current();
                tracing::info!(
                    from = %previous.version(),
                    to = %current.version(),
                    generation = current.generation(),
                    "rule artifact changed on disk, cache invalidated"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    path = %self.rules_watch.path().display(),
                    error = %e,
                    "rule artifact on disk not loadable, keeping active set"
                );
                false
            }
        }
    }

    pub fn interceptor(&self) -> CommandInterceptor {
        CommandInterceptor::new(Arc::clone(&self.evaluator), self.identity.clone())
    }

    // ── Agent surface ──────────────────────────────────────────────

    /// Validate an operation on behalf of the detected agent. Malformed
    /// requests count towards the monitor's error rate.
    pub fn intercept(&self, operation: &str, target: &str) -> Result<ValidationResult, GatewayError> {
        self.refresh_rules();
        self.interceptor()
            .intercept(operation, target)
            .map_err(|e| {
                self.monitor.record_error();
                GatewayError::from(e)
            })
    }

    /// Validate several operations against one rule-set snapshot. Each
    /// malformed request fails alone and counts towards the error rate.
    pub fn intercept_batch<O, T>(&self, requests: &[(O, T)]) -> Vec<Result<ValidationResult, GatewayError>>
    where
        O: AsRef<str>,
        T: AsRef<str>,
    {
        self.refresh_rules();
        self.interceptor()
            .intercept_batch(requests)
            .into_iter()
            .map(|r| {
                r.map_err(|e| {
                    self.monitor.record_error();
                    GatewayError::from(e)
                })
            })
            .collect()
    }

    // ── Sessions ───────────────────────────────────────────────────

    pub fn bootstrap_admin(&self, credentials: &Credentials) -> Result<bool, GatewayError> {
        Ok(self.access.bootstrap_admin(credentials)?)
    }

    pub fn login(&self, credentials: &Credentials) -> Result<Session, GatewayError> {
        Ok(self.access.authenticate(credentials)?)
    }

    pub fn logout(&self, session_id: &str) -> Result<bool, GatewayError> {
        Ok(self.access.logout(session_id)?)
    }

    pub fn whoami(&self, session_id: &str) -> Result<Session, GatewayError> {
        Ok(self.access.session(session_id)?)
    }

    // ── Operator surface ───────────────────────────────────────────

    /// Evaluate a request as an operator would see it. Requires
    /// `execute_rules`.
    pub fn check(
        &self,
        session_id: &str,
        operation: &str,
        target: &str,
    ) -> Result<ValidationResult, GatewayError> {
        self.access
            .require(session_id, Permission::ExecuteRules, &format!("check:{}", operation))?;
        self.refresh_rules();
        let request = ValidationRequest::new(operation, target).with_identity(self.identity.clone());
        Ok(self.evaluator.evaluate(request)?)
    }

    /// Like [`check`](Self::check), with the rules inspected on the way.
    pub fn explain(
        &self,
        session_id: &str,
        operation: &str,
        target: &str,
    ) -> Result<EvaluationTrace, GatewayError> {
        self.access
            .require(session_id, Permission::ExecuteRules, &format!("check:{}", operation))?;
        self.refresh_rules();
        let request = ValidationRequest::new(operation, target).with_identity(self.identity.clone());
        Ok(self.evaluator.evaluate_with_trace(request)?)
    }

    /// Requires `monitor_system`.
    pub fn health(&self, session_id: &str, mode: CheckMode) -> Result<HealthCheckReport, GatewayError> {
        self.access
            .require(session_id, Permission::MonitorSystem, "health")?;
        self.refresh_rules();
        Ok(self.monitor.run_cycle(mode))
    }

    /// Unresolved alerts from the alert log. Requires `monitor_system`.
    pub fn alerts(&self, session_id: &str) -> Result<Vec<Alert>, GatewayError> {
        self.access
            .require(session_id, Permission::MonitorSystem, "alerts")?;
        if !self.config.alerts_log.exists() {
            return Ok(Vec::new());
        }
        let mut alerts: Vec<Alert> = replay(&self.config.alerts_log)?
            .into_iter()
            .filter(|a| !a.resolved)
            .collect();
        alerts.sort_by(|a, b| b.severity.cmp(&a.severity).then(b.last_seen.cmp(&a.last_seen)));
        Ok(alerts)
    }

    /// Requires `deploy_system`.
    pub fn deploy(
        &self,
        session_id: &str,
        artifact: &std::path::Path,
        mode: DeployMode,
    ) -> Result<DeploymentRecord, GatewayError> {
        let session = self
            .access
            .require(session_id, Permission::DeploySystem, "deployment")?;
        let record = self.orchestrator.deploy_path(artifact, mode)?;
        if mode != DeployMode::DryRun {
            self.audit_deployment(&session, AuditAction::Deployment, &record)?;
        }
        Ok(record)
    }

    /// Requires `deploy_system`.
    pub fn rollback(&self, session_id: &str, deployment_id: Uuid) -> Result<DeploymentRecord, GatewayError> {
        let session = self
            .access
            .require(session_id, Permission::DeploySystem, "rollback")?;
        let record = self.orchestrator.rollback(deployment_id)?;
        self.audit_deployment(&session, AuditAction::Rollback, &record)?;
        Ok(record)
    }

    /// Requires `view_logs`.
    pub fn deployments(&self, session_id: &str) -> Result<Vec<DeploymentRecord>, GatewayError> {
        self.access
            .require(session_id, Permission::ViewLogs, "deployments")?;
        Ok(self.orchestrator.list_deployments()?)
    }

    /// Requires `manage_backups`.
    pub fn backup(&self, session_id: &str, name: Option<&str>) -> Result<Backup, GatewayError> {
        let session = self
            .access
            .require(session_id, Permission::ManageBackups, "backup")?;
        let backup = self.orchestrator.backup(name)?;
        self.access.record(
            AuditEvent::new(session.user.clone(), AuditAction::Backup)
                .with_session(session.id.clone())
                .with_permission(Permission::ManageBackups.as_str())
                .with_target(format!("backup:{}", backup.id))
                .with_metadata(serde_json::json!({
                    "fingerprint": backup.ruleset_fingerprint,
                    "version": backup.deployment_version,
                })),
        )?;
        Ok(backup)
    }

    /// Requires `manage_backups`.
    pub fn restore(&self, session_id: &str, name: &str) -> Result<DeploymentRecord, GatewayError> {
        let session = self
            .access
            .require(session_id, Permission::ManageBackups, &format!("backup:{}", name))?;
        let record = self.orchestrator.restore(name)?;
        self.audit_deployment(&session, AuditAction::Restore, &record)?;
        Ok(record)
    }

    /// Requires `manage_backups`.
    pub fn list_backups(&self, session_id: &str) -> Result<Vec<Backup>, GatewayError> {
        self.access
            .require(session_id, Permission::ManageBackups, "backups")?;
        Ok(self.orchestrator.list_backups()?)
    }

    /// Requires `manage_users`.
    pub fn add_user(
        &self,
        session_id: &str,
        credentials: &Credentials,
        role: Role,
    ) -> Result<(), GatewayError> {
        Ok(self.access.create_user(session_id, credentials, role)?)
    }

    /// Requires `manage_users`. Ends every open session of the user.
    pub fn deactivate_user(&self, session_id: &str, username: &str) -> Result<(), GatewayError> {
        Ok(self.access.deactivate_user(session_id, username)?)
    }

    /// Requires `manage_users`.
    pub fn users(&self, session_id: &str) -> Result<Vec<(String, Role, bool)>, GatewayError> {
        self.access.require(session_id, Permission::ManageUsers, "users")?;
        Ok(self.access.list_users())
    }

    /// Requires `view_logs`.
    pub fn audit_verify(&self, session_id: &str) -> Result<ChainReport, GatewayError> {
        self.access.require(session_id, Permission::ViewLogs, "audit")?;
        Ok(AuditLog::verify(&self.config.audit_log)?)
    }

    /// Requires `view_logs`.
    pub fn audit_tail(&self, session_id: &str, n: usize) -> Result<Vec<AuditEvent>, GatewayError> {
        self.access.require(session_id, Permission::ViewLogs, "audit")?;
        Ok(AuditLog::tail(&self.config.audit_log, n)?)
    }

    /// Requires `view_logs`.
    pub fn audit_report(
        &self,
        session_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AuditSummary, GatewayError> {
        self.access.require(session_id, Permission::ViewLogs, "audit")?;
        Ok(self.access.audit_summary(start, end)?)
    }

    /// Requires `view_logs` unless the summary is the caller's own.
    pub fn user_summary(&self, session_id: &str, username: &str) -> Result<UserSummary, GatewayError> {
        let session = self.access.session(session_id)?;
        if session.user != username {
            self.access
                .require(session_id, Permission::ViewLogs, &format!("user:{}", username))?;
        }
        Ok(self.access.user_summary(username)?)
    }

    /// Requires `view_logs`.
    pub fn access_logs(
        &self,
        session_id: &str,
        filter: &AccessLogFilter,
    ) -> Result<Vec<AuditEvent>, GatewayError> {
        self.access.require(session_id, Permission::ViewLogs, "audit")?;
        Ok(self.access.access_logs(filter)?)
    }

    /// Any live session may ask; the answer is audited.
    pub fn evaluate_policy(
        &self,
        session_id: &str,
        policy_name: &str,
        context: &PolicyContext,
    ) -> Result<bool, GatewayError> {
        Ok(self.access.evaluate_policy(session_id, policy_name, context)?)
    }

    pub fn policies(&self) -> Vec<AccessPolicy> {
        self.access.policies()
    }

    fn audit_deployment(
        &self,
        session: &Session,
        action: AuditAction,
        record: &DeploymentRecord,
    ) -> Result<(), RbacError> {
        let succeeded = match action {
            AuditAction::Rollback => record.status == DeploymentStatus::RolledBack,
            _ => record.status == DeploymentStatus::Committed,
        };
        self.access.record(
            AuditEvent::new(session.user.clone(), action)
                .with_session(session.id.clone())
                .with_target(format!("deployment:{}", record.deployment_id))
                .with_allowed(succeeded)
                .with_metadata(serde_json::json!({
                    "version": record.version,
                    "mode": record.mode,
                    "status": record.status,
                    "backup_id": record.backup_id,
                    "failure": record.failure.as_ref().map(|f| f.message.clone()),
                })),
        )
    }
}

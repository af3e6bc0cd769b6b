// End-to-end flows through the gateway against a temporary project.

use std::fs;

use ag_audit::{AuditAction, AuditLog};
use ag_deploy::{DeployError, DeployLock, DeployMode, DeploymentStatus};
use ag_gateway::{Gateway, GatewayError, GuardConfig};
use ag_identity::AgentIdentity;
use ag_policy::{Decision, ValidationError};
use ag_rbac::{AccessLogFilter, Credentials, PolicyContext, RbacError, Role};
use chrono::{Duration, Utc};
use tempfile::TempDir;

const CANDIDATE: &str = r#"version: "2"
rules:
  - id: block-system-modification
    category: critical
    operation_pattern: 're:^(rm|mv|chmod|chown|edit|modify|write|delete)$'
    target_pattern: 're:^/(etc|usr|boot|sys|proc)(/|$)'
    action: deny
    priority: 100
    rationale: System directories are managed by the OS package manager.

  - id: protect-secrets-dir
    category: high
    operation_pattern: 're:^(write|edit|rm)$'
    target_pattern: 're:^secrets/'
    action: deny
    priority: 60
    rationale: Secrets are rotated by the platform team.

  - id: allow-reads
    category: medium
    operation_pattern: 're:^(read|list|stat)$'
    target_pattern: '*'
    action: allow
    priority: 0
    rationale: Reading outside protected areas is permitted.
"#;

fn admin() -> Credentials {
    Credentials::new("root", "correct-horse")
}

fn project() -> (TempDir, Gateway) {
    let dir = tempfile::tempdir().unwrap();
    let config = GuardConfig::for_project(dir.path());
    Gateway::init(&config).unwrap();
    let gateway = Gateway::open(config)
        .unwrap()
        .with_identity(AgentIdentity::unknown());
    (dir, gateway)
}

#[test]
fn open_requires_init() {
    let dir = tempfile::tempdir().unwrap();
    let result = Gateway::open(GuardConfig::for_project(dir.path()));
    assert!(matches!(result, Err(GatewayError::NotInitialized(_))));
}

#[test]
fn init_is_idempotent_and_keeps_edits() {
    let dir = tempfile::tempdir().unwrap();
    let config = GuardConfig::for_project(dir.path());
    let first = Gateway::init(&config).unwrap();
    assert!(!first.created.is_empty());
    assert!(config.rules_file.exists());
    assert!(config.config_file.exists());

    fs::write(&config.config_file, "[cache]\ncapacity = 7\n").unwrap();
    let second = Gateway::init(&config).unwrap();
    assert!(second.created.is_empty());

    let reloaded = GuardConfig::load(dir.path()).unwrap();
    assert_eq!(reloaded.settings.cache.capacity, 7);
}

#[test]
fn agent_requests_are_decided_without_a_session() {
    let (_dir, gateway) = project();

    let denied = gateway.intercept("rm", "/etc/passwd").unwrap();
    assert_eq!(denied.decision, Decision::Deny);
    assert_eq!(denied.rule_id(), "block-system-modification");

    let allowed = gateway.intercept("read", "src/main.rs").unwrap();
    assert_eq!(allowed.decision, Decision::Allow);

    let before = gateway.monitor().error_window().count();
    assert!(matches!(
        gateway.intercept("", "src/main.rs"),
        Err(GatewayError::Validation(ValidationError::EmptyOperation))
    ));
    assert_eq!(gateway.monitor().error_window().count(), before + 1);
}

#[test]
fn viewer_cannot_deploy_and_admin_deploy_takes_effect() {
    let (dir, gateway) = project();
    assert!(gateway.bootstrap_admin(&admin()).unwrap());
    let root = gateway.login(&admin()).unwrap();

    let viewer = Credentials::new("viewer", "read-only-pass");
    gateway.add_user(&root.id, &viewer, Role::Viewer).unwrap();
    let viewer_session = gateway.login(&viewer).unwrap();

    let candidate = dir.path().join("candidate.yaml");
    fs::write(&candidate, CANDIDATE).unwrap();

    let denied = gateway.deploy(&viewer_session.id, &candidate, DeployMode::Safe);
    assert!(matches!(
        denied,
        Err(GatewayError::Rbac(RbacError::PermissionDenied { .. }))
    ));
    assert_eq!(gateway.store().current().version(), "1");

    let before = gateway.check(&root.id, "write", "secrets/prod.env").unwrap();
    assert_eq!(before.decision, Decision::Allow);

    let record = gateway.deploy(&root.id, &candidate, DeployMode::Safe).unwrap();
    assert_eq!(record.status, DeploymentStatus::Committed, "{:?}", record.failure);
    assert_eq!(gateway.store().current().version(), "2");

    let after = gateway.check(&root.id, "write", "secrets/prod.env").unwrap();
    assert_eq!(after.decision, Decision::Deny);
    assert_eq!(after.rule_id(), "protect-secrets-dir");

    assert_eq!(gateway.deployments(&root.id).unwrap().len(), 1);
    assert!(gateway.audit_verify(&root.id).unwrap().events > 0);

    let events = AuditLog::read_all(&gateway.config().audit_log).unwrap();
    assert!(events
        .iter()
        .any(|e| e.action == AuditAction::Deployment && e.allowed));
    assert!(events
        .iter()
        .any(|e| e.action == AuditAction::PermissionCheck && e.actor == "viewer" && !e.allowed));
}

#[test]
fn dry_run_leaves_no_record() {
    let (dir, gateway) = project();
    gateway.bootstrap_admin(&admin()).unwrap();
    let root = gateway.login(&admin()).unwrap();

    let candidate = dir.path().join("candidate.yaml");
    fs::write(&candidate, CANDIDATE).unwrap();
    let record = gateway.deploy(&root.id, &candidate, DeployMode::DryRun).unwrap();
    assert_eq!(record.status, DeploymentStatus::Pending);
    assert!(gateway.deployments(&root.id).unwrap().is_empty());
    assert_eq!(gateway.store().current().version(), "1");
}

#[test]
fn named_backup_can_be_restored() {
    let (dir, gateway) = project();
    gateway.bootstrap_admin(&admin()).unwrap();
    let root = gateway.login(&admin()).unwrap();

    let backup = gateway.backup(&root.id, Some("known-good")).unwrap();
    assert_eq!(backup.id, "known-good");
    assert_eq!(backup.deployment_version, "1");

    let candidate = dir.path().join("candidate.yaml");
    fs::write(&candidate, CANDIDATE).unwrap();
    gateway.deploy(&root.id, &candidate, DeployMode::Safe).unwrap();
    assert_eq!(gateway.store().current().version(), "2");

    let restored = gateway.restore(&root.id, "known-good").unwrap();
    assert_eq!(restored.status, DeploymentStatus::Committed);
    assert_eq!(gateway.store().current().version(), "1");
    assert!(gateway
        .list_backups(&root.id)
        .unwrap()
        .iter()
        .any(|b| b.id == "known-good"));
}

#[test]
fn audit_report_counts_denials() {
    let (_dir, gateway) = project();
    gateway.bootstrap_admin(&admin()).unwrap();
    let root = gateway.login(&admin()).unwrap();
    let auditor = Credentials::new("auditor", "audit-all-the-things");
    gateway
        .add_user(&root.id, &auditor, Role::SecurityAuditor)
        .unwrap();
    let auditor_session = gateway.login(&auditor).unwrap();

    assert!(gateway.backup(&auditor_session.id, None).is_err());
    gateway.health(&auditor_session.id, ag_monitor::CheckMode::Quick).unwrap();

    let now = Utc::now();
    let report = gateway
        .audit_report(&auditor_session.id, now - Duration::hours(1), now + Duration::hours(1))
        .unwrap();
    let stats = report
        .users
        .iter()
        .find(|u| u.username == "auditor")
        .unwrap();
    assert_eq!(stats.denied, 1);
    assert!(stats.granted >= 2);
}

fn open_again(dir: &TempDir) -> Gateway {
    Gateway::open(GuardConfig::for_project(dir.path()))
        .unwrap()
        .with_identity(AgentIdentity::unknown())
}

#[test]
fn deployment_by_one_gateway_is_enforced_by_another() {
    let (dir, daemon) = project();
    let operator = open_again(&dir);
    operator.bootstrap_admin(&admin()).unwrap();
    let root = operator.login(&admin()).unwrap();

    let cached = daemon.intercept("write", "secrets/key").unwrap();
    assert_eq!(cached.decision, Decision::Allow);
    assert!(daemon.cache().metrics().entries > 0);

    let candidate = dir.path().join("candidate.yaml");
    fs::write(&candidate, CANDIDATE).unwrap();
    let record = operator.deploy(&root.id, &candidate, DeployMode::Safe).unwrap();
    assert_eq!(record.status, DeploymentStatus::Committed, "{:?}", record.failure);

    let after = daemon.intercept("write", "secrets/key").unwrap();
    assert_eq!(after.decision, Decision::Deny);
    assert_eq!(after.rule_id(), "protect-secrets-dir");
    assert_eq!(daemon.store().current().version(), "2");
    assert!(!daemon.refresh_rules());
}

#[test]
fn deployment_is_refused_while_another_process_deploys() {
    let (dir, gateway) = project();
    gateway.bootstrap_admin(&admin()).unwrap();
    let root = gateway.login(&admin()).unwrap();
    let candidate = dir.path().join("candidate.yaml");
    fs::write(&candidate, CANDIDATE).unwrap();

    let held = DeployLock::try_acquire(&gateway.config().deploy_lock)
        .unwrap()
        .unwrap();
    assert!(matches!(
        gateway.deploy(&root.id, &candidate, DeployMode::Safe),
        Err(GatewayError::Deploy(DeployError::DeploymentInProgress))
    ));
    assert_eq!(gateway.store().current().version(), "1");

    drop(held);
    let record = gateway.deploy(&root.id, &candidate, DeployMode::Safe).unwrap();
    assert_eq!(record.status, DeploymentStatus::Committed);
}

#[test]
fn unreadable_artifact_on_disk_keeps_the_active_rules() {
    let (_dir, gateway) = project();
    fs::write(&gateway.config().rules_file, "rules: [[[").unwrap();
    assert!(!gateway.refresh_rules());
    let denied = gateway.intercept("rm", "/etc/passwd").unwrap();
    assert_eq!(denied.rule_id(), "block-system-modification");
}

#[test]
fn summaries_of_others_need_view_logs() {
    let (_dir, gateway) = project();
    gateway.bootstrap_admin(&admin()).unwrap();
    let root = gateway.login(&admin()).unwrap();
    let agent = Credentials::new("agent", "agent-password");
    gateway.add_user(&root.id, &agent, Role::AiAgent).unwrap();
    let agent_session = gateway.login(&agent).unwrap();

    let own = gateway.user_summary(&agent_session.id, "agent").unwrap();
    assert_eq!(own.role, Role::AiAgent);
    assert!(matches!(
        gateway.user_summary(&agent_session.id, "root"),
        Err(GatewayError::Rbac(RbacError::PermissionDenied { .. }))
    ));
    assert!(gateway
        .access_logs(&agent_session.id, &AccessLogFilter::default())
        .is_err());

    let denials = gateway
        .access_logs(&root.id, &AccessLogFilter::for_user("agent"))
        .unwrap();
    assert!(denials.iter().any(|e| !e.allowed));
    assert!(denials.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}

#[test]
fn agent_policy_is_evaluated_against_context() {
    let (_dir, gateway) = project();
    gateway.bootstrap_admin(&admin()).unwrap();
    let root = gateway.login(&admin()).unwrap();
    let agent = Credentials::new("agent", "agent-password");
    gateway.add_user(&root.id, &agent, Role::AiAgent).unwrap();
    let session = gateway.login(&agent).unwrap();

    let context = PolicyContext::new("ai_rules:validate")
        .with("agent_type", "claude")
        .with("session_timeout", 3600);
    assert!(gateway
        .evaluate_policy(&session.id, "ai_agent_basic_access", &context)
        .unwrap());
    assert!(!gateway
        .evaluate_policy(&session.id, "ai_agent_basic_access", &PolicyContext::new("deploy:prod"))
        .unwrap());
    assert!(!gateway
        .evaluate_policy(&session.id, "viewer_readonly", &context.with("read_only", true))
        .unwrap());
    assert_eq!(gateway.policies().len(), 3);
}

#[test]
fn logout_in_one_process_ends_the_session_in_another() {
    let (dir, daemon) = project();
    daemon.bootstrap_admin(&admin()).unwrap();
    let root = daemon.login(&admin()).unwrap();
    assert!(daemon.whoami(&root.id).is_ok());

    let cli = open_again(&dir);
    assert!(cli.logout(&root.id).unwrap());
    assert!(matches!(
        daemon.whoami(&root.id),
        Err(GatewayError::Rbac(RbacError::SessionNotFound))
    ));
}

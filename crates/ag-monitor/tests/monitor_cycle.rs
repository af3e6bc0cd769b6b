// End-to-end monitor cycles against a real rule store and alert log.

use std::sync::Arc;

use ag_monitor::{
    replay, CheckMode, ComplianceMonitor, HealthStatus, JsonlAlertSink, MonitorSettings,
    TracingAlertSink,
};
use ag_policy::{DecisionCache, RuleArtifact, RuleStore};

#[test]
fn integrity_breach_is_alerted_and_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let artifact_path = dir.path().join("rules.yaml");
    let alert_log = dir.path().join("alerts.jsonl");

    let store = Arc::new(RuleStore::from_artifact(RuleArtifact::builtin().unwrap()).unwrap());
    store.persist(&artifact_path).unwrap();
    let settings = MonitorSettings {
        artifact_path: Some(artifact_path.clone()),
        ..MonitorSettings::default()
    };
    let monitor = ComplianceMonitor::standard(
        Arc::clone(&store),
        Arc::new(DecisionCache::new(100)),
        &settings,
    )
    .unwrap()
    .with_sink(Box::new(JsonlAlertSink::new(&alert_log)))
    .with_sink(Box::new(TracingAlertSink));

    let report = monitor.run_cycle(CheckMode::Quick);
    assert_eq!(report.overall, HealthStatus::Healthy);
    assert_eq!(report.components.len(), 2);
    assert!(report.components.contains_key("rule_integrity"));
    assert!(report.components.contains_key("cache"));

    std::fs::write(&artifact_path, "version: [unterminated").unwrap();
    let report = monitor.run_cycle(CheckMode::Quick);
    assert_eq!(report.overall, HealthStatus::Unhealthy);

    store.persist(&artifact_path).unwrap();
    assert_eq!(monitor.run_cycle(CheckMode::Quick).overall, HealthStatus::Healthy);

    let alerts = replay(&alert_log).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].source_component, "rule_integrity");
    assert_eq!(alerts[0].signature, "artifact_unparseable");
    assert!(alerts[0].resolved);
}

#[test]
fn full_mode_adds_resource_and_error_probes() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("agent.log");
    std::fs::write(&log, "INFO ok\n").unwrap();

    let store = Arc::new(RuleStore::from_artifact(RuleArtifact::builtin().unwrap()).unwrap());
    let settings = MonitorSettings {
        log_files: vec![log],
        ..MonitorSettings::default()
    };
    let monitor =
        ComplianceMonitor::standard(store, Arc::new(DecisionCache::new(100)), &settings).unwrap();

    let report = monitor.run_cycle(CheckMode::Full);
    assert_eq!(report.components.len(), 4);
    assert_eq!(report.components["error_rate"].status, HealthStatus::Healthy);
    assert!(report.components.contains_key("resources"));
}

#[test]
fn recorded_errors_drive_error_rate() {
    let store = Arc::new(RuleStore::from_artifact(RuleArtifact::builtin().unwrap()).unwrap());
    let monitor = ComplianceMonitor::standard(
        store,
        Arc::new(DecisionCache::new(100)),
        &MonitorSettings::default(),
    )
    .unwrap();

    for _ in 0..30 {
        monitor.record_error();
    }
    let report = monitor.run_cycle(CheckMode::Full);
    assert_eq!(report.components["error_rate"].status, HealthStatus::Unhealthy);
}

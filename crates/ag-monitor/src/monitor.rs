// monitor.rs — Runs probes, builds reports and drives the alert lifecycle.
//
// A cycle runs every probe enabled for the mode. A probe that fails to
// measure is reported degraded (signature `probe_failed`) and the cycle
// continues. For each component:
//   - not healthy → raise (or repeat) the alert for its signature
//   - anything else firing from that component → resolved
// New and resolved alerts go to every sink; sink failures are logged only.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ag_policy::{DecisionCache, RuleStore};
use uuid::Uuid;

use crate::alert::{Alert, AlertBook, AlertSeverity, AlertUpdate};
use crate::error_rate::{ErrorRateProbe, ErrorWindow, LogScanner};
use crate::health::{CheckMode, ComponentStatus, HealthCheckReport, HealthStatus, Thresholds};
use crate::probe::{CacheProbe, HealthProbe, RuleIntegrityProbe};
use crate::resources::{ResourceProbe, SysinfoSampler};
use crate::sink::{AlertEventKind, AlertRecord, AlertSink};

/// Inputs for the standard probe set.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub thresholds: Thresholds,
    /// Artifact whose fingerprint must match the active rule set.
    pub artifact_path: Option<PathBuf>,
    /// Log files scanned for error lines in full mode.
    pub log_files: Vec<PathBuf>,
    pub error_pattern: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            artifact_path: None,
            log_files: Vec::new(),
            error_pattern: crate::error_rate::DEFAULT_ERROR_PATTERN.to_string(),
        }
    }
}

pub struct ComplianceMonitor {
    probes: Vec<Box<dyn HealthProbe>>,
    sinks: Vec<Box<dyn AlertSink>>,
    alerts: Mutex<AlertBook>,
    errors: Arc<ErrorWindow>,
    last_report: Mutex<Option<HealthCheckReport>>,
}

impl ComplianceMonitor {
    /// A monitor with no probes or sinks.
    pub fn new(errors: Arc<ErrorWindow>) -> Self {
        Self {
            probes: Vec::new(),
            sinks: Vec::new(),
            alerts: Mutex::new(AlertBook::new()),
            errors,
            last_report: Mutex::new(None),
        }
    }

    /// Rule integrity, cache, resources and error-rate probes.
    pub fn standard(
        store: Arc<RuleStore>,
        cache: Arc<DecisionCache>,
        settings: &MonitorSettings,
    ) -> Result<Self, regex::Error> {
        let t = &settings.thresholds;
        let errors = Arc::new(ErrorWindow::new(Duration::from_secs(t.error_window_secs)));

        let mut integrity = RuleIntegrityProbe::new(store);
        if let Some(path) = &settings.artifact_path {
            integrity = integrity.with_artifact(path);
        }
        let mut error_rate = ErrorRateProbe::new(Arc::clone(&errors), t.error_rate_per_minute);
        if !settings.log_files.is_empty() {
            error_rate = error_rate.with_scanner(LogScanner::new(
                settings.log_files.clone(),
                &settings.error_pattern,
            )?);
        }

        Ok(Self::new(errors)
            .with_probe(Box::new(integrity))
            .with_probe(Box::new(CacheProbe::new(cache, t)))
            .with_probe(Box::new(ResourceProbe::new(
                Box::new(SysinfoSampler::new()),
                t.cpu_percent,
                t.memory_percent,
            )))
            .with_probe(Box::new(error_rate)))
    }

    pub fn with_probe(mut self, probe: Box<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Shared window that callers feed with operational errors.
    pub fn error_window(&self) -> Arc<ErrorWindow> {
        Arc::clone(&self.errors)
    }

    pub fn record_error(&self) {
        self.errors.record();
    }

    fn book(&self) -> MutexGuard<'_, AlertBook> {
        match self.alerts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run one cycle and return its report.
    pub fn run_cycle(&self, mode: CheckMode) -> HealthCheckReport {
        let mut components = BTreeMap::new();
        for probe in self.probes.iter().filter(|p| p.runs_in(mode)) {
            let status = match probe.check() {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(probe = probe.name(), error = %e, "health probe failed");
                    ComponentStatus::degraded("probe_failed", e.to_string())
                }
            };
            components.insert(probe.name().to_string(), status);
        }

        let report = HealthCheckReport::new(mode, components);
        self.update_alerts(&report);

        tracing::info!(
            mode = %mode,
            overall = %report.overall,
            degraded = report.count(HealthStatus::Degraded),
            unhealthy = report.count(HealthStatus::Unhealthy),
            "health check complete"
        );

        let mut last = match self.last_report.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last = Some(report.clone());
        report
    }

    fn update_alerts(&self, report: &HealthCheckReport) {
        let mut records = Vec::new();
        {
            let mut book = self.book();
            for (component, status) in &report.components {
                let firing = match (status.status, status.signature.as_deref()) {
                    (HealthStatus::Healthy, _) | (_, None) => None,
                    (level, Some(signature)) => {
                        let severity = AlertSeverity::for_status(level);
                        if let AlertUpdate::Raised(alert) =
                            book.raise(component, signature, severity, status.detail.clone())
                        {
                            records.push(AlertRecord {
                                kind: AlertEventKind::Raised,
                                alert,
                            });
                        }
                        Some(signature)
                    }
                };
                for alert in book.resolve_cleared(component, firing) {
                    records.push(AlertRecord {
                        kind: AlertEventKind::Resolved,
                        alert,
                    });
                }
            }
        }
        for record in &records {
            self.dispatch(record);
        }
    }

    fn dispatch(&self, record: &AlertRecord) {
        for sink in &self.sinks {
            if let Err(e) = sink.emit(record) {
                tracing::error!(alert_id = %record.alert.id, error = %e, "alert sink failed");
            }
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.book().active()
    }

    /// Manually resolve an alert. Returns `None` if it is not active.
    pub fn resolve_alert(&self, id: Uuid) -> Option<Alert> {
        let resolved = self.book().resolve(id)?;
        let record = AlertRecord {
            kind: AlertEventKind::Resolved,
            alert: resolved.clone(),
        };
        self.dispatch(&record);
        Some(resolved)
    }

    pub fn last_report(&self) -> Option<HealthCheckReport> {
        match self.last_report.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

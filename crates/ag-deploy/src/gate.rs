// gate.rs — The health check a deployment waits on.

use ag_monitor::{CheckMode, ComplianceMonitor, HealthCheckReport};

/// Anything that can produce a health report on demand.
///
/// Implemented for [`ComplianceMonitor`]; tests substitute scripted gates.
pub trait HealthGate: Send + Sync {
    fn check_health(&self, mode: CheckMode) -> HealthCheckReport;
}

impl HealthGate for ComplianceMonitor {
    fn check_health(&self, mode: CheckMode) -> HealthCheckReport {
        self.run_cycle(mode)
    }
}

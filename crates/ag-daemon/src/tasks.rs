// tasks.rs — Periodic background work: monitor cycles and housekeeping.

use std::sync::Arc;
use std::time::Duration;

use ag_gateway::Gateway;
use ag_monitor::{CheckMode, HealthStatus};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Run a full monitor cycle every `every`. Probes may block (log scans,
/// resource sampling), so each cycle runs on the blocking pool.
pub fn spawn_monitor(gateway: Arc<Gateway>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let monitor = Arc::clone(gateway.monitor());
            match tokio::task::spawn_blocking(move || monitor.run_cycle(CheckMode::Full)).await {
                Ok(report) if report.overall != HealthStatus::Healthy => {
                    tracing::warn!(overall = %report.overall, "monitor cycle not healthy");
                }
                Ok(_) => tracing::debug!("monitor cycle healthy"),
                Err(e) => tracing::error!(error = %e, "monitor cycle panicked"),
            }
        }
    })
}

/// Drop expired cache entries and sessions every `every`.
pub fn spawn_sweeper(gateway: Arc<Gateway>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing has expired yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep(&gateway);
        }
    })
}

pub fn sweep(gateway: &Gateway) {
    let entries = gateway.cache().sweep_expired();
    let sessions = match gateway.access().purge_expired() {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "session purge failed");
            0
        }
    };
    if entries > 0 || sessions > 0 {
        tracing::info!(entries, sessions, "swept expired state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_gateway::GuardConfig;

    #[tokio::test]
    async fn monitor_task_runs_a_cycle_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let config = GuardConfig::for_project(dir.path());
        Gateway::init(&config).unwrap();
        let gateway = Arc::new(Gateway::open(config).unwrap());
        assert!(gateway.monitor().last_report().is_none());

        let task = spawn_monitor(Arc::clone(&gateway), Duration::from_secs(3600));
        let mut waited = Duration::ZERO;
        while gateway.monitor().last_report().is_none() && waited < Duration::from_secs(10) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        task.abort();
        let report = gateway.monitor().last_report().unwrap();
        assert_eq!(report.mode, CheckMode::Full);
    }
}

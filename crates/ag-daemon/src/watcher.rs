// watcher.rs — Reload the rule set when another process rewrites it.
//
// Artifacts are replaced by rename, so the directory is watched rather than
// the file. Events are only a hint: the reload compares fingerprints and
// does nothing when the rules did not change.

use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ag_gateway::Gateway;

pub struct RulesWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl RulesWatcher {
    pub fn spawn(gateway: Arc<Gateway>) -> Result<Self> {
        let rules_file = gateway.config().rules_file.clone();
        let dir = rules_file
            .parent()
            .context("rule artifact has no parent directory")?
            .to_path_buf();
        let file_name = rules_file.file_name().map(|n| n.to_os_string());

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref())
                    {
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "rule artifact watch error"),
            }
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        tracing::info!(path = %rules_file.display(), "watching rule artifact");

        Ok(Self {
            _watcher: watcher,
            task: tokio::spawn(reload_loop(gateway, rx)),
        })
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn reload_loop(gateway: Arc<Gateway>, mut events: mpsc::UnboundedReceiver<()>) {
    while events.recv().await.is_some() {
        // One write raises several events; reload once for the burst.
        while events.try_recv().is_ok() {}
        let gateway = Arc::clone(&gateway);
        match tokio::task::spawn_blocking(move || gateway.refresh_rules()).await {
            Ok(true) => tracing::debug!("rule set reloaded after external change"),
            Ok(false) => tracing::trace!("artifact event without a rule change"),
            Err(e) => tracing::error!(error = %e, "rule reload panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_gateway::GuardConfig;
    use ag_policy::RuleArtifact;
    use std::time::Duration;

    #[tokio::test]
    async fn external_artifact_write_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let config = GuardConfig::for_project(dir.path());
        Gateway::init(&config).unwrap();
        let rules_file = config.rules_file.clone();
        let gateway = Arc::new(Gateway::open(config).unwrap());
        let watcher = RulesWatcher::spawn(Arc::clone(&gateway)).unwrap();

        let mut next = RuleArtifact::builtin().unwrap();
        next.version = "edited-elsewhere".to_string();
        next.rules.pop();
        next.write_atomic(&rules_file).unwrap();

        let mut waited = Duration::ZERO;
        while gateway.store().current().version() != "edited-elsewhere"
            && waited < Duration::from_secs(10)
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        watcher.abort();
        assert_eq!(gateway.store().current().version(), "edited-elsewhere");
    }
}

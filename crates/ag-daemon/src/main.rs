//! # ag-daemon
//!
//! Agent Guard background daemon.
//!
//! Runs the compliance monitor and the cache/session sweep on their
//! configured intervals, reloads the rule set when another process deploys,
//! and answers interception requests from agents on
//! `.ag/guard.sock` (newline-delimited JSON, one response line per request):
//!
//! ```text
//! {"type":"intercept","operation":"rm","target":"/etc/hosts"}
//! {"type":"intercept_batch","requests":[{"operation":"read","target":"a"}]}
//! {"type":"health","mode":"full"}
//! {"type":"ping"}
//! ```

mod server;
mod tasks;
mod watcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ag_gateway::{Gateway, GuardConfig};

/// Agent Guard daemon.
#[derive(Parser)]
#[command(name = "ag-daemon", about = "Agent Guard monitor and interception socket")]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("ag_daemon=info".parse()?)
        .add_directive("ag_gateway=info".parse()?)
        .add_directive("ag_policy=info".parse()?)
        .add_directive("ag_monitor=info".parse()?)
        .add_directive("ag_deploy=info".parse()?)
        .add_directive("ag_rbac=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let project_root = cli
        .project_root
        .canonicalize()
        .with_context(|| format!("Project root {} not found", cli.project_root.display()))?;
    let config = GuardConfig::load(&project_root).context("Failed to load configuration")?;
    let monitor_every = Duration::from_secs(config.settings.monitor.interval_secs.max(1));
    let sweep_every = Duration::from_secs(config.settings.cache.sweep_interval_secs.max(1));
    let socket_path = config.socket_path.clone();

    tracing::info!(root = %project_root.display(), "starting Agent Guard daemon");
    let gateway = Arc::new(Gateway::open(config)?);
    tracing::info!(
        agent = %gateway.identity().name,
        confidence = gateway.identity().confidence,
        "agent identity detected"
    );

    let listener = server::bind(&socket_path)?;
    let monitor = tasks::spawn_monitor(Arc::clone(&gateway), monitor_every);
    let sweeper = tasks::spawn_sweeper(Arc::clone(&gateway), sweep_every);
    // Without the watcher, rules are still re-read before each decision.
    let rules_watcher = match watcher::RulesWatcher::spawn(Arc::clone(&gateway)) {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "rule artifact watcher unavailable");
            None
        }
    };

    tokio::select! {
        result = server::serve(listener, Arc::clone(&gateway)) => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "socket server stopped");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    monitor.abort();
    sweeper.abort();
    if let Some(w) = &rules_watcher {
        w.abort();
    }
    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!(error = %e, "socket already gone");
    }
    tracing::info!("Agent Guard daemon stopped");
    Ok(())
}

//! # ag-cli
//!
//! Command-line interface for Agent Guard.
//!
//! - `ag init`: create `.ag/` with default rules and config
//! - `ag login/logout/whoami`: operator sessions and the detected agent
//! - `ag check`: ask the policy engine about an operation
//! - `ag deploy/rollback/deployments`: roll rule sets out safely
//! - `ag backup/restore/list-backups`: named rule set backups
//! - `ag health/alerts`: compliance monitor
//! - `ag user add/deactivate/list/show`: manage operator accounts
//! - `ag policy list/eval`: named access policies
//! - `ag audit verify/tail/log/report`: inspect the tamper-evident audit trail

mod commands;
mod exit;

use std::path::PathBuf;
use std::process::ExitCode;

use ag_deploy::DeployMode;
use ag_gateway::{Gateway, GuardConfig};
use ag_monitor::CheckMode;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use exit::Outcome;

/// Agent Guard: policy enforcement and rule deployment for coding agents.
#[derive(Parser)]
#[command(name = "ag", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".", global = true)]
    project_root: PathBuf,

    /// Log progress to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the .ag/ directory with default rules and config.
    Init {
        /// Also create the first administrator account (password from
        /// prompt or stdin).
        #[arg(long)]
        admin: Option<String>,
    },
    /// Open an operator session (password from prompt or stdin).
    Login { username: String },
    /// End the current session.
    Logout,
    /// Show the detected agent and the logged-in operator.
    Whoami,
    /// Ask whether an operation on a target would be allowed.
    Check {
        operation: String,
        target: String,
        /// Show every rule inspected.
        #[arg(long)]
        explain: bool,
    },
    /// Deploy a rule artifact.
    Deploy {
        artifact: PathBuf,
        /// safe, force or dry-run.
        #[arg(long, default_value = "safe")]
        mode: DeployMode,
    },
    /// Run a health check.
    Health {
        /// quick or full.
        #[arg(default_value = "quick")]
        mode: CheckMode,
    },
    /// Back up the active rule set.
    Backup {
        /// Backup name (generated when omitted).
        name: Option<String>,
    },
    /// Restore a named backup through a safe deployment.
    Restore { name: String },
    /// List backups, newest first.
    ListBackups,
    /// Roll back an in-flight deployment to its backup.
    Rollback { deployment_id: uuid::Uuid },
    /// List deployments, newest first.
    Deployments,
    /// Show unresolved alerts.
    Alerts,
    /// Manage operator accounts.
    User {
        #[command(subcommand)]
        command: commands::access::UserCommands,
    },
    /// Named access policies.
    Policy {
        #[command(subcommand)]
        command: commands::access::PolicyCommands,
    },
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit::error_code(&e))
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<Outcome> {
    let project_root = cli
        .project_root
        .canonicalize()
        .unwrap_or_else(|_| cli.project_root.clone());
    let config = GuardConfig::load(&project_root)?;

    if let Commands::Init { admin } = &cli.command {
        return commands::init::execute(config, admin.as_deref());
    }

    let gateway = Gateway::open(config)?;
    match &cli.command {
        Commands::Init { .. } => Ok(Outcome::Success),
        Commands::Login { username } => commands::access::login(&gateway, username),
        Commands::Logout => commands::access::logout(&gateway),
        Commands::Whoami => commands::access::whoami(&gateway),
        Commands::Check {
            operation,
            target,
            explain,
        } => commands::check::execute(&gateway, operation, target, *explain),
        Commands::Deploy { artifact, mode } => commands::deploy::deploy(&gateway, artifact, *mode),
        Commands::Rollback { deployment_id } => commands::deploy::rollback(&gateway, *deployment_id),
        Commands::Deployments => commands::deploy::list(&gateway),
        Commands::Backup { name } => commands::backup::create(&gateway, name.as_deref()),
        Commands::Restore { name } => commands::backup::restore(&gateway, name),
        Commands::ListBackups => commands::backup::list(&gateway),
        Commands::Health { mode } => commands::health::health(&gateway, *mode),
        Commands::Alerts => commands::health::alerts(&gateway),
        Commands::User { command } => commands::access::execute_user(command, &gateway),
        Commands::Policy { command } => commands::access::execute_policy(command, &gateway),
        Commands::Audit { command } => commands::audit::execute(command, &gateway),
    }
}

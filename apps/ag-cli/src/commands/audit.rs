// audit.rs — Audit subcommands: verify, tail, log, report.

use ag_audit::{AuditError, AuditEvent};
use ag_gateway::{Gateway, GatewayError};
use ag_rbac::AccessLogFilter;
use chrono::{Duration, Utc};
use clap::Subcommand;

use super::session;
use crate::exit::Outcome;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the audit log hash chain integrity.
    Verify,
    /// Show recent audit events.
    Tail {
        /// Number of events to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
    /// Query audited actions, newest first.
    Log {
        /// Only actions by this user.
        #[arg(long)]
        user: Option<String>,
        /// Only the last N hours.
        #[arg(long)]
        hours: Option<i64>,
        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Per-user access statistics over a recent window.
    Report {
        /// Window length in hours, ending now.
        #[arg(long, default_value = "24")]
        hours: i64,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

pub fn execute(cmd: &AuditCommands, gateway: &Gateway) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    match cmd {
        AuditCommands::Verify => match gateway.audit_verify(&session_id) {
            Ok(report) => {
                println!("Audit log verified: {} event(s), hash chain intact.", report.events);
                if let Some(head) = report.head {
                    println!("Chain head: {}", head);
                }
            }
            Err(GatewayError::Audit(AuditError::IntegrityViolation {
                line,
                expected,
                actual,
            })) => {
                println!("Chain broken at line {line}");
                println!("  links to: {actual}");
                println!("  expected: {expected}");
                anyhow::bail!("audit log failed verification; it was edited, truncated or reordered");
            }
            Err(e) => return Err(e.into()),
        },

        AuditCommands::Tail { n } => {
            print_events(&gateway.audit_tail(&session_id, *n)?);
        }

        AuditCommands::Log { user, hours, limit } => {
            let mut filter = AccessLogFilter {
                username: user.clone(),
                limit: *limit,
                ..AccessLogFilter::default()
            };
            if let Some(hours) = hours {
                let end = Utc::now();
                filter = filter.between(end - Duration::hours((*hours).max(1)), end);
            }
            print_events(&gateway.access_logs(&session_id, &filter)?);
        }

        AuditCommands::Report { hours, json } => {
            let end = Utc::now();
            let start = end - Duration::hours((*hours).max(1));
            let report = gateway.audit_report(&session_id, start, end)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(Outcome::Success);
            }
            println!(
                "Access report {} .. {}",
                report.period_start.format("%Y-%m-%d %H:%M"),
                report.period_end.format("%Y-%m-%d %H:%M")
            );
            println!();
            println!("{:<24} {:>6} {:>8} {:>7} {:>8}", "USER", "CHECKS", "GRANTED", "DENIED", "SUCCESS");
            println!("{}", "-".repeat(58));
            for u in &report.users {
                println!(
                    "{:<24} {:>6} {:>8} {:>7} {:>7.1}%",
                    u.username, u.total, u.granted, u.denied, u.success_rate
                );
            }
            if !report.permission_usage.is_empty() {
                println!();
                println!("{:<20} GRANTED", "PERMISSION");
                for p in &report.permission_usage {
                    println!("{:<20} {}", p.permission, p.granted);
                }
            }
            println!();
            println!("Failed logins: {}", report.failed_logins);
        }
    }
    Ok(Outcome::Success)
}

pub(super) fn print_events(events: &[AuditEvent]) {
    if events.is_empty() {
        println!("No audit events.");
        return;
    }
    println!(
        "{:<20} {:<12} {:<17} {:<6} TARGET",
        "TIMESTAMP", "ACTOR", "ACTION", "OK"
    );
    println!("{}", "-".repeat(80));
    for event in events {
        println!(
            "{:<20} {:<12} {:<17} {:<6} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.actor,
            event.action.to_string(),
            if event.allowed { "yes" } else { "no" },
            event.target.as_deref().unwrap_or("-"),
        );
    }
}

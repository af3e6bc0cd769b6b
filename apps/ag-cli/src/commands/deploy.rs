// deploy.rs — `ag deploy`, `ag rollback` and `ag deployments`.

use std::path::Path;

use ag_deploy::{DeployMode, DeploymentRecord, DeploymentStatus, FailureKind};
use ag_gateway::Gateway;
use ag_policy::LintSeverity;
use uuid::Uuid;

use super::{session, short};
use crate::exit::Outcome;

pub fn deploy(gateway: &Gateway, artifact: &Path, mode: DeployMode) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    let record = gateway.deploy(&session_id, artifact, mode)?;
    print_record(&record);
    if mode == DeployMode::DryRun {
        let blocked = record.status == DeploymentStatus::Failed
            || record.lint.iter().any(|f| f.severity == LintSeverity::Error);
        println!();
        println!(
            "Dry run: nothing applied. The rule set {}.",
            if blocked { "would be rejected" } else { "would be accepted" }
        );
        return Ok(if blocked {
            Outcome::ValidationFailed
        } else {
            Outcome::Success
        });
    }
    Ok(outcome(&record))
}

pub fn rollback(gateway: &Gateway, deployment_id: Uuid) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    let record = gateway.rollback(&session_id, deployment_id)?;
    print_record(&record);
    Ok(rollback_outcome(&record))
}

/// Only a record that ended rolled back is a successful rollback.
fn rollback_outcome(record: &DeploymentRecord) -> Outcome {
    match record.status {
        DeploymentStatus::RolledBack => Outcome::Success,
        _ => Outcome::Failed,
    }
}

pub fn list(gateway: &Gateway) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    let records = gateway.deployments(&session_id)?;
    if records.is_empty() {
        println!("No deployments.");
        return Ok(Outcome::Success);
    }
    println!(
        "{:<10} {:<12} {:<8} {:<13} {:<20} BACKUP",
        "ID", "VERSION", "MODE", "STATUS", "STARTED"
    );
    println!("{}", "-".repeat(90));
    for r in &records {
        println!(
            "{:<10} {:<12} {:<8} {:<13} {:<20} {}",
            short(&r.deployment_id.to_string(), 8),
            r.version,
            r.mode.to_string(),
            r.status.to_string(),
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            r.backup_id.as_deref().unwrap_or("-"),
        );
    }
    Ok(Outcome::Success)
}

fn outcome(record: &DeploymentRecord) -> Outcome {
    match record.status {
        DeploymentStatus::RolledBack => Outcome::HealthCheckFailed,
        DeploymentStatus::Failed => match record.failure.as_ref().map(|f| f.kind) {
            Some(FailureKind::Validation) => Outcome::ValidationFailed,
            Some(FailureKind::HealthCheck) | Some(FailureKind::Timeout) => {
                Outcome::HealthCheckFailed
            }
            _ => Outcome::Failed,
        },
        _ => Outcome::Success,
    }
}

fn print_record(record: &DeploymentRecord) {
    println!("Deployment {}", record.deployment_id);
    println!("  version:  {} (was {})", record.version, record.previous_version);
    println!("  mode:     {}", record.mode);
    println!("  status:   {} ({})", record.status, record.phase);
    if let Some(backup) = &record.backup_id {
        println!("  backup:   {}", backup);
    }
    if let Some(from) = &record.restored_from {
        println!("  restores: {}", from);
    }
    for finding in &record.lint {
        let severity = match finding.severity {
            LintSeverity::Error => "error",
            LintSeverity::Warning => "warning",
        };
        match &finding.rule_id {
            Some(id) => println!("  {}: [{}] {}", severity, id, finding.message),
            None => println!("  {}: {}", severity, finding.message),
        }
    }
    if let Some(report) = &record.health_report {
        println!("  health:   {}", report.overall);
        for (name, component) in &report.components {
            println!("    {:<16} {:<10} {}", name, component.status.to_string(), component.detail);
        }
    }
    if let Some(failure) = &record.failure {
        println!("  failed in {}: {}", failure.phase, failure.message);
    }
    if let Some(rollback) = &record.rollback_report {
        println!("  rolled back to {}", rollback.fingerprint);
    }
}

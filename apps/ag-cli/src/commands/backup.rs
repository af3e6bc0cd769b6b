// backup.rs — `ag backup`, `ag restore` and `ag list-backups`.

use ag_deploy::DeploymentStatus;
use ag_gateway::Gateway;

use super::{session, short};
use crate::exit::Outcome;

pub fn create(gateway: &Gateway, name: Option<&str>) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    let backup = gateway.backup(&session_id, name)?;
    println!(
        "Backed up rule set v{} as '{}' ({} artifact(s)).",
        backup.deployment_version,
        backup.id,
        backup.manifest.len()
    );
    Ok(Outcome::Success)
}

pub fn restore(gateway: &Gateway, name: &str) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    let record = gateway.restore(&session_id, name)?;
    match record.status {
        DeploymentStatus::Committed => {
            println!(
                "Restored '{}' (rule set v{}) in deployment {}.",
                name, record.version, record.deployment_id
            );
            Ok(Outcome::Success)
        }
        status => {
            println!("Restore of '{}' ended {}.", name, status);
            if let Some(failure) = &record.failure {
                println!("  failed in {}: {}", failure.phase, failure.message);
            }
            Ok(Outcome::HealthCheckFailed)
        }
    }
}

pub fn list(gateway: &Gateway) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    let backups = gateway.list_backups(&session_id)?;
    if backups.is_empty() {
        println!("No backups.");
        return Ok(Outcome::Success);
    }
    println!(
        "{:<44} {:<20} {:<16} {:<10} FINGERPRINT",
        "NAME", "CREATED", "REASON", "VERSION"
    );
    println!("{}", "-".repeat(104));
    for b in &backups {
        println!(
            "{:<44} {:<20} {:<16} {:<10} {}",
            b.id,
            b.created_at.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", b.reason),
            b.deployment_version,
            short(&b.ruleset_fingerprint, 12),
        );
    }
    Ok(Outcome::Success)
}

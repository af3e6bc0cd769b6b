// health.rs — `ag health` and `ag alerts`.

use ag_gateway::Gateway;
use ag_monitor::{CheckMode, HealthStatus};

use super::session;
use crate::exit::Outcome;

pub fn health(gateway: &Gateway, mode: CheckMode) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    let report = gateway.health(&session_id, mode)?;
    println!(
        "Overall: {} ({} check, {})",
        report.overall,
        report.mode,
        report.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("{:<16} {:<10} DETAIL", "COMPONENT", "STATUS");
    println!("{}", "-".repeat(72));
    for (name, component) in &report.components {
        println!(
            "{:<16} {:<10} {}",
            name,
            component.status.to_string(),
            component.detail
        );
    }
    Ok(match report.overall {
        HealthStatus::Unhealthy => Outcome::HealthCheckFailed,
        _ => Outcome::Success,
    })
}

pub fn alerts(gateway: &Gateway) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    let alerts = gateway.alerts(&session_id)?;
    if alerts.is_empty() {
        println!("No open alerts.");
        return Ok(Outcome::Success);
    }
    println!(
        "{:<9} {:<14} {:>5} {:<20} MESSAGE",
        "SEVERITY", "COMPONENT", "SEEN", "LAST"
    );
    println!("{}", "-".repeat(90));
    for a in &alerts {
        println!(
            "{:<9} {:<14} {:>5} {:<20} {}",
            a.severity.to_string(),
            a.source_component,
            a.occurrences,
            a.last_seen.format("%Y-%m-%d %H:%M:%S"),
            a.message,
        );
    }
    Ok(Outcome::Success)
}

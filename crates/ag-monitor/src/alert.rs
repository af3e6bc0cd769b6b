// alert.rs — Alerts and their deduplicated lifecycle.
//
// An alert is keyed by (source_component, signature). Raising an alert
// that is already active only bumps `last_seen` and `occurrences`; once
// the condition clears the alert is resolved and moved to history. A
// resolved alert is never reopened: the same condition recurring later
// produces a new alert.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::health::HealthStatus;

/// Resolved alerts kept in memory.
const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Default severity for a component in the given state.
    pub fn for_status(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy => AlertSeverity::Info,
            HealthStatus::Degraded => AlertSeverity::Medium,
            HealthStatus::Unhealthy => AlertSeverity::High,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub source_component: String,
    pub signature: String,
    pub message: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrences: u64,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// What `AlertBook::raise` did.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertUpdate {
    /// A new alert became active.
    Raised(Alert),
    /// An active alert was seen again. Escalations land here too.
    Repeated(Alert),
}

/// Active alerts plus a bounded history of resolved ones.
#[derive(Debug, Default)]
pub struct AlertBook {
    active: HashMap<(String, String), Alert>,
    history: VecDeque<Alert>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(
        &mut self,
        source: &str,
        signature: &str,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> AlertUpdate {
        let now = Utc::now();
        let message = message.into();
        let key = (source.to_string(), signature.to_string());

        if let Some(existing) = self.active.get_mut(&key) {
            existing.last_seen = now;
            existing.occurrences += 1;
            existing.message = message;
            existing.severity = existing.severity.max(severity);
            return AlertUpdate::Repeated(existing.clone());
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            severity,
            source_component: source.to_string(),
            signature: signature.to_string(),
            message,
            first_seen: now,
            last_seen: now,
            occurrences: 1,
            resolved: false,
            resolved_at: None,
        };
        self.active.insert(key, alert.clone());
        AlertUpdate::Raised(alert)
    }

    /// Resolve every active alert from `source` whose signature is not
    /// `still_firing`. Returns the alerts that were resolved.
    pub fn resolve_cleared(&mut self, source: &str, still_firing: Option<&str>) -> Vec<Alert> {
        let cleared: Vec<(String, String)> = self
            .active
            .keys()
            .filter(|(s, sig)| s == source && Some(sig.as_str()) != still_firing)
            .cloned()
            .collect();
        let mut resolved = Vec::with_capacity(cleared.len());
        for key in cleared {
            if let Some(alert) = self.active.remove(&key) {
                resolved.push(self.retire(alert));
            }
        }
        resolved
    }

    /// Resolve one alert by id, e.g. after manual acknowledgement.
    pub fn resolve(&mut self, id: Uuid) -> Option<Alert> {
        let key = self
            .active
            .iter()
            .find(|(_, a)| a.id == id)
            .map(|(k, _)| k.clone())?;
        let alert = self.active.remove(&key)?;
        Some(self.retire(alert))
    }

    fn retire(&mut self, mut alert: Alert) -> Alert {
        alert.resolved = true;
        alert.resolved_at = Some(Utc::now());
        if self.history.len() >= HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(alert.clone());
        alert
    }

    /// Active alerts, most severe first, then oldest first.
    pub fn active(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.values().cloned().collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });
        alerts
    }

    pub fn history(&self) -> impl Iterator<Item = &Alert> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_condition_is_deduplicated() {
        let mut book = AlertBook::new();
        let first = book.raise("resources", "cpu_high", AlertSeverity::Medium, "cpu 85%");
        let second = book.raise("resources", "cpu_high", AlertSeverity::Medium, "cpu 88%");

        let AlertUpdate::Raised(raised) = first else {
            panic!("expected a new alert");
        };
        let AlertUpdate::Repeated(repeated) = second else {
            panic!("expected a repeat");
        };
        assert_eq!(raised.id, repeated.id);
        assert_eq!(repeated.occurrences, 2);
        assert_eq!(repeated.message, "cpu 88%");
        assert_eq!(book.active().len(), 1);
    }

    #[test]
    fn severity_only_escalates() {
        let mut book = AlertBook::new();
        book.raise("resources", "cpu_high", AlertSeverity::High, "a");
        book.raise("resources", "cpu_high", AlertSeverity::Low, "b");
        assert_eq!(book.active()[0].severity, AlertSeverity::High);
    }

    #[test]
    fn cleared_conditions_resolve() {
        let mut book = AlertBook::new();
        book.raise("resources", "cpu_high", AlertSeverity::Medium, "cpu");
        book.raise("resources", "memory_high", AlertSeverity::Medium, "mem");
        book.raise("cache", "thrashing", AlertSeverity::Low, "cache");

        let resolved = book.resolve_cleared("resources", Some("memory_high"));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].signature, "cpu_high");
        assert!(resolved[0].resolved);
        assert_eq!(book.active().len(), 2);
        assert_eq!(book.history().count(), 1);
    }

    #[test]
    fn resolved_alert_is_not_resurrected() {
        let mut book = AlertBook::new();
        let AlertUpdate::Raised(a) = book.raise("s", "x", AlertSeverity::Low, "m") else {
            panic!("expected a new alert");
        };
        assert!(book.resolve(a.id).is_some());
        assert!(book.resolve(a.id).is_none());

        let AlertUpdate::Raised(b) = book.raise("s", "x", AlertSeverity::Low, "m") else {
            panic!("recurrence must raise a fresh alert");
        };
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn active_sorted_by_severity() {
        let mut book = AlertBook::new();
        book.raise("a", "1", AlertSeverity::Low, "low");
        book.raise("b", "2", AlertSeverity::Critical, "crit");
        let active = book.active();
        assert_eq!(active[0].severity, AlertSeverity::Critical);
    }
}

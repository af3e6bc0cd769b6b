// health.rs — Health statuses, thresholds and reports.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered so that `max` over components gives the overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Which probes a cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    /// Rule integrity and cache probes.
    Quick,
    /// Everything, including resource sampling and log scanning.
    Full,
}

impl FromStr for CheckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(CheckMode::Quick),
            "full" => Ok(CheckMode::Full),
            other => Err(format!("unknown check mode '{}' (expected quick or full)", other)),
        }
    }
}

impl fmt::Display for CheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckMode::Quick => f.write_str("quick"),
            CheckMode::Full => f.write_str("full"),
        }
    }
}

/// A degraded and a (higher) unhealthy bound for one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub degraded: f64,
    pub unhealthy: f64,
}

impl Threshold {
    pub const fn new(degraded: f64, unhealthy: f64) -> Self {
        Self {
            degraded,
            unhealthy,
        }
    }

    pub fn classify(&self, value: f64) -> HealthStatus {
        if value >= self.unhealthy {
            HealthStatus::Unhealthy
        } else if value >= self.degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Numeric limits used by the probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Sliding window length for the error rate, seconds.
    pub error_window_secs: u64,
    /// Below this hit rate a full cache is reported degraded.
    pub cache_min_hit_rate: f64,
    /// Lookups needed before the hit rate is judged.
    pub cache_min_lookups: u64,
    /// System-wide CPU, percent.
    pub cpu_percent: Threshold,
    /// Used share of system memory, percent.
    pub memory_percent: Threshold,
    /// Errors per minute over the sliding window.
    pub error_rate_per_minute: Threshold,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            error_window_secs: 60,
            cache_min_hit_rate: 0.2,
            cache_min_lookups: 100,
            cpu_percent: Threshold::new(80.0, 95.0),
            memory_percent: Threshold::new(85.0, 95.0),
            error_rate_per_minute: Threshold::new(5.0, 20.0),
        }
    }
}

/// One probe's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: HealthStatus,
    pub detail: String,
    /// Stable identifier of the condition, used to deduplicate alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ComponentStatus {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: detail.into(),
            signature: None,
        }
    }

    pub fn degraded(signature: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            detail: detail.into(),
            signature: Some(signature.into()),
        }
    }

    pub fn unhealthy(signature: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: detail.into(),
            signature: Some(signature.into()),
        }
    }

    /// Build a status from a measured value, naming the breach in `signature`.
    pub fn from_threshold(
        threshold: &Threshold,
        value: f64,
        signature: &str,
        detail: String,
    ) -> Self {
        match threshold.classify(value) {
            HealthStatus::Healthy => Self::healthy(detail),
            HealthStatus::Degraded => Self::degraded(signature, detail),
            HealthStatus::Unhealthy => Self::unhealthy(signature, detail),
        }
    }
}

/// The result of one monitor cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckReport {
    pub overall: HealthStatus,
    pub components: BTreeMap<String, ComponentStatus>,
    pub mode: CheckMode,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckReport {
    pub fn new(mode: CheckMode, components: BTreeMap<String, ComponentStatus>) -> Self {
        let overall = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            overall,
            components,
            mode,
            timestamp: Utc::now(),
        }
    }

    pub fn count(&self, status: HealthStatus) -> usize {
        self.components
            .values()
            .filter(|c| c.status == status)
            .count()
    }

    /// Healthy, or degraded in at most `max_degraded` components with none
    /// unhealthy.
    pub fn is_acceptable(&self, max_degraded: usize) -> bool {
        match self.overall {
            HealthStatus::Healthy => true,
            HealthStatus::Degraded => self.count(HealthStatus::Degraded) <= max_degraded,
            HealthStatus::Unhealthy => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(statuses: &[HealthStatus]) -> HealthCheckReport {
        let components = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let c = match s {
                    HealthStatus::Healthy => ComponentStatus::healthy("ok"),
                    HealthStatus::Degraded => ComponentStatus::degraded("sig", "meh"),
                    HealthStatus::Unhealthy => ComponentStatus::unhealthy("sig", "bad"),
                };
                (format!("c{}", i), c)
            })
            .collect();
        HealthCheckReport::new(CheckMode::Full, components)
    }

    #[test]
    fn threshold_bands() {
        let t = Threshold::new(80.0, 95.0);
        assert_eq!(t.classify(10.0), HealthStatus::Healthy);
        assert_eq!(t.classify(80.0), HealthStatus::Degraded);
        assert_eq!(t.classify(99.0), HealthStatus::Unhealthy);
    }

    #[test]
    fn overall_is_worst_component() {
        assert_eq!(report(&[]).overall, HealthStatus::Healthy);
        assert_eq!(
            report(&[HealthStatus::Healthy, HealthStatus::Degraded]).overall,
            HealthStatus::Degraded
        );
        assert_eq!(
            report(&[HealthStatus::Unhealthy, HealthStatus::Degraded]).overall,
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn degraded_tolerance() {
        let one = report(&[HealthStatus::Healthy, HealthStatus::Degraded]);
        let two = report(&[HealthStatus::Degraded, HealthStatus::Degraded]);
        assert!(one.is_acceptable(1));
        assert!(!two.is_acceptable(1));
        assert!(two.is_acceptable(2));
        assert!(!report(&[HealthStatus::Unhealthy]).is_acceptable(10));
    }

    #[test]
    fn thresholds_deserialize_partially() {
        let t: Thresholds = serde_json::from_str(r#"{"error_window_secs": 120}"#).unwrap();
        assert_eq!(t.error_window_secs, 120);
        assert_eq!(t.cpu_percent, Threshold::new(80.0, 95.0));
    }

    #[test]
    fn check_mode_parses() {
        assert_eq!("QUICK".parse::<CheckMode>().unwrap(), CheckMode::Quick);
        assert!("slow".parse::<CheckMode>().is_err());
    }
}

// probe.rs — The HealthProbe trait and the policy-side probes.
//
// Probes only read: they take snapshots and metrics from the components
// they watch and never mutate them.

use std::path::PathBuf;
use std::sync::Arc;

use ag_policy::{DecisionCache, RuleArtifact, RuleStore};

use crate::error::AlertConditionError;
use crate::health::{CheckMode, ComponentStatus, Thresholds};

/// One health measurement.
pub trait HealthProbe: Send + Sync {
    /// Component name used in reports and as the alert source.
    fn name(&self) -> &str;

    /// Whether the probe runs in the given mode.
    fn runs_in(&self, mode: CheckMode) -> bool {
        let _ = mode;
        true
    }

    fn check(&self) -> Result<ComponentStatus, AlertConditionError>;
}

/// Checks that the active rule set is sane and matches the artifact on disk.
pub struct RuleIntegrityProbe {
    store: Arc<RuleStore>,
    artifact_path: Option<PathBuf>,
}

impl RuleIntegrityProbe {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self {
            store,
            artifact_path: None,
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }
}

impl HealthProbe for RuleIntegrityProbe {
    fn name(&self) -> &str {
        "rule_integrity"
    }

    fn check(&self) -> Result<ComponentStatus, AlertConditionError> {
        let snapshot = self.store.current();
        if snapshot.is_empty() {
            return Ok(ComponentStatus::unhealthy(
                "ruleset_empty",
                "active rule set has no rules",
            ));
        }
        let Some(path) = &self.artifact_path else {
            return Ok(ComponentStatus::healthy(format!(
                "{} rules, version {}",
                snapshot.len(),
                snapshot.version()
            )));
        };
        if !path.exists() {
            return Ok(ComponentStatus::degraded(
                "artifact_missing",
                format!("rule artifact {} is missing", path.display()),
            ));
        }

        let on_disk = match RuleArtifact::load(path) {
            Ok(artifact) => artifact,
            Err(e) => {
                return Ok(ComponentStatus::unhealthy(
                    "artifact_unparseable",
                    format!("rule artifact {} does not parse: {}", path.display(), e),
                ))
            }
        };
        if on_disk.rules.len() != snapshot.len() {
            return Ok(ComponentStatus::unhealthy(
                "rule_count_mismatch",
                format!(
                    "{} active rules but {} lists {}",
                    snapshot.len(),
                    path.display(),
                    on_disk.rules.len()
                ),
            ));
        }
        let disk_fingerprint = on_disk
            .fingerprint()
            .map_err(|e| AlertConditionError::new(self.name(), e.to_string()))?;

        if disk_fingerprint != snapshot.fingerprint() {
            return Ok(ComponentStatus::degraded(
                "artifact_drift",
                format!(
                    "on-disk artifact (version {}) differs from active set (version {})",
                    on_disk.version,
                    snapshot.version()
                ),
            ));
        }

        Ok(ComponentStatus::healthy(format!(
            "{} rules, version {}, fingerprint {}",
            snapshot.len(),
            snapshot.version(),
            &snapshot.fingerprint()[..12.min(snapshot.fingerprint().len())]
        )))
    }
}

/// Reports cache metrics and flags a thrashing cache.
pub struct CacheProbe {
    cache: Arc<DecisionCache>,
    min_hit_rate: f64,
    min_lookups: u64,
}

impl CacheProbe {
    pub fn new(cache: Arc<DecisionCache>, thresholds: &Thresholds) -> Self {
        Self {
            cache,
            min_hit_rate: thresholds.cache_min_hit_rate,
            min_lookups: thresholds.cache_min_lookups,
        }
    }
}

impl HealthProbe for CacheProbe {
    fn name(&self) -> &str {
        "cache"
    }

    fn check(&self) -> Result<ComponentStatus, AlertConditionError> {
        let m = self.cache.metrics();
        let detail = format!(
            "{}/{} entries, hit rate {:.1}%, {} evictions, {} expirations",
            m.entries,
            m.capacity,
            m.hit_rate * 100.0,
            m.evictions,
            m.expirations
        );
        let full = m.entries >= m.capacity;
        let judged = m.hits + m.misses >= self.min_lookups;
        if full && judged && m.hit_rate < self.min_hit_rate {
            return Ok(ComponentStatus::degraded("cache_thrashing", detail));
        }
        Ok(ComponentStatus::healthy(detail))
    }
}

// config.rs — Agent Guard configuration.
//
// GuardConfig says where state lives (the `.ag/` layout under a project
// root) and carries the tunable settings. Settings are resolved in order:
//
//   1. built-in defaults
//   2. `.ag/config.toml`, if present
//   3. `AG_*` environment variables
//
// Later layers override earlier ones field by field.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ag_deploy::DeployOptions;
use ag_monitor::{CheckMode, MonitorSettings, Thresholds, DEFAULT_ERROR_PATTERN};
use ag_policy::defaults::DEFAULT_PROTECTED_NAMESPACES;
use ag_policy::Decision;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunable settings, as written in `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub cache: CacheSettings,
    pub policy: PolicySettings,
    pub session: SessionSettings,
    pub monitor: MonitorSection,
    pub deploy: DeploySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
    pub ttl_secs: u64,
    /// How often the daemon drops expired entries.
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Decision for requests no rule matches, outside protected paths.
    pub default_decision: Decision,
    /// Targets denied when no rule matches.
    pub protected_paths: Vec<String>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            default_decision: Decision::Allow,
            protected_paths: DEFAULT_PROTECTED_NAMESPACES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub ttl_secs: u64,
    /// A session unused for this long is ended.
    pub idle_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 8 * 3600,
            idle_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub interval_secs: u64,
    /// Log files scanned for errors in full checks.
    pub log_files: Vec<PathBuf>,
    pub error_pattern: String,
    pub thresholds: Thresholds,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            log_files: Vec::new(),
            error_pattern: DEFAULT_ERROR_PATTERN.to_string(),
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    pub phase_timeout_secs: u64,
    pub max_degraded_components: usize,
    pub health_mode: CheckMode,
    pub retain_backups: usize,
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            phase_timeout_secs: 30,
            max_degraded_components: 1,
            health_mode: CheckMode::Quick,
            retain_backups: 20,
        }
    }
}

/// Paths and settings for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    pub project_root: PathBuf,
    /// `.ag/` under the project root.
    pub state_dir: PathBuf,
    /// The active rule artifact.
    pub rules_file: PathBuf,
    pub config_file: PathBuf,
    /// Hash-chained audit log.
    pub audit_log: PathBuf,
    /// Raised and resolved alerts, JSONL.
    pub alerts_log: PathBuf,
    /// Users and sessions.
    pub rbac_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub deployments_dir: PathBuf,
    /// Pepper for password hashes when `AG_SECRET_KEY` is unset.
    pub secret_key_file: PathBuf,
    /// Session id of the CLI's current login.
    pub session_file: PathBuf,
    /// Daemon socket.
    pub socket_path: PathBuf,
    /// Held by whichever process is deploying.
    pub deploy_lock: PathBuf,
    pub settings: GuardSettings,
}

impl GuardConfig {
    /// Standard `.ag/` layout with default settings.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let ag_dir = root.join(".ag");
        Self {
            project_root: root,
            rules_file: ag_dir.join("rules.yaml"),
            config_file: ag_dir.join("config.toml"),
            audit_log: ag_dir.join("audit.jsonl"),
            alerts_log: ag_dir.join("alerts.jsonl"),
            rbac_dir: ag_dir.join("rbac"),
            backups_dir: ag_dir.join("backups"),
            deployments_dir: ag_dir.join("deployments"),
            secret_key_file: ag_dir.join("secret.key"),
            session_file: ag_dir.join("session"),
            socket_path: ag_dir.join("guard.sock"),
            deploy_lock: ag_dir.join("deploy.lock"),
            state_dir: ag_dir,
            settings: GuardSettings::default(),
        }
    }

    /// Layout for `project_root` with `config.toml` and the process
    /// environment applied.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::for_project(project_root);
        config.settings = GuardSettings::load_or_default(&config.config_file)?;
        config
            .settings
            .apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        let monitor = &self.settings.monitor;
        MonitorSettings {
            thresholds: monitor.thresholds.clone(),
            artifact_path: Some(self.rules_file.clone()),
            log_files: monitor
                .log_files
                .iter()
                .map(|p| self.resolve(p))
                .collect(),
            error_pattern: monitor.error_pattern.clone(),
        }
    }

    pub fn deploy_options(&self) -> DeployOptions {
        let deploy = &self.settings.deploy;
        DeployOptions {
            phase_timeout: Duration::from_secs(deploy.phase_timeout_secs),
            max_degraded_components: deploy.max_degraded_components,
            health_mode: deploy.health_mode,
            retain_backups: deploy.retain_backups,
            artifact_path: Some(self.rules_file.clone()),
            dependents: vec![self.config_file.clone()],
            lock_file: Some(self.deploy_lock.clone()),
        }
    }

    /// Relative paths are taken from the project root.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

impl GuardSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Defaults if `path` does not exist; a file that exists must parse.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `AG_*` overrides. `lookup` returns a variable's value, if set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvOverrides { lookup: &lookup };

        env.parse("AG_CACHE_CAPACITY", &mut self.cache.capacity)?;
        env.parse("AG_CACHE_TTL_SECS", &mut self.cache.ttl_secs)?;
        env.parse("AG_CACHE_SWEEP_SECS", &mut self.cache.sweep_interval_secs)?;

        if let Some(value) = env.get("AG_DEFAULT_DECISION") {
            self.policy.default_decision = match value.trim().to_ascii_lowercase().as_str() {
                "allow" => Decision::Allow,
                "deny" => Decision::Deny,
                _ => {
                    return Err(ConfigError::Env {
                        var: "AG_DEFAULT_DECISION",
                        value,
                        reason: "expected allow or deny".to_string(),
                    })
                }
            };
        }
        if let Some(value) = env.get("AG_PROTECTED_PATHS") {
            self.policy.protected_paths = split_list(&value);
        }

        env.parse("AG_SESSION_TTL_SECS", &mut self.session.ttl_secs)?;
        env.parse("AG_SESSION_IDLE_SECS", &mut self.session.idle_secs)?;

        let monitor = &mut self.monitor;
        env.parse("AG_MONITOR_INTERVAL_SECS", &mut monitor.interval_secs)?;
        if let Some(value) = env.get("AG_MONITOR_LOG_FILES") {
            monitor.log_files = split_list(&value).into_iter().map(PathBuf::from).collect();
        }
        if let Some(value) = env.get("AG_ERROR_PATTERN") {
            monitor.error_pattern = value;
        }
        let t = &mut monitor.thresholds;
        env.parse("AG_CPU_DEGRADED_PERCENT", &mut t.cpu_percent.degraded)?;
        env.parse("AG_CPU_UNHEALTHY_PERCENT", &mut t.cpu_percent.unhealthy)?;
        env.parse("AG_MEMORY_DEGRADED_PERCENT", &mut t.memory_percent.degraded)?;
        env.parse("AG_MEMORY_UNHEALTHY_PERCENT", &mut t.memory_percent.unhealthy)?;
        env.parse("AG_ERROR_RATE_DEGRADED", &mut t.error_rate_per_minute.degraded)?;
        env.parse("AG_ERROR_RATE_UNHEALTHY", &mut t.error_rate_per_minute.unhealthy)?;
        env.parse("AG_ERROR_WINDOW_SECS", &mut t.error_window_secs)?;
        env.parse("AG_CACHE_MIN_HIT_RATE", &mut t.cache_min_hit_rate)?;
        env.parse("AG_CACHE_MIN_LOOKUPS", &mut t.cache_min_lookups)?;

        let deploy = &mut self.deploy;
        env.parse("AG_PHASE_TIMEOUT_SECS", &mut deploy.phase_timeout_secs)?;
        env.parse("AG_MAX_DEGRADED_COMPONENTS", &mut deploy.max_degraded_components)?;
        env.parse("AG_HEALTH_MODE", &mut deploy.health_mode)?;
        env.parse("AG_RETAIN_BACKUPS", &mut deploy.retain_backups)?;
        Ok(())
    }
}

struct EnvOverrides<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvOverrides<'_> {
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        if let Some(value) = self.get(var) {
            *slot = value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
                var,
                value: value.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

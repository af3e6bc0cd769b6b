// error.rs — Error types for configuration and the gateway façade.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// An `AG_*` override that does not parse.
    #[error("invalid value '{value}' for {var}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Agent Guard is not initialized in {0} (run `ag init`)")]
    NotInitialized(PathBuf),

    #[error(transparent)]
    RuleLoad(#[from] ag_policy::RuleLoadError),

    #[error(transparent)]
    Policy(#[from] ag_policy::PolicyError),

    #[error(transparent)]
    Validation(#[from] ag_policy::ValidationError),

    #[error(transparent)]
    Deploy(#[from] ag_deploy::DeployError),

    #[error(transparent)]
    Rbac(#[from] ag_rbac::RbacError),

    #[error(transparent)]
    Audit(#[from] ag_audit::AuditError),

    #[error(transparent)]
    Monitor(#[from] ag_monitor::MonitorError),

    #[error("invalid error pattern: {0}")]
    ErrorPattern(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        GatewayError::Io {
            path: path.to_string(),
            source,
        }
    }
}

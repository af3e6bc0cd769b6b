// error.rs — Error types for the compliance monitor.

use thiserror::Error;

/// A probe could not take its measurement.
///
/// Never fatal: the monitor logs it, reports the component as degraded and
/// carries on with the remaining probes.
#[derive(Debug, Clone, Error)]
#[error("probe '{probe}' could not measure: {reason}")]
pub struct AlertConditionError {
    pub probe: String,
    pub reason: String,
}

impl AlertConditionError {
    pub fn new(probe: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from alert sinks and alert log replay.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

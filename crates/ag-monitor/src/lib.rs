//! # ag-monitor
//!
//! Compliance monitoring for Agent Guard.
//!
//! The [`ComplianceMonitor`] runs a set of [`HealthProbe`]s each cycle and
//! folds their [`ComponentStatus`]es into a [`HealthCheckReport`]. Anything
//! not healthy raises a deduplicated [`Alert`]; cleared conditions resolve
//! it. Alerts go to [`AlertSink`]s (JSONL file and tracing).
//!
//! Probes only observe: the monitor never mutates the rule store or the
//! cache it watches, and never blocks evaluation.

pub mod alert;
pub mod error;
pub mod error_rate;
pub mod health;
pub mod monitor;
pub mod probe;
pub mod resources;
pub mod sink;

pub use alert::{Alert, AlertBook, AlertSeverity, AlertUpdate};
pub use error::{AlertConditionError, MonitorError};
pub use error_rate::{ErrorRateProbe, ErrorWindow, LogScanner, DEFAULT_ERROR_PATTERN};
pub use health::{CheckMode, ComponentStatus, HealthCheckReport, HealthStatus, Threshold, Thresholds};
pub use monitor::{ComplianceMonitor, MonitorSettings};
pub use probe::{CacheProbe, HealthProbe, RuleIntegrityProbe};
pub use resources::{ResourceProbe, ResourceSample, ResourceSampler, SysinfoSampler};
pub use sink::{replay, AlertEventKind, AlertRecord, AlertSink, JsonlAlertSink, TracingAlertSink};

//! # ag-gateway
//!
//! Configuration and the access-controlled entry point for Agent Guard.
//!
//! [`GuardConfig`] lays out the `.ag/` state directory of a project and
//! layers `config.toml` under `AG_*` environment overrides. [`Gateway`]
//! wires the rule store, evaluator, monitor, orchestrator and access control
//! together for one process: the CLI and the daemon both go through it.
//!
//! Agent requests ([`Gateway::intercept`]) need no session. Operator calls
//! take a session id, are permission-checked, and leave audit events.

pub mod config;
pub mod error;
pub mod gateway;

pub use config::{
    CacheSettings, DeploySection, GuardConfig, GuardSettings, MonitorSection, PolicySettings,
    SessionSettings,
};
pub use error::{ConfigError, GatewayError};
pub use gateway::{Gateway, InitReport};

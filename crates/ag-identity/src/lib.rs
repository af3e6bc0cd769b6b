//! # ag-identity
//!
//! Works out which agent is issuing requests.
//!
//! Detection combines a prioritized list of [`SignalProvider`]s, each of
//! which inspects an explicit [`DetectionContext`] (never process globals
//! directly) and may propose a [`Candidate`] with a confidence in `[0, 1]`:
//!
//! 1. explicit caller-supplied override
//! 2. environment signals of known integration surfaces
//! 3. process ancestry (names of the invoking parent processes)
//! 4. known marker directories
//! 5. fallback `unknown` with confidence 0
//!
//! The highest-confidence candidate wins; ties go to the earlier provider.
//! [`IdentityDetector::detect`] resolves once and returns the same
//! [`AgentIdentity`] for the rest of the session.

pub mod agent;
pub mod context;
pub mod detector;
pub mod provider;

pub use agent::{AgentIdentity, AgentKind};
pub use context::DetectionContext;
pub use detector::IdentityDetector;
pub use provider::{
    Candidate, EnvironmentSignals, ExplicitOverride, MarkerDirectories, ProcessAncestry,
    SignalProvider,
};

//! # ag-policy
//!
//! Rule-based policy enforcement for Agent Guard.
//!
//! A [`RuleStore`] owns the active [`RuleSet`], an immutable snapshot that is
//! swapped as a whole. The [`PolicyEvaluator`] checks each
//! [`ValidationRequest`] against the snapshot, memoizing results in a
//! generation-stamped [`DecisionCache`]. The [`CommandInterceptor`] is the
//! surface callers use before acting.
//!
//! ## Key invariants
//!
//! - **Deny override**: rules are ordered by category, then priority, then
//!   deny before allow, then authored position. The first match decides.
//! - **Sentinels**: unmatched requests are recorded as `default-deny` or
//!   `default-allow`; a deny always names a rule.
//! - **No stale decisions**: cached entries are only served for the rule-set
//!   generation they were computed under.
//! - **Load-time validation**: duplicate or empty ids and bad patterns fail
//!   the load, never the evaluation.

pub mod cache;
pub mod defaults;
pub mod error;
pub mod evaluator;
pub mod intercept;
pub mod pattern;
pub mod rule;
pub mod ruleset;
pub mod store;

pub use cache::{CacheKey, CacheMetrics, DecisionCache};
pub use defaults::{DEFAULT_ALLOW, DEFAULT_DENY};
pub use error::{InterceptError, PolicyError, RuleLoadError, ValidationError};
pub use evaluator::{
    DecisionSource, DefaultPolicy, EvaluationTrace, PolicyEvaluator, TraceStep, ValidationRequest,
    ValidationResult,
};
pub use intercept::CommandInterceptor;
pub use pattern::Matcher;
pub use rule::{Decision, Rule, RuleCategory, RuleSpec};
pub use ruleset::{ArtifactFormat, LintFinding, LintSeverity, RuleArtifact, RuleSet};
pub use store::{ArtifactWatch, RuleStore, StagedRuleSet};

// evaluator.rs — Policy evaluation against the active rule set.
//
// Every request goes through `evaluate()`:
//
// 1. Reject malformed requests (never cached).
// 2. Take a snapshot of the active rule set.
// 3. Serve a cached decision stamped with the snapshot's generation, if any.
// 4. Otherwise walk the rules in evaluation order; the first rule whose
//    operation and target patterns both match decides.
// 5. No match: deny inside protected namespaces, else the configured
//    fallback, recorded under the `default-deny` / `default-allow` sentinels.
// 6. Cache the decision, then return it.
//
// Targets that look like paths are normalized lexically before matching so
// `/tmp/../etc/passwd` is judged as `/etc/passwd`.

use std::sync::Arc;
use std::time::Duration;

use ag_identity::AgentIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, DecisionCache};
use crate::defaults::{DEFAULT_ALLOW, DEFAULT_DENY, DEFAULT_PROTECTED_NAMESPACES};
use crate::error::{RuleLoadError, ValidationError};
use crate::pattern::Matcher;
use crate::rule::Decision;
use crate::ruleset::RuleSet;
use crate::store::RuleStore;

/// Longest operation or target accepted, in bytes.
pub const MAX_FIELD_LEN: usize = 4096;

/// What happens when no rule matches.
#[derive(Debug, Clone)]
pub struct DefaultPolicy {
    pub fallback: Decision,
    protected: Vec<Matcher>,
}

impl DefaultPolicy {
    /// `patterns` use the rule pattern syntax (bare globs are typical).
    pub fn new<S: AsRef<str>>(fallback: Decision, patterns: &[S]) -> Result<Self, RuleLoadError> {
        let protected = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                Matcher::compile(p).map_err(|reason| RuleLoadError::InvalidPattern {
                    rule_id: DEFAULT_DENY.to_string(),
                    field: "protected_namespace".to_string(),
                    pattern: p.to_string(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            fallback,
            protected,
        })
    }

    pub fn is_protected(&self, target: &str) -> bool {
        self.protected.iter().any(|m| m.matches(target))
    }

    /// Decision, sentinel id and rationale for an unmatched target.
    pub fn decide(&self, target: &str) -> (Decision, &'static str, String) {
        if self.is_protected(target) {
            return (
                Decision::Deny,
                DEFAULT_DENY,
                format!("no rule matched and '{}' is in a protected namespace", target),
            );
        }
        match self.fallback {
            Decision::Allow => (
                Decision::Allow,
                DEFAULT_ALLOW,
                "no rule matched; fallback policy allows".to_string(),
            ),
            Decision::Deny => (
                Decision::Deny,
                DEFAULT_DENY,
                "no rule matched; fallback policy denies".to_string(),
            ),
        }
    }

    fn rationale_for(&self, sentinel: &str, target: &str) -> String {
        match sentinel {
            DEFAULT_ALLOW => "no rule matched; fallback policy allows".to_string(),
            _ => self.decide(target).2,
        }
    }
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        let protected = DEFAULT_PROTECTED_NAMESPACES
            .iter()
            .filter_map(|p| Matcher::compile(p).ok())
            .collect();
        Self {
            fallback: Decision::Allow,
            protected,
        }
    }
}

/// A request to perform an operation on a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub operation: String,
    pub target: String,
    pub requesting_identity: Option<AgentIdentity>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationRequest {
    pub fn new(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            target: target.into(),
            requesting_identity: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_identity(mut self, identity: AgentIdentity) -> Self {
        self.requesting_identity = Some(identity);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.operation.trim().is_empty() {
            return Err(ValidationError::EmptyOperation);
        }
        if self.target.trim().is_empty() {
            return Err(ValidationError::EmptyTarget);
        }
        for (field, value) in [("operation", &self.operation), ("target", &self.target)] {
            if value.len() > MAX_FIELD_LEN {
                return Err(ValidationError::TooLong {
                    field,
                    len: value.len(),
                    max: MAX_FIELD_LEN,
                });
            }
        }
        Ok(())
    }
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Cache,
    Evaluated,
}

/// The outcome of evaluating a request.
///
/// A deny always names the rule that decided it, or `default-deny`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub request: ValidationRequest,
    pub decision: Decision,
    pub matched_rule_id: Option<String>,
    pub rationale: String,
    pub source: DecisionSource,
    pub ruleset_version: String,
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }

    pub fn is_denied(&self) -> bool {
        self.decision == Decision::Deny
    }

    pub fn rule_id(&self) -> &str {
        self.matched_rule_id.as_deref().unwrap_or(DEFAULT_DENY)
    }
}

/// One rule inspected during a traced evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub rule_id: String,
    pub action: Decision,
    pub operation_matched: bool,
    pub target_matched: bool,
    /// This rule decided the request.
    pub terminal: bool,
}

/// A decision plus every rule inspected on the way to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTrace {
    pub result: ValidationResult,
    /// Target after lexical normalization.
    pub normalized_target: String,
    pub steps: Vec<TraceStep>,
    pub default_applied: bool,
}

struct Verdict {
    decision: Decision,
    rule_id: String,
    rationale: String,
}

/// Evaluates requests against the store's active snapshot.
pub struct PolicyEvaluator {
    store: Arc<RuleStore>,
    cache: Arc<DecisionCache>,
    defaults: DefaultPolicy,
    cache_ttl: Duration,
}

impl PolicyEvaluator {
    pub fn new(store: Arc<RuleStore>, cache: Arc<DecisionCache>) -> Self {
        Self {
            store,
            cache,
            defaults: DefaultPolicy::default(),
            cache_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_defaults(mut self, defaults: DefaultPolicy) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    pub fn defaults(&self) -> &DefaultPolicy {
        &self.defaults
    }

    /// Evaluate a request, consulting the cache first.
    pub fn evaluate(&self, request: ValidationRequest) -> Result<ValidationResult, ValidationError> {
        let snapshot = self.store.current();
        self.evaluate_on(&snapshot, request)
    }

    /// Evaluate several requests against one snapshot, so a swap midway
    /// cannot split the batch across rule sets. Results keep request order;
    /// a malformed request fails alone.
    pub fn evaluate_batch<I>(&self, requests: I) -> Vec<Result<ValidationResult, ValidationError>>
    where
        I: IntoIterator<Item = ValidationRequest>,
    {
        let snapshot = self.store.current();
        requests
            .into_iter()
            .map(|request| self.evaluate_on(&snapshot, request))
            .collect()
    }

    fn evaluate_on(
        &self,
        snapshot: &RuleSet,
        request: ValidationRequest,
    ) -> Result<ValidationResult, ValidationError> {
        request.validate()?;
        let target = normalize_target(&request.target);
        let key = CacheKey::for_request(&request.operation, &target);

        if let Some(hit) = self.cache.get(&key, snapshot.generation()) {
            let rationale = match snapshot.get(&hit.matched_rule_id) {
                Some(rule) => rule.spec.rationale.clone(),
                None => self.defaults.rationale_for(&hit.matched_rule_id, &target),
            };
            return Ok(self.finish(
                request,
                snapshot,
                Verdict {
                    decision: hit.decision,
                    rule_id: hit.matched_rule_id,
                    rationale,
                },
                DecisionSource::Cache,
            ));
        }

        let verdict = self.decide(snapshot, &request.operation, &target, None);
        self.cache.put(
            key,
            verdict.decision,
            verdict.rule_id.clone(),
            snapshot.generation(),
            self.cache_ttl,
        );
        Ok(self.finish(request, snapshot, verdict, DecisionSource::Evaluated))
    }

    /// Evaluate without consulting the cache, recording every rule inspected.
    pub fn evaluate_with_trace(
        &self,
        request: ValidationRequest,
    ) -> Result<EvaluationTrace, ValidationError> {
        request.validate()?;
        let snapshot = self.store.current();
        let target = normalize_target(&request.target);

        let mut steps = Vec::new();
        let verdict = self.decide(&snapshot, &request.operation, &target, Some(&mut steps));
        let default_applied = !steps.iter().any(|s| s.terminal);

        self.cache.put(
            CacheKey::for_request(&request.operation, &target),
            verdict.decision,
            verdict.rule_id.clone(),
            snapshot.generation(),
            self.cache_ttl,
        );
        Ok(EvaluationTrace {
            result: self.finish(request, &snapshot, verdict, DecisionSource::Evaluated),
            normalized_target: target,
            steps,
            default_applied,
        })
    }

    fn decide(
        &self,
        snapshot: &RuleSet,
        operation: &str,
        target: &str,
        mut trace: Option<&mut Vec<TraceStep>>,
    ) -> Verdict {
        for rule in snapshot.rules() {
            let operation_matched = rule.matches_operation(operation);
            let target_matched = operation_matched && rule.matches_target(target);
            if let Some(steps) = trace.as_deref_mut() {
                steps.push(TraceStep {
                    rule_id: rule.id().to_string(),
                    action: rule.action(),
                    operation_matched,
                    target_matched,
                    terminal: target_matched,
                });
            }
            if target_matched {
                return Verdict {
                    decision: rule.action(),
                    rule_id: rule.id().to_string(),
                    rationale: rule.spec.rationale.clone(),
                };
            }
        }

        let (decision, rule_id, rationale) = self.defaults.decide(target);
        Verdict {
            decision,
            rule_id: rule_id.to_string(),
            rationale,
        }
    }

    fn finish(
        &self,
        request: ValidationRequest,
        snapshot: &RuleSet,
        verdict: Verdict,
        source: DecisionSource,
    ) -> ValidationResult {
        tracing::debug!(
            operation = %request.operation,
            target = %request.target,
            decision = %verdict.decision,
            rule_id = %verdict.rule_id,
            source = ?source,
            "policy decision"
        );
        ValidationResult {
            request,
            decision: verdict.decision,
            matched_rule_id: Some(verdict.rule_id),
            rationale: verdict.rationale,
            source,
            ruleset_version: snapshot.version().to_string(),
            generation: snapshot.generation(),
            timestamp: Utc::now(),
        }
    }
}

/// Collapse `.`/`..` segments and repeated slashes in path-like targets.
///
/// Only targets starting with `/` or `~/` are touched; `..` never climbs
/// above the root.
pub fn normalize_target(target: &str) -> String {
    let (prefix, rest) = if let Some(rest) = target.strip_prefix("~/") {
        ("~/", rest)
    } else if let Some(rest) = target.strip_prefix('/') {
        ("/", rest)
    } else {
        return target.to_string();
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut normalized = String::from(prefix);
    normalized.push_str(&segments.join("/"));
    if rest.ends_with('/') && !segments.is_empty() {
        normalized.push('/');
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleCategory, RuleSpec};
    use crate::ruleset::RuleArtifact;

    fn rule(id: &str, op: &str, target: &str, action: Decision, priority: i32) -> RuleSpec {
        RuleSpec {
            id: id.to_string(),
            category: RuleCategory::High,
            operation_pattern: op.to_string(),
            target_pattern: target.to_string(),
            action,
            priority,
            rationale: format!("{} rationale", id),
        }
    }

    fn evaluator(rules: Vec<RuleSpec>) -> PolicyEvaluator {
        let store = RuleStore::from_artifact(RuleArtifact::new("1", rules)).unwrap();
        PolicyEvaluator::new(Arc::new(store), Arc::new(DecisionCache::new(100)))
    }

    #[test]
    fn first_matching_rule_decides() {
        let ev = evaluator(vec![
            rule("allow-data", "write", "/data/*", Decision::Allow, 1),
            rule("deny-secret", "write", "/data/secret/*", Decision::Deny, 10),
        ]);
        let res = ev.evaluate(ValidationRequest::new("write", "/data/secret/k")).unwrap();
        assert!(res.is_denied());
        assert_eq!(res.rule_id(), "deny-secret");
        assert_eq!(res.rationale, "deny-secret rationale");

        let res = ev.evaluate(ValidationRequest::new("write", "/data/public")).unwrap();
        assert!(res.is_allowed());
        assert_eq!(res.rule_id(), "allow-data");
    }

    #[test]
    fn second_lookup_served_from_cache() {
        let ev = evaluator(vec![rule("deny-tmp", "rm", "/tmp/*", Decision::Deny, 0)]);
        let first = ev.evaluate(ValidationRequest::new("rm", "/tmp/x")).unwrap();
        let second = ev.evaluate(ValidationRequest::new("rm", "/tmp/x")).unwrap();
        assert_eq!(first.source, DecisionSource::Evaluated);
        assert_eq!(second.source, DecisionSource::Cache);
        assert_eq!(second.decision, first.decision);
        assert_eq!(second.rationale, "deny-tmp rationale");
    }

    #[test]
    fn unmatched_protected_target_is_default_deny() {
        let ev = evaluator(vec![]);
        let res = ev.evaluate(ValidationRequest::new("read", "/home/u/.ssh/id_rsa")).unwrap();
        assert!(res.is_denied());
        assert_eq!(res.rule_id(), DEFAULT_DENY);

        let res = ev.evaluate(ValidationRequest::new("read", "/srv/app/README")).unwrap();
        assert!(res.is_allowed());
        assert_eq!(res.rule_id(), DEFAULT_ALLOW);
    }

    #[test]
    fn fallback_deny_applies_outside_protected() {
        let ev = evaluator(vec![])
            .with_defaults(DefaultPolicy::new(Decision::Deny, &["/vault/*"]).unwrap());
        let res = ev.evaluate(ValidationRequest::new("read", "/srv/x")).unwrap();
        assert!(res.is_denied());
        assert_eq!(res.rule_id(), DEFAULT_DENY);
        let cached = ev.evaluate(ValidationRequest::new("read", "/srv/x")).unwrap();
        assert_eq!(cached.rationale, res.rationale);
    }

    #[test]
    fn malformed_requests_are_not_cached() {
        let ev = evaluator(vec![]);
        assert_eq!(
            ev.evaluate(ValidationRequest::new("  ", "/x")).unwrap_err(),
            ValidationError::EmptyOperation
        );
        assert_eq!(
            ev.evaluate(ValidationRequest::new("read", "")).unwrap_err(),
            ValidationError::EmptyTarget
        );
        let long = "a".repeat(MAX_FIELD_LEN + 1);
        assert!(matches!(
            ev.evaluate(ValidationRequest::new("read", long)),
            Err(ValidationError::TooLong { field: "target", .. })
        ));
        assert!(ev.cache().is_empty());
    }

    #[test]
    fn traversal_cannot_escape_rules() {
        let ev = evaluator(vec![rule("deny-etc", "edit", "/etc/*", Decision::Deny, 0)]);
        let res = ev
            .evaluate(ValidationRequest::new("edit", "/tmp/../etc/hosts"))
            .unwrap();
        assert!(res.is_denied());
        assert_eq!(res.request.target, "/tmp/../etc/hosts");
    }

    #[test]
    fn batch_keeps_order_and_isolates_bad_requests() {
        let ev = evaluator(vec![rule("deny-secret", "write", "/data/secret/*", Decision::Deny, 1)]);
        let results = ev.evaluate_batch(vec![
            ValidationRequest::new("write", "/data/secret/k"),
            ValidationRequest::new("", "/data/x"),
            ValidationRequest::new("read", "/data/secret/k"),
        ]);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().rule_id(), "deny-secret");
        assert!(matches!(results[1], Err(ValidationError::EmptyOperation)));
        assert!(results[2].as_ref().unwrap().is_allowed());
        assert!(ev.evaluate_batch(Vec::new()).is_empty());
    }

    #[test]
    fn batch_is_decided_by_one_generation() {
        let ev = evaluator(vec![rule("deny-secret", "write", "/data/secret/*", Decision::Deny, 1)]);
        let store = Arc::clone(ev.store());
        let requests = (0..20).map(|i| {
            if i == 10 {
                store.swap(store.stage(RuleArtifact::new("2", vec![])).unwrap());
            }
            ValidationRequest::new("write", format!("/data/secret/{}", i))
        });
        let results = ev.evaluate_batch(requests);
        assert!(results.iter().all(|r| {
            let r = r.as_ref().unwrap();
            r.generation == 1 && r.is_denied()
        }));
        assert_eq!(store.current().version(), "2");
    }

    #[test]
    fn trace_records_inspected_rules() {
        let ev = evaluator(vec![
            rule("a", "rm", "/a/*", Decision::Deny, 3),
            rule("b", "write", "/b/*", Decision::Deny, 2),
            rule("c", "write", "/c/*", Decision::Allow, 1),
        ]);
        let trace = ev
            .evaluate_with_trace(ValidationRequest::new("write", "/c/file"))
            .unwrap();
        let ids: Vec<_> = trace.steps.iter().map(|s| s.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!trace.steps[0].operation_matched);
        assert!(trace.steps[1].operation_matched && !trace.steps[1].target_matched);
        assert!(trace.steps[2].terminal);
        assert!(!trace.default_applied);
        assert!(trace.result.is_allowed());
    }

    #[test]
    fn normalize_handles_dots_and_slashes() {
        assert_eq!(normalize_target("/tmp/../etc//passwd"), "/etc/passwd");
        assert_eq!(normalize_target("/../../etc"), "/etc");
        assert_eq!(normalize_target("~/./.ssh/id_rsa"), "~/.ssh/id_rsa");
        assert_eq!(normalize_target("/srv/app/"), "/srv/app/");
        assert_eq!(normalize_target("/"), "/");
        assert_eq!(normalize_target("origin/main"), "origin/main");
    }
}

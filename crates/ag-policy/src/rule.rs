// rule.rs — Rule definitions and evaluation ordering.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RuleLoadError;
use crate::pattern::Matcher;

/// Severity class of a rule. Critical rules are evaluated first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Critical,
    High,
    Medium,
}

impl RuleCategory {
    /// Evaluation rank: lower ranks are evaluated earlier.
    pub fn rank(self) -> u8 {
        match self {
            RuleCategory::Critical => 0,
            RuleCategory::High => 1,
            RuleCategory::Medium => 2,
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleCategory::Critical => "critical",
            RuleCategory::High => "high",
            RuleCategory::Medium => "medium",
        };
        f.write_str(s)
    }
}

/// A rule's action, and the outcome of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allow(self) -> bool {
        self == Decision::Allow
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => f.write_str("allow"),
            Decision::Deny => f.write_str("deny"),
        }
    }
}

/// A rule as authored in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub category: RuleCategory,
    pub operation_pattern: String,
    pub target_pattern: String,
    pub action: Decision,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub rationale: String,
}

/// A rule with its patterns compiled.
#[derive(Debug, Clone)]
pub struct Rule {
    pub spec: RuleSpec,
    /// Index in the authored artifact; the final tie-break.
    pub position: usize,
    operation: Matcher,
    target: Matcher,
}

impl Rule {
    pub fn compile(spec: RuleSpec, position: usize) -> Result<Self, RuleLoadError> {
        if spec.id.trim().is_empty() {
            return Err(RuleLoadError::EmptyId { position });
        }
        let operation = compile_field(&spec, "operation_pattern", &spec.operation_pattern)?;
        let target = compile_field(&spec, "target_pattern", &spec.target_pattern)?;
        Ok(Self {
            spec,
            position,
            operation,
            target,
        })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn action(&self) -> Decision {
        self.spec.action
    }

    pub fn matches_operation(&self, operation: &str) -> bool {
        self.operation.matches(operation)
    }

    pub fn matches_target(&self, target: &str) -> bool {
        self.target.matches(target)
    }

    /// Evaluation order: category, then priority descending, then deny
    /// before allow, then authored position.
    pub fn evaluation_order(a: &Rule, b: &Rule) -> Ordering {
        a.spec
            .category
            .rank()
            .cmp(&b.spec.category.rank())
            .then_with(|| b.spec.priority.cmp(&a.spec.priority))
            .then_with(|| action_rank(a.spec.action).cmp(&action_rank(b.spec.action)))
            .then_with(|| a.position.cmp(&b.position))
    }
}

fn action_rank(action: Decision) -> u8 {
    match action {
        Decision::Deny => 0,
        Decision::Allow => 1,
    }
}

fn compile_field(spec: &RuleSpec, field: &str, pattern: &str) -> Result<Matcher, RuleLoadError> {
    Matcher::compile(pattern).map_err(|reason| RuleLoadError::InvalidPattern {
        rule_id: spec.id.clone(),
        field: field.to_string(),
        pattern: pattern.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, category: RuleCategory, action: Decision, priority: i32) -> RuleSpec {
        RuleSpec {
            id: id.to_string(),
            category,
            operation_pattern: "*".to_string(),
            target_pattern: "*".to_string(),
            action,
            priority,
            rationale: String::new(),
        }
    }

    #[test]
    fn category_outranks_priority() {
        let a = Rule::compile(spec("a", RuleCategory::Medium, Decision::Deny, 100), 0).unwrap();
        let b = Rule::compile(spec("b", RuleCategory::Critical, Decision::Allow, 1), 1).unwrap();
        assert_eq!(Rule::evaluation_order(&b, &a), Ordering::Less);
    }

    #[test]
    fn deny_precedes_allow_in_same_band() {
        let allow = Rule::compile(spec("allow", RuleCategory::High, Decision::Allow, 5), 0).unwrap();
        let deny = Rule::compile(spec("deny", RuleCategory::High, Decision::Deny, 5), 1).unwrap();
        assert_eq!(Rule::evaluation_order(&deny, &allow), Ordering::Less);
    }

    #[test]
    fn position_is_final_tie_break() {
        let first = Rule::compile(spec("x", RuleCategory::High, Decision::Deny, 5), 0).unwrap();
        let second = Rule::compile(spec("y", RuleCategory::High, Decision::Deny, 5), 1).unwrap();
        assert_eq!(Rule::evaluation_order(&first, &second), Ordering::Less);
    }

    #[test]
    fn empty_id_rejected() {
        let err = Rule::compile(spec("  ", RuleCategory::High, Decision::Deny, 0), 3).unwrap_err();
        assert!(matches!(err, RuleLoadError::EmptyId { position: 3 }));
    }

    #[test]
    fn invalid_pattern_names_field() {
        let mut bad = spec("bad", RuleCategory::High, Decision::Deny, 0);
        bad.target_pattern = "re:(".to_string();
        match Rule::compile(bad, 0).unwrap_err() {
            RuleLoadError::InvalidPattern { rule_id, field, .. } => {
                assert_eq!(rule_id, "bad");
                assert_eq!(field, "target_pattern");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn spec_parses_with_defaults() {
        let yaml = "id: r1\ncategory: critical\noperation_pattern: rm\ntarget_pattern: /etc/*\naction: deny\n";
        let spec: RuleSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.priority, 0);
        assert!(spec.rationale.is_empty());
        assert_eq!(spec.action, Decision::Deny);
    }
}

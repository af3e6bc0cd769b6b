// ruleset.rs — Rule artifacts and compiled, immutable rule sets.
//
// A RuleArtifact is what lives on disk (YAML or JSON). A RuleSet is the
// compiled form: ids validated, patterns compiled, rules sorted into
// evaluation order, and a fingerprint over the canonical serialization.
// RuleSets are never mutated once built; the store swaps whole sets.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults::DEFAULT_RULES;
use crate::error::{PolicyError, RuleLoadError};
use crate::rule::{Rule, RuleCategory, RuleSpec};

/// On-disk encoding of a rule artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Yaml,
    Json,
}

impl ArtifactFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, RuleLoadError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") | None => Ok(ArtifactFormat::Yaml),
            Some("json") => Ok(ArtifactFormat::Json),
            Some(other) => Err(RuleLoadError::UnsupportedFormat {
                extension: other.to_string(),
            }),
        }
    }
}

/// The authored rule collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleArtifact {
    pub version: String,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl RuleArtifact {
    pub fn new(version: impl Into<String>, rules: Vec<RuleSpec>) -> Self {
        Self {
            version: version.into(),
            rules,
        }
    }

    /// The artifact shipped with the crate.
    pub fn builtin() -> Result<Self, RuleLoadError> {
        Self::from_yaml_str(DEFAULT_RULES)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, RuleLoadError> {
        serde_yaml::from_str(content).map_err(|e| RuleLoadError::Parse(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self, RuleLoadError> {
        serde_json::from_str(content).map_err(|e| RuleLoadError::Parse(e.to_string()))
    }

    pub fn parse(content: &str, format: ArtifactFormat) -> Result<Self, RuleLoadError> {
        match format {
            ArtifactFormat::Yaml => Self::from_yaml_str(content),
            ArtifactFormat::Json => Self::from_json_str(content),
        }
    }

    /// Read an artifact, choosing the parser from the file extension.
    pub fn load(path: &Path) -> Result<Self, RuleLoadError> {
        let format = ArtifactFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|source| RuleLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, format)
    }

    pub fn render(&self, format: ArtifactFormat) -> Result<String, RuleLoadError> {
        match format {
            ArtifactFormat::Yaml => {
                serde_yaml::to_string(self).map_err(|e| RuleLoadError::Serialize(e.to_string()))
            }
            ArtifactFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| RuleLoadError::Serialize(e.to_string())),
        }
    }

    /// Write the artifact via a temp file and rename, so readers never see
    /// a half-written file.
    pub fn write_atomic(&self, path: &Path) -> Result<(), PolicyError> {
        let format = ArtifactFormat::from_path(path)?;
        let rendered = self.render(format)?;
        let persist_err = |source| PolicyError::Persist {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(persist_err)?;
            }
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, rendered).map_err(persist_err)?;
        fs::rename(&tmp, path).map_err(persist_err)?;
        Ok(())
    }

    /// SHA-256 of the canonical JSON serialization.
    pub fn fingerprint(&self) -> Result<String, RuleLoadError> {
        let canonical =
            serde_json::to_string(self).map_err(|e| RuleLoadError::Serialize(e.to_string()))?;
        Ok(ag_audit::hasher::hash_str(&canonical))
    }
}

/// Severity of a lint finding. Errors block a safe deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LintSeverity {
    Warning,
    Error,
}

/// A non-fatal observation about a compiled rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintFinding {
    pub severity: LintSeverity,
    pub rule_id: Option<String>,
    pub message: String,
}

impl LintFinding {
    pub fn is_error(&self) -> bool {
        self.severity == LintSeverity::Error
    }
}

/// An immutable, compiled rule collection.
#[derive(Debug, Clone)]
pub struct RuleSet {
    artifact: RuleArtifact,
    /// Compiled rules in evaluation order.
    rules: Vec<Rule>,
    generation: u64,
    fingerprint: String,
    loaded_at: DateTime<Utc>,
}

impl RuleSet {
    /// Validate and compile an artifact. The result has generation 0 until
    /// the store installs it.
    pub fn compile(artifact: RuleArtifact) -> Result<Self, RuleLoadError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(artifact.rules.len());

        for (position, spec) in artifact.rules.iter().enumerate() {
            let rule = Rule::compile(spec.clone(), position)?;
            if !seen.insert(rule.id().to_string()) {
                return Err(RuleLoadError::DuplicateId {
                    rule_id: rule.id().to_string(),
                });
            }
            rules.push(rule);
        }
        rules.sort_by(Rule::evaluation_order);

        let fingerprint = artifact.fingerprint()?;
        Ok(Self {
            artifact,
            rules,
            generation: 0,
            fingerprint,
            loaded_at: Utc::now(),
        })
    }

    /// A set with no rules; every request falls through to the default policy.
    pub fn empty() -> Self {
        let artifact = RuleArtifact::new("0", Vec::new());
        let fingerprint = artifact.fingerprint().unwrap_or_default();
        Self {
            artifact,
            rules: Vec::new(),
            generation: 0,
            fingerprint,
            loaded_at: Utc::now(),
        }
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id() == id)
    }

    pub fn version(&self) -> &str {
        &self.artifact.version
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// The artifact this set was compiled from, in authored order.
    pub fn artifact(&self) -> &RuleArtifact {
        &self.artifact
    }

    pub fn lint(&self) -> Vec<LintFinding> {
        let mut findings = Vec::new();

        if self.rules.is_empty() {
            findings.push(LintFinding {
                severity: LintSeverity::Error,
                rule_id: None,
                message: "rule set is empty".to_string(),
            });
            return findings;
        }

        if !self
            .rules
            .iter()
            .any(|r| r.spec.category == RuleCategory::Critical)
        {
            findings.push(LintFinding {
                severity: LintSeverity::Warning,
                rule_id: None,
                message: "rule set has no critical rules".to_string(),
            });
        }

        // A later rule with the same pattern pair as an earlier one can never fire.
        let mut first_by_patterns: HashMap<(&str, &str), &str> = HashMap::new();
        for rule in &self.rules {
            let key = (
                rule.spec.operation_pattern.as_str(),
                rule.spec.target_pattern.as_str(),
            );
            match first_by_patterns.get(&key) {
                Some(earlier) => findings.push(LintFinding {
                    severity: LintSeverity::Warning,
                    rule_id: Some(rule.id().to_string()),
                    message: format!("shadowed by earlier rule '{}'", earlier),
                }),
                None => {
                    first_by_patterns.insert(key, rule.id());
                }
            }
        }

        findings
    }
}

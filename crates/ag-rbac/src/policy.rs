// policy.rs — Named access policies over resources and request context.
//
// A policy grants access when the session holds any one of its permissions,
// the resource matches one of its glob patterns, and every condition is
// satisfied by the request context. A condition value of "*" only requires
// the attribute to be present. Policies live in `policies.json`, seeded with
// the built-in set on first open.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RbacError;
use crate::permission::Permission;
use crate::session::Session;

const ANY_VALUE: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub permissions: BTreeSet<Permission>,
    pub resource_patterns: Vec<String>,
    #[serde(default)]
    pub conditions: BTreeMap<String, Value>,
}

impl AccessPolicy {
    pub fn new(
        name: impl Into<String>,
        permissions: impl IntoIterator<Item = Permission>,
        resource_patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            permissions: permissions.into_iter().collect(),
            resource_patterns: resource_patterns.into_iter().map(Into::into).collect(),
            conditions: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    /// The policies every installation starts with.
    pub fn defaults() -> Vec<AccessPolicy> {
        use Permission::*;
        vec![
            AccessPolicy::new(
                "ai_agent_basic_access",
                [ReadRules, ExecuteRules],
                ["ai_rules:*", "validation:*"],
            )
            .with_description("Agents may read and execute rules")
            .with_condition("agent_type", ANY_VALUE)
            .with_condition("session_timeout", 3600),
            AccessPolicy::new("admin_full_access", Permission::ALL, ["*"])
                .with_description("Full access for administrators")
                .with_condition("require_mfa", true),
            AccessPolicy::new("viewer_readonly", [ReadRules, ViewLogs], ["rules:*", "logs:*"])
                .with_description("Read-only access to rules and logs")
                .with_condition("read_only", true),
        ]
    }

    /// Reject patterns that do not compile.
    pub fn validate(&self) -> Result<(), RbacError> {
        let invalid = |reason: String| RbacError::InvalidPolicy {
            name: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if self.permissions.is_empty() {
            return Err(invalid("no permissions".to_string()));
        }
        if self.resource_patterns.is_empty() {
            return Err(invalid("no resource patterns".to_string()));
        }
        for raw in &self.resource_patterns {
            Pattern::new(raw).map_err(|e| invalid(format!("pattern '{}': {}", raw, e.msg)))?;
        }
        Ok(())
    }

    pub fn matches_resource(&self, resource: &str) -> bool {
        self.resource_patterns
            .iter()
            .filter_map(|raw| Pattern::new(raw).ok())
            .any(|p| p.matches(resource))
    }

    pub fn conditions_met(&self, context: &PolicyContext) -> bool {
        self.conditions.iter().all(|(key, expected)| {
            match context.attributes.get(key) {
                None => false,
                Some(_) if expected.as_str() == Some(ANY_VALUE) => true,
                Some(actual) => actual == expected,
            }
        })
    }

    /// Whether `session` is granted `context.resource` by this policy.
    /// Validity of the session is the caller's concern.
    pub fn grants(&self, session: &Session, context: &PolicyContext) -> bool {
        self.permissions.iter().any(|p| session.has(*p))
            && self.matches_resource(&context.resource)
            && self.conditions_met(context)
    }
}

/// The resource being accessed and the attributes of the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyContext {
    pub resource: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl PolicyContext {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// All policies, keyed by name.
pub struct PolicyStore {
    path: PathBuf,
    policies: BTreeMap<String, AccessPolicy>,
}

impl PolicyStore {
    /// Open `path`, writing the default policies if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RbacError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let json = fs::read_to_string(&path).map_err(|e| RbacError::io(path.display(), e))?;
            let policies: BTreeMap<String, AccessPolicy> = serde_json::from_str(&json)?;
            for policy in policies.values() {
                policy.validate()?;
            }
            return Ok(Self { path, policies });
        }

        let store = Self {
            path,
            policies: AccessPolicy::defaults()
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        };
        store.save()?;
        tracing::debug!(path = %store.path.display(), "default access policies written");
        Ok(store)
    }

    pub fn get(&self, name: &str) -> Option<&AccessPolicy> {
        self.policies.get(name)
    }

    pub fn list(&self) -> Vec<&AccessPolicy> {
        self.policies.values().collect()
    }

    /// Add or replace a policy.
    pub fn put(&mut self, policy: AccessPolicy) -> Result<(), RbacError> {
        policy.validate()?;
        self.policies.insert(policy.name.clone(), policy);
        self.save()
    }

    /// Returns whether the policy existed.
    pub fn remove(&mut self, name: &str) -> Result<bool, RbacError> {
        let existed = self.policies.remove(name).is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    fn save(&self) -> Result<(), RbacError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| RbacError::io(parent.display(), e))?;
        }
        let json = serde_json::to_string_pretty(&self.policies)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| RbacError::io(tmp.display(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| RbacError::io(self.path.display(), e))
    }
}

// event.rs — Audit event data model.
//
// One AuditEvent per access decision or mutating action. Events are
// immutable once appended; `previous_hash` links each line to the one
// before it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of action this event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A session's permission was checked.
    PermissionCheck,
    /// A login attempt (successful or not).
    Authentication,
    /// A session was explicitly ended.
    Logout,
    /// The active rule set was staged or written.
    RuleMutation,
    /// A deployment attempt reached a terminal state.
    Deployment,
    /// A backup was taken outside a deployment.
    Backup,
    /// A backup was restored into the rule store.
    Restore,
    /// A deployment was rolled back on request.
    Rollback,
    /// A user was created, changed or deactivated.
    UserManagement,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::PermissionCheck => "permission_check",
            AuditAction::Authentication => "authentication",
            AuditAction::Logout => "logout",
            AuditAction::RuleMutation => "rule_mutation",
            AuditAction::Deployment => "deployment",
            AuditAction::Backup => "backup",
            AuditAction::Restore => "restore",
            AuditAction::Rollback => "rollback",
            AuditAction::UserManagement => "user_management",
        };
        write!(f, "{}", s)
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,

    pub timestamp: DateTime<Utc>,

    /// The session the action was performed under, if any.
    pub session_id: Option<String>,

    /// Who performed the action (username, or "system").
    pub actor: String,

    pub action: AuditAction,

    /// The permission that was required (e.g. "deploy_system").
    pub permission: Option<String>,

    /// The resource affected (e.g. "deployment", "rules:modify").
    pub target: Option<String>,

    /// Whether the action was permitted / succeeded.
    pub allowed: bool,

    /// Hash of the previous event in the log. None for the first event.
    pub previous_hash: Option<String>,

    /// Free-form details (deployment id, failure reason, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// Create a new event with the current timestamp and a random UUID.
    ///
    /// Events default to `allowed = true`; denials must say so explicitly.
    pub fn new(actor: impl Into<String>, action: AuditAction) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: None,
            actor: actor.into(),
            action,
            permission: None,
            target: None,
            allowed: true,
            previous_hash: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_allowed(mut self, allowed: bool) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_defaults_to_allowed() {
        let event = AuditEvent::new("alice", AuditAction::Backup);
        assert!(event.allowed);
        assert!(event.session_id.is_none());
        assert!(event.previous_hash.is_none());
    }

    #[test]
    fn builder_sets_access_fields() {
        let event = AuditEvent::new("bob", AuditAction::PermissionCheck)
            .with_session("s-1")
            .with_permission("deploy_system")
            .with_target("deployment")
            .with_allowed(false);

        assert_eq!(event.session_id.as_deref(), Some("s-1"));
        assert_eq!(event.permission.as_deref(), Some("deploy_system"));
        assert_eq!(event.target.as_deref(), Some("deployment"));
        assert!(!event.allowed);
    }

    #[test]
    fn event_ids_are_unique() {
        let e1 = AuditEvent::new("a", AuditAction::Logout);
        let e2 = AuditEvent::new("a", AuditAction::Logout);
        assert_ne!(e1.event_id, e2.event_id);
    }

    #[test]
    fn action_serializes_as_snake_case() {
        let json = serde_json::to_string(&AuditAction::PermissionCheck).unwrap();
        assert_eq!(json, "\"permission_check\"");
        assert_eq!(AuditAction::RuleMutation.to_string(), "rule_mutation");
    }
}

// report.rs — Access statistics, per-user summaries and audit log queries.

use std::collections::BTreeMap;

use ag_audit::{AuditAction, AuditEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permission::Role;
use crate::user::User;

/// How many recent events a user summary carries.
pub const USER_SUMMARY_RECENT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccessStats {
    pub username: String,
    pub total: usize,
    pub granted: usize,
    pub denied: usize,
    /// Percentage of granted checks, 0–100.
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionUsage {
    pub permission: String,
    pub granted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// One entry per user with at least one permission check, by name.
    pub users: Vec<UserAccessStats>,
    /// Granted checks per permission, most used first.
    pub permission_usage: Vec<PermissionUsage>,
    pub failed_logins: usize,
    pub generated_at: DateTime<Utc>,
}

impl AuditSummary {
    pub fn build(events: &[AuditEvent], start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let mut users: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        let mut usage: BTreeMap<&str, usize> = BTreeMap::new();
        let mut failed_logins = 0;

        for event in events
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
        {
            match event.action {
                AuditAction::PermissionCheck => {
                    let entry = users.entry(event.actor.as_str()).or_default();
                    entry.0 += 1;
                    if event.allowed {
                        entry.1 += 1;
                        if let Some(permission) = &event.permission {
                            *usage.entry(permission.as_str()).or_default() += 1;
                        }
                    }
                }
                AuditAction::Authentication if !event.allowed => failed_logins += 1,
                _ => {}
            }
        }

        let users = users
            .into_iter()
            .map(|(username, (total, granted))| UserAccessStats {
                username: username.to_string(),
                total,
                granted,
                denied: total - granted,
                success_rate: if total == 0 {
                    0.0
                } else {
                    granted as f64 / total as f64 * 100.0
                },
            })
            .collect();

        let mut permission_usage: Vec<PermissionUsage> = usage
            .into_iter()
            .map(|(permission, granted)| PermissionUsage {
                permission: permission.to_string(),
                granted,
            })
            .collect();
        permission_usage.sort_by(|a, b| b.granted.cmp(&a.granted).then(a.permission.cmp(&b.permission)));

        Self {
            period_start: start,
            period_end: end,
            users,
            permission_usage,
            failed_logins,
            generated_at: Utc::now(),
        }
    }
}

/// Which audit events an access log query returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogFilter {
    pub username: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for AccessLogFilter {
    fn default() -> Self {
        Self {
            username: None,
            start: None,
            end: None,
            limit: 100,
        }
    }
}

impl AccessLogFilter {
    pub fn for_user(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    fn accepts(&self, event: &AuditEvent) -> bool {
        self.username.as_deref().map_or(true, |u| event.actor == u)
            && self.start.map_or(true, |s| event.timestamp >= s)
            && self.end.map_or(true, |e| event.timestamp <= e)
    }

    /// Matching events, newest first, at most `limit` of them.
    pub fn apply(&self, events: Vec<AuditEvent>) -> Vec<AuditEvent> {
        let mut matched: Vec<AuditEvent> = events.into_iter().filter(|e| self.accepts(e)).collect();
        // The log is in append order; a stable sort keeps it for equal stamps.
        matched.reverse();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(self.limit);
        matched
    }
}

/// One user's account details with their most recent audited actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    /// Newest first.
    pub recent_access: Vec<AuditEvent>,
}

impl UserSummary {
    pub fn build(user: &User, events: Vec<AuditEvent>) -> Self {
        let recent_access = AccessLogFilter::for_user(user.username.clone())
            .with_limit(USER_SUMMARY_RECENT)
            .apply(events);
        Self {
            username: user.username.clone(),
            role: user.role,
            active: user.active,
            created_at: user.created_at,
            last_login: user.last_login,
            recent_access,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn check(actor: &str, permission: &str, allowed: bool) -> AuditEvent {
        AuditEvent::new(actor, AuditAction::PermissionCheck)
            .with_permission(permission)
            .with_allowed(allowed)
    }

    #[test]
    fn counts_checks_per_user_and_permission() {
        let events = vec![
            check("alice", "read_rules", true),
            check("alice", "deploy_system", false),
            check("bob", "read_rules", true),
            check("bob", "view_logs", true),
            AuditEvent::new("mallory", AuditAction::Authentication).with_allowed(false),
        ];
        let now = Utc::now();
        let summary = AuditSummary::build(&events, now - Duration::hours(1), now + Duration::hours(1));

        assert_eq!(summary.users.len(), 2);
        assert_eq!(summary.users[0].username, "alice");
        assert_eq!(summary.users[0].denied, 1);
        assert_eq!(summary.users[0].success_rate, 50.0);
        assert_eq!(summary.permission_usage[0].permission, "read_rules");
        assert_eq!(summary.permission_usage[0].granted, 2);
        assert_eq!(summary.failed_logins, 1);
    }

    #[test]
    fn events_outside_window_are_ignored() {
        let events = vec![check("alice", "read_rules", true)];
        let later = Utc::now() + Duration::hours(2);
        let summary = AuditSummary::build(&events, later, later + Duration::hours(1));
        assert!(summary.users.is_empty());
        assert!(summary.permission_usage.is_empty());
    }

    #[test]
    fn log_query_filters_newest_first() {
        let events: Vec<AuditEvent> = (0..5)
            .map(|i| check(if i % 2 == 0 { "alice" } else { "bob" }, &format!("p{}", i), true))
            .collect();

        let alice = AccessLogFilter::for_user("alice").apply(events.clone());
        let order: Vec<&str> = alice.iter().filter_map(|e| e.permission.as_deref()).collect();
        assert_eq!(order, ["p4", "p2", "p0"]);

        let limited = AccessLogFilter::default().with_limit(2).apply(events.clone());
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].permission.as_deref(), Some("p4"));

        let future = Utc::now() + Duration::hours(1);
        assert!(AccessLogFilter::default()
            .between(future, future + Duration::hours(1))
            .apply(events)
            .is_empty());
    }

    #[test]
    fn user_summary_keeps_the_last_ten_of_that_user() {
        let user = User::new("alice", Role::Operator, crate::secret::PasswordHash::create("pw-pw-pw-pw", "pepper"));
        let mut events: Vec<AuditEvent> = (0..12).map(|i| check("alice", &format!("p{}", i), true)).collect();
        events.push(check("bob", "p99", true));

        let summary = UserSummary::build(&user, events);
        assert_eq!(summary.role, Role::Operator);
        assert_eq!(summary.recent_access.len(), USER_SUMMARY_RECENT);
        assert_eq!(summary.recent_access[0].permission.as_deref(), Some("p11"));
        assert!(summary.recent_access.iter().all(|e| e.actor == "alice"));
    }
}

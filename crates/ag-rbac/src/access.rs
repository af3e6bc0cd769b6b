// access.rs — AccessControl: authentication, permission checks and auditing.
//
// Every permission check writes exactly one audit event, whether it is
// granted, denied, or fails because the session is gone. Mutating actions
// (login, logout, user management) are audited too, and so is every named
// policy evaluation. Audit writes are serialized through one mutex so the
// hash chain stays linear.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ag_audit::{AuditAction, AuditEvent, AuditLog};
use chrono::{DateTime, Duration, Utc};

use crate::error::RbacError;
use crate::permission::{Permission, Role};
use crate::policy::{AccessPolicy, PolicyContext, PolicyStore};
use crate::report::{AccessLogFilter, AuditSummary, UserSummary};
use crate::secret::{Credentials, PasswordHash, SecretProvider};
use crate::session::{Session, SessionStore};
use crate::user::{validate_password, validate_username, User, UserStore};

/// Lifetime of a session from login.
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 8;

const USERS_FILE: &str = "users.json";
const SESSIONS_DIR: &str = "sessions";
const POLICIES_FILE: &str = "policies.json";

pub struct AccessControl {
    users: RwLock<UserStore>,
    sessions: SessionStore,
    policies: RwLock<PolicyStore>,
    audit: Mutex<AuditLog>,
    audit_path: PathBuf,
    secrets: Arc<dyn SecretProvider>,
    session_ttl: Duration,
}

impl AccessControl {
    /// Open access control state under `state_dir`, auditing to `audit_path`.
    pub fn open(
        state_dir: &Path,
        audit_path: &Path,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self, RbacError> {
        let users = UserStore::open(state_dir.join(USERS_FILE))?;
        let sessions = SessionStore::open(state_dir.join(SESSIONS_DIR))?;
        let policies = PolicyStore::open(state_dir.join(POLICIES_FILE))?;
        let audit = AuditLog::open(audit_path)?;
        Ok(Self {
            users: RwLock::new(users),
            sessions,
            policies: RwLock::new(policies),
            audit: Mutex::new(audit),
            audit_path: audit_path.to_path_buf(),
            secrets,
            session_ttl: Duration::hours(DEFAULT_SESSION_TTL_HOURS),
        })
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// End sessions left unused for `idle`.
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.sessions = self.sessions.with_idle_timeout(idle);
        self
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    fn users(&self) -> RwLockReadGuard<'_, UserStore> {
        match self.users.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn users_mut(&self) -> RwLockWriteGuard<'_, UserStore> {
        match self.users.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn policy_store(&self) -> RwLockReadGuard<'_, PolicyStore> {
        match self.policies.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn policy_store_mut(&self) -> RwLockWriteGuard<'_, PolicyStore> {
        match self.policies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn audit_log(&self) -> MutexGuard<'_, AuditLog> {
        match self.audit.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append an event to the audit log.
    pub fn record(&self, mut event: AuditEvent) -> Result<(), RbacError> {
        self.audit_log().append(&mut event)?;
        Ok(())
    }

    /// Create the first account as a system administrator. Does nothing if
    /// any user already exists. Returns whether an account was created.
    pub fn bootstrap_admin(&self, credentials: &Credentials) -> Result<bool, RbacError> {
        validate_username(&credentials.username)?;
        validate_password(&credentials.password)?;
        let pepper = self.secrets.pepper()?;
        {
            let mut users = self.users_mut();
            if !users.is_empty() {
                return Ok(false);
            }
            users.insert(User::new(
                credentials.username.clone(),
                Role::SystemAdmin,
                PasswordHash::create(&credentials.password, &pepper),
            ))?;
        }
        self.record(
            AuditEvent::new("system", AuditAction::UserManagement)
                .with_target(format!("user:{}", credentials.username))
                .with_metadata(serde_json::json!({ "op": "bootstrap", "role": Role::SystemAdmin })),
        )?;
        tracing::info!(user = %credentials.username, "administrator bootstrapped");
        Ok(true)
    }

    /// Verify credentials and open a session.
    pub fn authenticate(&self, credentials: &Credentials) -> Result<Session, RbacError> {
        let pepper = self.secrets.pepper()?;
        let outcome = {
            let users = self.users();
            match users.get(&credentials.username) {
                Some(user) if user.password.verify(&credentials.password, &pepper) => {
                    if user.active {
                        Ok(user.role)
                    } else {
                        Err(RbacError::UserInactive(user.username.clone()))
                    }
                }
                _ => Err(RbacError::InvalidCredentials),
            }
        };

        let event = AuditEvent::new(credentials.username.clone(), AuditAction::Authentication)
            .with_target("login");
        let role = match outcome {
            Ok(role) => role,
            Err(e) => {
                self.record(event.with_allowed(false))?;
                tracing::warn!(user = %credentials.username, "authentication failed");
                return Err(e);
            }
        };

        let session = Session::new(credentials.username.clone(), role, self.session_ttl);
        self.sessions.insert(session.clone())?;
        self.users_mut()
            .update(&credentials.username, |u| u.last_login = Some(Utc::now()))?;
        self.record(event.with_session(session.id.clone()))?;
        tracing::info!(user = %session.user, role = %role, "session opened");
        Ok(session)
    }

    /// Whether the session holds `permission`. Exactly one audit event is
    /// written per call. Expired sessions fail with `SessionExpired`.
    pub fn check(
        &self,
        session_id: &str,
        permission: Permission,
        target: &str,
    ) -> Result<bool, RbacError> {
        let event = AuditEvent::new("unknown", AuditAction::PermissionCheck)
            .with_session(session_id)
            .with_permission(permission.as_str())
            .with_target(target);

        let session = match self.sessions.get(session_id) {
            Ok(session) => session,
            Err(e) => {
                let mut event = event.with_allowed(false);
                event.metadata = serde_json::json!({ "error": e.to_string() });
                self.record(event)?;
                return Err(e);
            }
        };

        let allowed = session.has(permission);
        let mut event = event.with_allowed(allowed);
        event.actor = session.user.clone();
        self.record(event)?;
        if !allowed {
            tracing::warn!(
                user = %session.user,
                permission = %permission,
                resource = target,
                "permission denied"
            );
        }
        Ok(allowed)
    }

    /// Like [`check`](Self::check) but a denial is an error.
    pub fn require(
        &self,
        session_id: &str,
        permission: Permission,
        target: &str,
    ) -> Result<Session, RbacError> {
        if self.check(session_id, permission, target)? {
            self.sessions.get(session_id)
        } else {
            let user = self
                .sessions
                .get(session_id)
                .map(|s| s.user)
                .unwrap_or_else(|_| "unknown".to_string());
            Err(RbacError::PermissionDenied { user, permission })
        }
    }

    /// The live session for `session_id`, without a permission check.
    pub fn session(&self, session_id: &str) -> Result<Session, RbacError> {
        self.sessions.get(session_id)
    }

    /// End a session. Returns whether it was live.
    pub fn logout(&self, session_id: &str) -> Result<bool, RbacError> {
        let user = self.sessions.get(session_id).map(|s| s.user).ok();
        let removed = self.sessions.remove(session_id)?;
        if let Some(user) = user {
            self.record(
                AuditEvent::new(user, AuditAction::Logout)
                    .with_session(session_id)
                    .with_target("logout"),
            )?;
        }
        Ok(removed)
    }

    pub fn purge_expired(&self) -> Result<usize, RbacError> {
        self.sessions.purge_expired()
    }

    /// Create a user. Requires `manage_users`.
    pub fn create_user(
        &self,
        session_id: &str,
        credentials: &Credentials,
        role: Role,
    ) -> Result<(), RbacError> {
        let target = format!("user:{}", credentials.username);
        let admin = self.require(session_id, Permission::ManageUsers, &target)?;
        validate_username(&credentials.username)?;
        validate_password(&credentials.password)?;
        let pepper = self.secrets.pepper()?;

        self.users_mut().insert(User::new(
            credentials.username.clone(),
            role,
            PasswordHash::create(&credentials.password, &pepper),
        ))?;
        self.record(
            AuditEvent::new(admin.user.clone(), AuditAction::UserManagement)
                .with_session(session_id)
                .with_permission(Permission::ManageUsers.as_str())
                .with_target(target)
                .with_metadata(serde_json::json!({ "op": "create", "role": role })),
        )?;
        tracing::info!(by = %admin.user, user = %credentials.username, role = %role, "user created");
        Ok(())
    }

    /// Deactivate a user and end their sessions. Requires `manage_users`.
    pub fn deactivate_user(&self, session_id: &str, username: &str) -> Result<(), RbacError> {
        let target = format!("user:{}", username);
        let admin = self.require(session_id, Permission::ManageUsers, &target)?;
        self.users_mut().update(username, |u| u.active = false)?;
        let ended = self.sessions.remove_user(username)?;
        self.record(
            AuditEvent::new(admin.user.clone(), AuditAction::UserManagement)
                .with_session(session_id)
                .with_permission(Permission::ManageUsers.as_str())
                .with_target(target)
                .with_metadata(serde_json::json!({ "op": "deactivate", "sessions_ended": ended })),
        )?;
        tracing::info!(by = %admin.user, user = username, sessions_ended = ended, "user deactivated");
        Ok(())
    }

    /// Usernames with their roles and whether they are active.
    pub fn list_users(&self) -> Vec<(String, Role, bool)> {
        self.users()
            .list()
            .into_iter()
            .map(|u| (u.username.clone(), u.role, u.active))
            .collect()
    }

    pub fn policies(&self) -> Vec<AccessPolicy> {
        self.policy_store().list().into_iter().cloned().collect()
    }

    /// Add or replace a named policy. Requires `manage_users`.
    pub fn put_policy(&self, session_id: &str, policy: AccessPolicy) -> Result<(), RbacError> {
        let target = format!("policy:{}", policy.name);
        let admin = self.require(session_id, Permission::ManageUsers, &target)?;
        let name = policy.name.clone();
        self.policy_store_mut().put(policy)?;
        self.record(
            AuditEvent::new(admin.user.clone(), AuditAction::UserManagement)
                .with_session(session_id)
                .with_permission(Permission::ManageUsers.as_str())
                .with_target(target)
                .with_metadata(serde_json::json!({ "op": "put_policy" })),
        )?;
        tracing::info!(by = %admin.user, policy = %name, "access policy saved");
        Ok(())
    }

    /// Whether the named policy grants the session access to the context's
    /// resource. Writes exactly one audit event. An unknown policy is an
    /// error, not a denial.
    pub fn evaluate_policy(
        &self,
        session_id: &str,
        policy_name: &str,
        context: &PolicyContext,
    ) -> Result<bool, RbacError> {
        let event = AuditEvent::new("unknown", AuditAction::PermissionCheck)
            .with_session(session_id)
            .with_target(context.resource.clone());

        let policy = self.policy_store().get(policy_name).cloned();
        let outcome = match policy {
            None => Err(RbacError::Unknown {
                kind: "policy",
                value: policy_name.to_string(),
            }),
            Some(policy) => self.sessions.get(session_id).map(|s| (s, policy)),
        };
        let (session, policy) = match outcome {
            Ok(found) => found,
            Err(e) => {
                let mut event = event.with_allowed(false);
                event.metadata = serde_json::json!({ "policy": policy_name, "error": e.to_string() });
                self.record(event)?;
                return Err(e);
            }
        };

        let allowed = policy.grants(&session, context);
        let mut event = event.with_allowed(allowed);
        event.actor = session.user.clone();
        event.metadata = serde_json::json!({ "policy": policy_name });
        self.record(event)?;
        tracing::debug!(
            user = %session.user,
            policy = policy_name,
            resource = %context.resource,
            allowed,
            "access policy evaluated"
        );
        Ok(allowed)
    }

    /// Account details and the ten most recent audited actions of `username`.
    pub fn user_summary(&self, username: &str) -> Result<UserSummary, RbacError> {
        let user = self
            .users()
            .get(username)
            .cloned()
            .ok_or_else(|| RbacError::UserNotFound(username.to_string()))?;
        Ok(UserSummary::build(&user, AuditLog::read_all(&self.audit_path)?))
    }

    /// Audited actions matching `filter`, newest first.
    pub fn access_logs(&self, filter: &AccessLogFilter) -> Result<Vec<AuditEvent>, RbacError> {
        Ok(filter.apply(AuditLog::read_all(&self.audit_path)?))
    }

    /// Access statistics for events in `[start, end]`.
    pub fn audit_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AuditSummary, RbacError> {
        let events = AuditLog::read_between(&self.audit_path, start, end)?;
        Ok(AuditSummary::build(&events, start, end))
    }
}

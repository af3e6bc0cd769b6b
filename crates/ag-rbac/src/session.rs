// session.rs — Authenticated sessions with a fixed lifetime and an idle limit.
//
// Each session is one JSON file `<dir>/<session_id>.json`, mirrored in an
// in-memory map behind a reader-writer lock. An expired, idle or logged-out
// session is deleted from both and is never brought back. The file is the
// source of truth: a cached session whose file is gone was ended by another
// process. Permissions are always derived from the role, never read back.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RbacError;
use crate::permission::{Permission, Role};
use crate::secret::random_hex;

/// A session unused for this long is ended.
pub const DEFAULT_SESSION_IDLE_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user: String,
    pub role: Role,
    pub granted_permissions: BTreeSet<Permission>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Last time the session was used. Older session files lack it.
    #[serde(default = "Utc::now")]
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(user: impl Into<String>, role: Role, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: random_hex(32),
            user: user.into(),
            role,
            granted_permissions: role.permissions(),
            created_at,
            expires_at,
            last_activity: created_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the session has gone unused for at least `idle`.
    pub fn is_idle(&self, idle: Duration) -> bool {
        Utc::now() - self.last_activity >= idle
    }

    /// Neither expired nor idle.
    pub fn is_valid(&self, idle: Duration) -> bool {
        !self.is_expired() && !self.is_idle(idle)
    }

    /// Read a session file. The stored permission list is replaced by the
    /// role's set.
    fn decode(json: &str) -> Result<Self, serde_json::Error> {
        let mut session: Session = serde_json::from_str(json)?;
        session.granted_permissions = session.role.permissions();
        Ok(session)
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.granted_permissions.contains(&permission)
    }
}

pub struct SessionStore {
    dir: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RbacError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| RbacError::io(dir.display(), e))?;
        Ok(Self {
            dir,
            sessions: RwLock::new(HashMap::new()),
            idle_timeout: Duration::minutes(DEFAULT_SESSION_IDLE_MINUTES),
        })
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, session: Session) -> Result<(), RbacError> {
        self.persist(&session)?;
        self.write().insert(session.id.clone(), session);
        Ok(())
    }

    /// The live session for `id`, with its activity time moved to now.
    /// Expired and idle sessions are removed and reported as
    /// `SessionExpired`; unknown ids as `SessionNotFound`.
    pub fn get(&self, id: &str) -> Result<Session, RbacError> {
        let path = self.session_file(id)?;
        let cached = self.read().get(id).cloned();
        let mut session = match cached {
            Some(session) if path.exists() => session,
            Some(_) => {
                self.write().remove(id);
                tracing::debug!(session = id, "session ended elsewhere");
                return Err(RbacError::SessionNotFound);
            }
            None => self.load(id)?.ok_or(RbacError::SessionNotFound)?,
        };

        if session.is_expired() || session.is_idle(self.idle_timeout) {
            self.remove(id)?;
            tracing::debug!(
                user = %session.user,
                idle = !session.is_expired(),
                "session expired"
            );
            return Err(RbacError::SessionExpired);
        }

        session.last_activity = Utc::now();
        self.insert(session.clone())?;
        Ok(session)
    }

    /// Delete a session. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool, RbacError> {
        let in_memory = self.write().remove(id).is_some();
        let path = self.session_file(id)?;
        let on_disk = path.exists();
        if on_disk {
            fs::remove_file(&path).map_err(|e| RbacError::io(path.display(), e))?;
        }
        Ok(in_memory || on_disk)
    }

    /// Remove every session belonging to `user`. Returns how many.
    pub fn remove_user(&self, user: &str) -> Result<usize, RbacError> {
        let ids: Vec<String> = self
            .all()?
            .into_iter()
            .filter(|s| s.user == user)
            .map(|s| s.id)
            .collect();
        for id in &ids {
            self.remove(id)?;
        }
        Ok(ids.len())
    }

    /// Delete expired and idle sessions. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, RbacError> {
        let expired: Vec<String> = self
            .all()?
            .into_iter()
            .filter(|s| !s.is_valid(self.idle_timeout))
            .map(|s| s.id)
            .collect();
        for id in &expired {
            self.remove(id)?;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired sessions purged");
        }
        Ok(expired.len())
    }

    fn all(&self) -> Result<Vec<Session>, RbacError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| RbacError::io(self.dir.display(), e))?;
        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RbacError::io(self.dir.display(), e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let json = fs::read_to_string(&path).map_err(|e| RbacError::io(path.display(), e))?;
                match Session::decode(&json) {
                    Ok(session) => sessions.push(session),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "unreadable session file"),
                }
            }
        }
        Ok(sessions)
    }

    fn load(&self, id: &str) -> Result<Option<Session>, RbacError> {
        let path = self.session_file(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|e| RbacError::io(path.display(), e))?;
        Ok(Some(Session::decode(&json)?))
    }

    /// Write through a temporary file so other processes never read half a
    /// session.
    fn persist(&self, session: &Session) -> Result<(), RbacError> {
        let path = self.session_file(&session.id)?;
        let json = serde_json::to_string_pretty(session)?;
        let tmp = path.with_extension(format!("json.{}.tmp", random_hex(8)));
        fs::write(&tmp, json).map_err(|e| RbacError::io(tmp.display(), e))?;
        fs::rename(&tmp, &path).map_err(|e| RbacError::io(path.display(), e))
    }

    /// Session ids are hex; anything else cannot name a file here.
    fn session_file(&self, id: &str) -> Result<PathBuf, RbacError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RbacError::SessionNotFound);
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new("alice", Role::Operator, Duration::hours(8));
        let id = session.id.clone();
        SessionStore::open(dir.path()).unwrap().insert(session.clone()).unwrap();

        let reopened = SessionStore::open(dir.path()).unwrap();
        let loaded = reopened.get(&id).unwrap();
        assert_eq!(loaded.user, session.user);
        assert_eq!(loaded.expires_at, session.expires_at);
        assert!(loaded.last_activity >= session.last_activity);
        assert!(loaded.has(Permission::ExecuteRules));
    }

    #[test]
    fn expired_session_is_deleted_and_stays_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let session = Session::new("bob", Role::Viewer, Duration::seconds(-1));
        let id = session.id.clone();
        store.insert(session).unwrap();

        assert!(matches!(store.get(&id), Err(RbacError::SessionExpired)));
        assert!(matches!(store.get(&id), Err(RbacError::SessionNotFound)));
        assert!(!dir.path().join(format!("{}.json", id)).exists());
    }

    #[test]
    fn purge_and_remove_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        store.insert(Session::new("a", Role::Viewer, Duration::seconds(-5))).unwrap();
        store.insert(Session::new("b", Role::Viewer, Duration::hours(1))).unwrap();
        store.insert(Session::new("b", Role::Viewer, Duration::hours(1))).unwrap();

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.remove_user("b").unwrap(), 2);
        assert_eq!(store.purge_expired().unwrap(), 0);
    }

    #[test]
    fn malformed_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        assert!(matches!(store.get("../users"), Err(RbacError::SessionNotFound)));
        assert!(matches!(store.get(""), Err(RbacError::SessionNotFound)));
    }

    #[test]
    fn idle_session_is_ended() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path())
            .unwrap()
            .with_idle_timeout(Duration::minutes(30));
        let mut session = Session::new("carol", Role::Operator, Duration::hours(8));
        session.last_activity = Utc::now() - Duration::minutes(31);
        let id = session.id.clone();
        store.insert(session).unwrap();

        assert!(matches!(store.get(&id), Err(RbacError::SessionExpired)));
        assert!(matches!(store.get(&id), Err(RbacError::SessionNotFound)));
    }

    #[test]
    fn use_keeps_a_session_alive() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path())
            .unwrap()
            .with_idle_timeout(Duration::minutes(30));
        let mut session = Session::new("dave", Role::Viewer, Duration::hours(8));
        session.last_activity = Utc::now() - Duration::minutes(20);
        let id = session.id.clone();
        store.insert(session).unwrap();
        store.get(&id).unwrap();

        let reopened = SessionStore::open(dir.path())
            .unwrap()
            .with_idle_timeout(Duration::minutes(30));
        let touched = reopened.get(&id).unwrap();
        assert!(Utc::now() - touched.last_activity < Duration::minutes(1));
    }

    #[test]
    fn idle_sessions_are_purged() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let mut idle = Session::new("erin", Role::Viewer, Duration::hours(8));
        idle.last_activity = Utc::now() - Duration::minutes(DEFAULT_SESSION_IDLE_MINUTES + 1);
        store.insert(idle).unwrap();
        store.insert(Session::new("erin", Role::Viewer, Duration::hours(8))).unwrap();

        assert_eq!(store.purge_expired().unwrap(), 1);
    }

    #[test]
    fn stored_permissions_are_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new("frank", Role::Viewer, Duration::hours(8));
        let id = session.id.clone();
        SessionStore::open(dir.path()).unwrap().insert(session).unwrap();

        let path = dir.path().join(format!("{}.json", id));
        let mut json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        json["granted_permissions"] = serde_json::json!(["read_rules", "manage_users", "system_admin"]);
        fs::write(&path, json.to_string()).unwrap();

        let loaded = SessionStore::open(dir.path()).unwrap().get(&id).unwrap();
        assert!(!loaded.has(Permission::ManageUsers));
        assert!(!loaded.has(Permission::SystemAdmin));
        assert_eq!(loaded.granted_permissions, Role::Viewer.permissions());
    }

    #[test]
    fn session_ended_by_another_process_is_not_served_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = SessionStore::open(dir.path()).unwrap();
        let session = Session::new("gina", Role::Operator, Duration::hours(8));
        let id = session.id.clone();
        daemon.insert(session).unwrap();
        daemon.get(&id).unwrap();

        assert!(SessionStore::open(dir.path()).unwrap().remove(&id).unwrap());
        assert!(matches!(daemon.get(&id), Err(RbacError::SessionNotFound)));
        assert!(!dir.path().join(format!("{}.json", id)).exists());
    }
}

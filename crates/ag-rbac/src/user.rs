// user.rs — User accounts, persisted together in `users.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RbacError;
use crate::permission::Role;
use crate::secret::PasswordHash;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: Role,
    pub password: PasswordHash,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(username: impl Into<String>, role: Role, password: PasswordHash) -> Self {
        Self {
            username: username.into(),
            role,
            password,
            active: true,
            created_at: Utc::now(),
            last_login: None,
        }
    }
}

/// All users, keyed by username.
pub struct UserStore {
    path: PathBuf,
    users: BTreeMap<String, User>,
}

impl UserStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RbacError> {
        let path = path.as_ref().to_path_buf();
        let users = if path.exists() {
            let json = fs::read_to_string(&path).map_err(|e| RbacError::io(path.display(), e))?;
            serde_json::from_str(&json)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, users })
    }

    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn list(&self) -> Vec<&User> {
        self.users.values().collect()
    }

    pub fn insert(&mut self, user: User) -> Result<(), RbacError> {
        if self.users.contains_key(&user.username) {
            return Err(RbacError::UserExists(user.username));
        }
        self.users.insert(user.username.clone(), user);
        self.save()
    }

    /// Apply `f` to a user and persist the result.
    pub fn update<F>(&mut self, username: &str, f: F) -> Result<(), RbacError>
    where
        F: FnOnce(&mut User),
    {
        let user = self
            .users
            .get_mut(username)
            .ok_or_else(|| RbacError::UserNotFound(username.to_string()))?;
        f(user);
        self.save()
    }

    fn save(&self) -> Result<(), RbacError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| RbacError::io(parent.display(), e))?;
        }
        let json = serde_json::to_string_pretty(&self.users)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| RbacError::io(tmp.display(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| RbacError::io(self.path.display(), e))
    }
}

pub fn validate_username(name: &str) -> Result<(), RbacError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > 64 {
        Some("name is longer than 64 characters")
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        Some("only letters, digits, '-', '_', '.' and '@' are allowed")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RbacError::InvalidUsername {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

pub fn validate_password(password: &str) -> Result<(), RbacError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(RbacError::WeakPassword {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

// secret.rs — Password hashing and the secret it is peppered with.
//
// A stored hash is SHA-256 over (pepper, salt, password), length-prefixed.
// The salt is per user and stored; the pepper comes from a SecretProvider
// and is never written next to the hashes or logged.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ag_audit::hasher;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::RbacError;

/// Environment variable read by [`EnvSecretProvider::default`].
pub const SECRET_ENV_VAR: &str = "AG_SECRET_KEY";

/// Source of the pepper mixed into every password hash.
pub trait SecretProvider: Send + Sync {
    fn pepper(&self) -> Result<String, RbacError>;
}

/// Reads the pepper from an environment variable.
pub struct EnvSecretProvider {
    var: String,
}

impl EnvSecretProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new(SECRET_ENV_VAR)
    }
}

impl SecretProvider for EnvSecretProvider {
    fn pepper(&self) -> Result<String, RbacError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(RbacError::Secret(format!("{} is not set", self.var))),
        }
    }
}

/// Reads the pepper from a key file, generating one on first use.
pub struct FileSecretProvider {
    path: PathBuf,
}

impl FileSecretProvider {
    /// Use `path`, creating it with a random key if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, RbacError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| RbacError::io(parent.display(), e))?;
            }
            fs::write(&path, random_hex(32)).map_err(|e| RbacError::io(path.display(), e))?;
            restrict_permissions(&path)?;
            tracing::info!(path = %path.display(), "secret key generated");
        }
        Ok(Self { path })
    }
}

impl SecretProvider for FileSecretProvider {
    fn pepper(&self) -> Result<String, RbacError> {
        let key = fs::read_to_string(&self.path).map_err(|e| RbacError::io(self.path.display(), e))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(RbacError::Secret(format!("{} is empty", self.path.display())));
        }
        Ok(key.to_string())
    }
}

/// A fixed pepper, for tests and embedding.
pub struct StaticSecretProvider(String);

impl StaticSecretProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

impl SecretProvider for StaticSecretProvider {
    fn pepper(&self) -> Result<String, RbacError> {
        Ok(self.0.clone())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), RbacError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| RbacError::io(path.display(), e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), RbacError> {
    Ok(())
}

/// Username and password as supplied by the caller.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A salted, peppered password digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    pub salt: String,
    pub digest: String,
}

impl PasswordHash {
    pub fn create(password: &str, pepper: &str) -> Self {
        let salt = random_hex(16);
        let digest = hasher::hash_parts(&[pepper, &salt, password]);
        Self { salt, digest }
    }

    pub fn verify(&self, password: &str, pepper: &str) -> bool {
        let candidate = hasher::hash_parts(&[pepper, &self.salt, password]);
        constant_time_eq(candidate.as_bytes(), self.digest.as_bytes())
    }
}

/// Hex string of `bytes` random bytes.
pub(crate) fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

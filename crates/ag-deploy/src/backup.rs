// backup.rs — Immutable rule-set backups.
//
// Layout under the backups directory:
//
//   <id>/backup.json          metadata and manifest (artifact → sha256)
//   <id>/artifacts/rules.json the captured rule artifact
//   <id>/artifacts/<file>     dependent artifacts (e.g. config.toml)
//
// A backup is assembled in a hidden staging directory and renamed into
// place, so a half-written backup is never visible under its id. Existing
// backups are never overwritten.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ag_audit::hasher;
use ag_policy::{ArtifactFormat, RuleArtifact, RuleSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DeployError;

/// Manifest name of the captured rule artifact.
pub const RULES_ARTIFACT: &str = "rules.json";

const METADATA_FILE: &str = "backup.json";
const ARTIFACTS_DIR: &str = "artifacts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupReason {
    /// Taken automatically before a deployment.
    PreDeployment,
    /// Taken automatically before restoring another backup.
    PreRestore,
    /// Requested explicitly.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub reason: BackupReason,
    /// Version of the rule set captured.
    pub deployment_version: String,
    pub ruleset_fingerprint: String,
    /// Artifact name → SHA-256 of its bytes.
    pub manifest: BTreeMap<String, String>,
    /// Where each dependent artifact was copied from.
    #[serde(default)]
    pub sources: BTreeMap<String, PathBuf>,
}

/// Directory-backed backup storage.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, DeployError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| DeployError::io(dir.display(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture `ruleset` and `dependents` as a new backup.
    ///
    /// `name` is used as the id when given; otherwise a timestamped id is
    /// generated. Missing dependents are skipped.
    pub fn create(
        &self,
        name: Option<&str>,
        reason: BackupReason,
        ruleset: &RuleSet,
        dependents: &[PathBuf],
    ) -> Result<Backup, DeployError> {
        let id = match name {
            Some(name) => {
                validate_name(name)?;
                name.to_string()
            }
            None => generate_id(),
        };
        let final_dir = self.dir.join(&id);
        if final_dir.exists() {
            return Err(DeployError::BackupExists(id));
        }

        let staging = self.dir.join(format!(".staging-{}", Uuid::new_v4()));
        let result = self.write_backup(&staging, &id, reason, ruleset, dependents);
        let backup = match result {
            Ok(backup) => backup,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&staging, &final_dir) {
            let _ = fs::remove_dir_all(&staging);
            return Err(DeployError::BackupFailure(format!(
                "could not move backup into {}: {}",
                final_dir.display(),
                e
            )));
        }

        tracing::info!(
            backup_id = %backup.id,
            reason = ?backup.reason,
            version = %backup.deployment_version,
            artifacts = backup.manifest.len(),
            "backup created"
        );
        Ok(backup)
    }

    fn write_backup(
        &self,
        staging: &Path,
        id: &str,
        reason: BackupReason,
        ruleset: &RuleSet,
        dependents: &[PathBuf],
    ) -> Result<Backup, DeployError> {
        let artifacts = staging.join(ARTIFACTS_DIR);
        fs::create_dir_all(&artifacts).map_err(|e| DeployError::io(artifacts.display(), e))?;

        let mut manifest = BTreeMap::new();
        let mut sources = BTreeMap::new();

        let rules = ruleset.artifact().render(ArtifactFormat::Json)?;
        let rules_path = artifacts.join(RULES_ARTIFACT);
        fs::write(&rules_path, &rules).map_err(|e| DeployError::io(rules_path.display(), e))?;
        manifest.insert(RULES_ARTIFACT.to_string(), hasher::hash_str(&rules));

        for source in dependents {
            let Some(file_name) = source.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name == RULES_ARTIFACT || !source.is_file() {
                continue;
            }
            let bytes = fs::read(source).map_err(|e| DeployError::io(source.display(), e))?;
            let dest = artifacts.join(file_name);
            fs::write(&dest, &bytes).map_err(|e| DeployError::io(dest.display(), e))?;
            manifest.insert(file_name.to_string(), hasher::hash_bytes(&bytes));
            sources.insert(file_name.to_string(), source.clone());
        }

        let backup = Backup {
            id: id.to_string(),
            created_at: Utc::now(),
            reason,
            deployment_version: ruleset.version().to_string(),
            ruleset_fingerprint: ruleset.fingerprint().to_string(),
            manifest,
            sources,
        };
        let meta = staging.join(METADATA_FILE);
        fs::write(&meta, serde_json::to_string_pretty(&backup)?)
            .map_err(|e| DeployError::io(meta.display(), e))?;
        Ok(backup)
    }

    pub fn load(&self, id: &str) -> Result<Backup, DeployError> {
        validate_name(id)?;
        let meta = self.dir.join(id).join(METADATA_FILE);
        if !meta.exists() {
            return Err(DeployError::BackupNotFound(id.to_string()));
        }
        let json = fs::read_to_string(&meta).map_err(|e| DeployError::io(meta.display(), e))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Check every artifact against the manifest.
    pub fn verify(&self, backup: &Backup) -> Result<(), DeployError> {
        for (name, expected) in &backup.manifest {
            let path = self.artifact_path(&backup.id, name);
            let actual = hasher::hash_file(&path).map_err(|e| {
                DeployError::BackupFailure(format!("{}: {}", backup.id, e))
            })?;
            if &actual != expected {
                return Err(DeployError::BackupCorrupt {
                    backup_id: backup.id.clone(),
                    artifact: name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    /// The verified rule artifact of a backup.
    pub fn load_artifact(&self, id: &str) -> Result<RuleArtifact, DeployError> {
        let backup = self.load(id)?;
        self.verify(&backup)?;
        let path = self.artifact_path(id, RULES_ARTIFACT);
        Ok(RuleArtifact::load(&path)?)
    }

    /// Copy dependent artifacts back to where they were taken from.
    pub fn restore_dependents(&self, backup: &Backup) -> Result<usize, DeployError> {
        let mut restored = 0;
        for (name, target) in &backup.sources {
            let from = self.artifact_path(&backup.id, name);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| DeployError::io(parent.display(), e))?;
            }
            fs::copy(&from, target).map_err(|e| DeployError::io(target.display(), e))?;
            restored += 1;
        }
        Ok(restored)
    }

    /// All backups, newest first. Unreadable entries are skipped.
    pub fn list(&self) -> Result<Vec<Backup>, DeployError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| DeployError::io(self.dir.display(), e))?;
        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DeployError::io(self.dir.display(), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            match self.load(name) {
                Ok(backup) => backups.push(backup),
                Err(e) => tracing::warn!(backup = name, error = %e, "skipping unreadable backup"),
            }
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Delete all but the newest `keep` automatic backups, never touching
    /// `pinned`. Manual backups are only removed by hand. Returns the ids
    /// removed.
    pub fn prune(&self, keep: usize, pinned: &[&str]) -> Result<Vec<String>, DeployError> {
        let mut removed = Vec::new();
        let automatic = self
            .list()?
            .into_iter()
            .filter(|b| b.reason != BackupReason::Manual);
        for backup in automatic.skip(keep) {
            if pinned.contains(&backup.id.as_str()) {
                continue;
            }
            let dir = self.dir.join(&backup.id);
            fs::remove_dir_all(&dir).map_err(|e| DeployError::io(dir.display(), e))?;
            removed.push(backup.id);
        }
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "old backups pruned");
        }
        Ok(removed)
    }

    fn artifact_path(&self, id: &str, name: &str) -> PathBuf {
        self.dir.join(id).join(ARTIFACTS_DIR).join(name)
    }
}

fn generate_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "backup-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
        &suffix[..8]
    )
}

fn validate_name(name: &str) -> Result<(), DeployError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > 128 {
        Some("name is longer than 128 characters")
    } else if name.starts_with('.') {
        Some("name must not start with '.'")
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("only letters, digits, '-', '_' and '.' are allowed")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(DeployError::InvalidBackupName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ruleset() -> RuleSet {
        RuleSet::compile(RuleArtifact::builtin().unwrap()).unwrap()
    }

    #[test]
    fn create_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups")).unwrap();
        let set = ruleset();

        let backup = store
            .create(Some("before-upgrade"), BackupReason::Manual, &set, &[])
            .unwrap();
        assert_eq!(backup.id, "before-upgrade");
        assert_eq!(backup.ruleset_fingerprint, set.fingerprint());
        assert!(backup.manifest.contains_key(RULES_ARTIFACT));

        let artifact = store.load_artifact("before-upgrade").unwrap();
        assert_eq!(artifact.fingerprint().unwrap(), set.fingerprint());
    }

    #[test]
    fn backups_are_immutable() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path()).unwrap();
        store.create(Some("b1"), BackupReason::Manual, &ruleset(), &[]).unwrap();
        let err = store
            .create(Some("b1"), BackupReason::Manual, &ruleset(), &[])
            .unwrap_err();
        assert!(matches!(err, DeployError::BackupExists(_)));
    }

    #[test]
    fn tampering_is_detected() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path()).unwrap();
        store.create(Some("b1"), BackupReason::Manual, &ruleset(), &[]).unwrap();
        fs::write(dir.path().join("b1/artifacts/rules.json"), "{}").unwrap();
        assert!(matches!(
            store.load_artifact("b1").unwrap_err(),
            DeployError::BackupCorrupt { .. }
        ));
    }

    #[test]
    fn dependents_are_captured_and_restored() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("config.toml");
        fs::write(&config, "cache_ttl_secs = 10\n").unwrap();
        let store = BackupStore::new(dir.path().join("backups")).unwrap();
        let backup = store
            .create(None, BackupReason::PreDeployment, &ruleset(), &[config.clone(), dir.path().join("absent.toml")])
            .unwrap();
        assert_eq!(backup.manifest.len(), 2);
        assert!(backup.id.starts_with("backup-"));

        fs::write(&config, "cache_ttl_secs = 99\n").unwrap();
        assert_eq!(store.restore_dependents(&backup).unwrap(), 1);
        assert_eq!(fs::read_to_string(&config).unwrap(), "cache_ttl_secs = 10\n");
    }

    #[test]
    fn list_and_prune_keep_newest() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path()).unwrap();
        for name in ["a", "b", "c", "d"] {
            store.create(Some(name), BackupReason::PreDeployment, &ruleset(), &[]).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["d", "c", "b", "a"]);

        let removed = store.prune(2, &["a"]).unwrap();
        assert_eq!(removed, vec!["b".to_string()]);
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn manual_backups_survive_retention() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path()).unwrap();
        store.create(Some("keep-me"), BackupReason::Manual, &ruleset(), &[]).unwrap();
        for name in ["auto-1", "auto-2", "auto-3"] {
            std::thread::sleep(std::time::Duration::from_millis(5));
            store.create(Some(name), BackupReason::PreDeployment, &ruleset(), &[]).unwrap();
        }

        let removed = store.prune(1, &[]).unwrap();
        assert_eq!(removed, vec!["auto-2".to_string(), "auto-1".to_string()]);
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["auto-3", "keep-me"]);
    }

    #[test]
    fn names_are_validated() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path()).unwrap();
        for bad in ["", "../escape", ".hidden", "has space"] {
            assert!(matches!(
                store.create(Some(bad), BackupReason::Manual, &ruleset(), &[]),
                Err(DeployError::InvalidBackupName { .. })
            ));
        }
        assert!(matches!(
            store.load("missing"),
            Err(DeployError::BackupNotFound(_))
        ));
    }
}

// store.rs — The active rule set, swapped atomically as a whole.
//
// Readers take an Arc<RuleSet> snapshot under a read lock held only long
// enough to clone the Arc, then evaluate without any lock. Writers replace
// the Arc. A reader therefore sees either the old set or the new set, never
// a mix of both.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use crate::error::{PolicyError, RuleLoadError};
use crate::ruleset::{LintFinding, RuleArtifact, RuleSet};

/// A compiled rule set that has not been installed yet.
///
/// Only the deployment orchestrator stages and swaps sets.
#[derive(Debug, Clone)]
pub struct StagedRuleSet {
    ruleset: RuleSet,
}

impl StagedRuleSet {
    pub fn ruleset(&self) -> &RuleSet {
        &self.ruleset
    }

    pub fn lint(&self) -> Vec<LintFinding> {
        self.ruleset.lint()
    }
}

/// Owner of the active rule collection.
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
    next_generation: AtomicU64,
}

impl RuleStore {
    /// A store holding the empty set at generation 0.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSet::empty())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// A store with `artifact` installed as generation 1.
    pub fn from_artifact(artifact: RuleArtifact) -> Result<Self, RuleLoadError> {
        let store = Self::new();
        let staged = store.stage(artifact)?;
        store.swap(staged);
        Ok(store)
    }

    /// A store initialised from an artifact on disk.
    pub fn load(path: &Path) -> Result<Self, RuleLoadError> {
        let artifact = RuleArtifact::load(path)?;
        let store = Self::from_artifact(artifact)?;
        tracing::info!(
            path = %path.display(),
            rules = store.current().len(),
            "rule set loaded"
        );
        Ok(store)
    }

    /// The active snapshot.
    pub fn current(&self) -> Arc<RuleSet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Compile an artifact without installing it.
    pub fn stage(&self, artifact: RuleArtifact) -> Result<StagedRuleSet, RuleLoadError> {
        Ok(StagedRuleSet {
            ruleset: RuleSet::compile(artifact)?,
        })
    }

    /// Stage an already compiled snapshot again, e.g. to put back the set a
    /// swap replaced. It gets a fresh generation when swapped in.
    pub fn restage(&self, snapshot: &RuleSet) -> StagedRuleSet {
        StagedRuleSet {
            ruleset: snapshot.clone(),
        }
    }

    /// Install a staged set, returning the set it replaced.
    pub fn swap(&self, staged: StagedRuleSet) -> Arc<RuleSet> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let next = Arc::new(staged.ruleset.with_generation(generation));

        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = std::mem::replace(&mut *guard, Arc::clone(&next));
        drop(guard);

        tracing::info!(
            version = %next.version(),
            generation,
            rules = next.len(),
            fingerprint = %next.fingerprint(),
            "rule set swapped"
        );
        previous
    }

    /// Write the active artifact to disk atomically.
    pub fn persist(&self, path: &Path) -> Result<(), PolicyError> {
        self.current().artifact().write_atomic(path)
    }

    /// Install the artifact at `path` if it differs from the active set.
    /// Returns the replaced set, or `None` when nothing changed. A bad
    /// artifact leaves the active set in place.
    pub fn sync_from(&self, path: &Path) -> Result<Option<Arc<RuleSet>>, RuleLoadError> {
        let staged = self.stage(RuleArtifact::load(path)?)?;
        if staged.ruleset().fingerprint() == self.current().fingerprint() {
            return Ok(None);
        }
        let previous = self.swap(staged);
        tracing::info!(
            path = %path.display(),
            from = %previous.version(),
            to = %self.current().version(),
            "rule set reloaded from disk"
        );
        Ok(Some(previous))
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

/// Keeps a store in step with an artifact another process may rewrite.
///
/// The file is only read when its size or modification time changed since
/// the last successful sync.
#[derive(Debug)]
pub struct ArtifactWatch {
    path: PathBuf,
    seen: Mutex<Option<FileStamp>>,
}

impl ArtifactWatch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload `store` if the artifact changed on disk. A missing artifact
    /// is not an error; the active set stays.
    pub fn sync(&self, store: &RuleStore) -> Result<Option<Arc<RuleSet>>, RuleLoadError> {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *seen = None;
                return Ok(None);
            }
            Err(source) => {
                return Err(RuleLoadError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let stamp = FileStamp {
            len: meta.len(),
            modified: meta.modified().ok(),
        };
        if *seen == Some(stamp) {
            return Ok(None);
        }
        *seen = None;
        let replaced = store.sync_from(&self.path)?;
        *seen = Some(stamp);
        Ok(replaced)
    }
}

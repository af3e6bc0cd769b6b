// lock.rs — Deployment lock shared between processes.
//
// An exclusive advisory lock on a file next to the rest of the state. The
// OS drops it when the holding process exits, so a deploy that crashed
// never blocks the next one. The file itself is left in place and names
// the last holder.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;

use crate::error::DeployError;

/// Held for the duration of one deployment; released on drop.
#[derive(Debug)]
pub struct DeployLock {
    file: File,
    path: PathBuf,
}

impl DeployLock {
    /// Take the lock without waiting. `Ok(None)` when another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, DeployError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| DeployError::io(dir.display(), e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| DeployError::io(path.display(), e))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
                || e.kind() == std::io::ErrorKind::WouldBlock
            {
                tracing::debug!(path = %path.display(), "deployment lock held elsewhere");
                return Ok(None);
            }
            return Err(DeployError::io(path.display(), e));
        }

        let holder = format!("{} {}\n", std::process::id(), Utc::now().to_rfc3339());
        file.set_len(0)
            .and_then(|_| file.write_all(holder.as_bytes()))
            .map_err(|e| DeployError::io(path.display(), e))?;
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "deployment lock not released");
        }
    }
}

// log.rs — Append-only, hash-chained JSONL audit log.
//
// Every event stores the SHA-256 of the raw line written before it in
// `previous_hash`; the first event stores none. Chain verification hashes
// the bytes as written, never a re-serialization, so field order cannot
// matter.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::hasher;

/// Result of walking a log's hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub events: usize,
    /// Hash of the last line; the next event links to it.
    pub head: Option<String>,
}

/// Writer side of the audit log. One writer per file per process; callers
/// that share it serialize access themselves.
pub struct AuditLog {
    file: File,
    path: PathBuf,
    head: Option<String>,
}

impl AuditLog {
    /// Open the log for appending, creating it and its directory if needed.
    /// The chain continues from whatever the file already holds.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| AuditError::Open {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(open_err)?;
        }
        let head = raw_lines(&path)?.last().map(|(_, line)| hasher::hash_str(line));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        Ok(Self { file, path, head })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Link `event` to the chain and write it as one line. The chain head
    /// only moves once the write has succeeded.
    pub fn append(&mut self, event: &mut AuditEvent) -> Result<(), AuditError> {
        event.previous_hash = self.head.clone();
        let mut line = serde_json::to_string(event)?;
        let hash = hasher::hash_str(&line);
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.head = Some(hash);

        tracing::debug!(
            action = %event.action,
            actor = %event.actor,
            allowed = event.allowed,
            "audit event appended"
        );
        Ok(())
    }

    /// Every event, oldest first. A missing log has none.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>, AuditError> {
        raw_lines(path.as_ref())?
            .iter()
            .map(|(_, line)| Ok(serde_json::from_str(line)?))
            .collect()
    }

    /// The last `n` events, oldest first.
    pub fn tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events = Self::read_all(path)?;
        let keep_from = events.len().saturating_sub(n);
        Ok(events.split_off(keep_from))
    }

    /// Events with `start <= timestamp <= end`, oldest first.
    pub fn read_between(
        path: impl AsRef<Path>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(Self::read_all(path)?
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect())
    }

    /// Walk the chain. The first line whose `previous_hash` does not match
    /// fails with `IntegrityViolation`.
    pub fn verify(path: impl AsRef<Path>) -> Result<ChainReport, AuditError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AuditError::Open {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no audit log"),
            });
        }

        let mut report = ChainReport {
            events: 0,
            head: None,
        };
        for (line_no, line) in raw_lines(path)? {
            let event: AuditEvent = serde_json::from_str(&line)?;
            if event.previous_hash != report.head {
                let show = |h: Option<String>| h.unwrap_or_else(|| "none".to_string());
                return Err(AuditError::IntegrityViolation {
                    line: line_no,
                    expected: show(report.head),
                    actual: show(event.previous_hash),
                });
            }
            report.head = Some(hasher::hash_str(&line));
            report.events += 1;
        }
        Ok(report)
    }

    /// Whether the chain is intact; see [`verify`](Self::verify).
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<bool, AuditError> {
        Self::verify(path).map(|_| true)
    }
}

/// Non-blank lines with their 1-based line numbers.
fn raw_lines(path: &Path) -> Result<Vec<(usize, String)>, AuditError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(AuditError::Open {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mut lines = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push((idx + 1, line));
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditAction;
    use chrono::Duration;
    use tempfile::tempdir;

    fn write_events(path: &Path, actors: &[&str], action: AuditAction) {
        let mut log = AuditLog::open(path).unwrap();
        for actor in actors {
            log.append(&mut AuditEvent::new(*actor, action)).unwrap();
        }
    }

    #[test]
    fn events_link_to_their_predecessor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        write_events(&path, &["alice", "bob"], AuditAction::Authentication);

        let events = AuditLog::read_all(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].previous_hash.is_none());
        let first_line = fs::read_to_string(&path).unwrap().lines().next().unwrap().to_string();
        assert_eq!(events[1].previous_hash, Some(hasher::hash_str(&first_line)));
    }

    #[test]
    fn chain_continues_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        write_events(&path, &["alice"], AuditAction::Authentication);
        write_events(&path, &["alice"], AuditAction::Logout);

        let report = AuditLog::verify(&path).unwrap();
        assert_eq!(report.events, 2);
        assert!(report.head.is_some());
    }

    #[test]
    fn flipped_denial_is_detected_on_the_next_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut log = AuditLog::open(&path).unwrap();
            for _ in 0..3 {
                let mut event =
                    AuditEvent::new("mallory", AuditAction::PermissionCheck).with_allowed(false);
                log.append(&mut event).unwrap();
            }
        }

        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replacen("\"allowed\":false", "\"allowed\":true", 1)).unwrap();

        assert!(matches!(
            AuditLog::verify(&path),
            Err(AuditError::IntegrityViolation { line: 2, .. })
        ));
    }

    #[test]
    fn deleted_line_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        write_events(&path, &["a", "b", "c"], AuditAction::Backup);

        let content = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(&path, kept.join("\n")).unwrap();

        assert!(AuditLog::verify_chain(&path).is_err());
    }

    #[test]
    fn tail_and_window_reads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        write_events(&path, &["u0", "u1", "u2", "u3", "u4"], AuditAction::Backup);

        let recent = AuditLog::tail(&path, 2).unwrap();
        assert_eq!(recent.iter().map(|e| e.actor.as_str()).collect::<Vec<_>>(), ["u3", "u4"]);

        let now = Utc::now();
        assert_eq!(
            AuditLog::read_between(&path, now - Duration::hours(1), now + Duration::hours(1))
                .unwrap()
                .len(),
            5
        );
        assert!(AuditLog::read_between(&path, now + Duration::hours(1), now + Duration::hours(2))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn missing_log_reads_empty_but_does_not_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("none.jsonl");
        assert!(AuditLog::read_all(&path).unwrap().is_empty());
        assert!(AuditLog::tail(&path, 3).unwrap().is_empty());
        assert!(matches!(AuditLog::verify(&path), Err(AuditError::Open { .. })));
    }
}

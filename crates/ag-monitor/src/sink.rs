// sink.rs — Where raised and resolved alerts go.
//
// The JSONL sink is the durable record (`.ag/alerts.jsonl`); `replay`
// rebuilds the latest state of every alert from it so the CLI can show
// alerts without a running daemon.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::{Alert, AlertSeverity};
use crate::error::MonitorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEventKind {
    Raised,
    Resolved,
}

/// One line of the alert log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub kind: AlertEventKind,
    pub alert: Alert,
}

/// Receives alert lifecycle events. Failures are logged by the monitor and
/// never stop a cycle.
pub trait AlertSink: Send + Sync {
    fn emit(&self, record: &AlertRecord) -> Result<(), MonitorError>;
}

/// Appends alert records as JSONL.
pub struct JsonlAlertSink {
    path: PathBuf,
}

impl JsonlAlertSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn io_err(&self, source: std::io::Error) -> MonitorError {
        MonitorError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl AlertSink for JsonlAlertSink {
    fn emit(&self, record: &AlertRecord) -> Result<(), MonitorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

/// Mirrors alerts into the tracing stream.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, record: &AlertRecord) -> Result<(), MonitorError> {
        let a = &record.alert;
        match record.kind {
            AlertEventKind::Raised if a.severity >= AlertSeverity::High => tracing::error!(
                alert_id = %a.id,
                severity = %a.severity,
                source = %a.source_component,
                signature = %a.signature,
                "alert raised: {}",
                a.message
            ),
            AlertEventKind::Raised => tracing::warn!(
                alert_id = %a.id,
                severity = %a.severity,
                source = %a.source_component,
                signature = %a.signature,
                "alert raised: {}",
                a.message
            ),
            AlertEventKind::Resolved => tracing::info!(
                alert_id = %a.id,
                source = %a.source_component,
                signature = %a.signature,
                "alert resolved"
            ),
        }
        Ok(())
    }
}

/// Latest state of every alert in a JSONL alert log, oldest first.
///
/// A missing log means no alerts. Unparseable lines are skipped with a
/// warning.
pub fn replay(path: &Path) -> Result<Vec<Alert>, MonitorError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(MonitorError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let mut order: Vec<Uuid> = Vec::new();
    let mut latest: HashMap<Uuid, Alert> = HashMap::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| MonitorError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AlertRecord>(&line) {
            Ok(record) => {
                let id = record.alert.id;
                if latest.insert(id, record.alert).is_none() {
                    order.push(id);
                }
            }
            Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping malformed alert record"),
        }
    }
    Ok(order
        .into_iter()
        .filter_map(|id| latest.remove(&id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertBook, AlertUpdate};

    #[test]
    fn jsonl_sink_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/alerts.jsonl");
        let sink = JsonlAlertSink::new(&path);

        let mut book = AlertBook::new();
        let AlertUpdate::Raised(cpu) = book.raise("resources", "cpu_high", AlertSeverity::High, "cpu")
        else {
            panic!("expected raise");
        };
        let AlertUpdate::Raised(mem) = book.raise("resources", "mem_high", AlertSeverity::Medium, "mem")
        else {
            panic!("expected raise");
        };
        for alert in [&cpu, &mem] {
            sink.emit(&AlertRecord {
                kind: AlertEventKind::Raised,
                alert: alert.clone(),
            })
            .unwrap();
        }
        let resolved = book.resolve(cpu.id).unwrap();
        sink.emit(&AlertRecord {
            kind: AlertEventKind::Resolved,
            alert: resolved,
        })
        .unwrap();

        let alerts = replay(&path).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].id, cpu.id);
        assert!(alerts[0].resolved);
        assert!(!alerts[1].resolved);
    }

    #[test]
    fn replay_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(replay(&dir.path().join("none.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn replay_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        fs::write(&path, "not json\n\n").unwrap();
        assert!(replay(&path).unwrap().is_empty());
    }
}

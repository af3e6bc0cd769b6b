// error_rate.rs — Sliding-window error rate, fed by callers and log files.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use regex::Regex;

use crate::error::AlertConditionError;
use crate::health::{CheckMode, ComponentStatus, Threshold};
use crate::probe::HealthProbe;

/// Timestamps of recent errors within a fixed window.
#[derive(Debug)]
pub struct ErrorWindow {
    window: Duration,
    events: Mutex<VecDeque<Instant>>,
}

impl ErrorWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_secs(1)),
            events: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn record(&self) {
        self.record_many(1);
    }

    pub fn record_many(&self, n: usize) {
        let now = Instant::now();
        let mut events = self.lock();
        events.extend(std::iter::repeat(now).take(n));
    }

    /// Errors inside the window, after dropping older ones.
    pub fn count(&self) -> usize {
        let now = Instant::now();
        let mut events = self.lock();
        while let Some(front) = events.front() {
            if now.duration_since(*front) > self.window {
                events.pop_front();
            } else {
                break;
            }
        }
        events.len()
    }

    pub fn rate_per_minute(&self) -> f64 {
        self.count() as f64 * 60.0 / self.window.as_secs_f64()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Lines counted as errors when no pattern is configured.
pub const DEFAULT_ERROR_PATTERN: &str = r"\b(ERROR|CRITICAL|FATAL)\b|Traceback";

/// Tails log files and counts new error lines since the last scan.
pub struct LogScanner {
    paths: Vec<PathBuf>,
    pattern: Regex,
    state: Mutex<ScanState>,
}

#[derive(Default)]
struct ScanState {
    offsets: HashMap<PathBuf, u64>,
    primed: bool,
}

impl LogScanner {
    /// `pattern` is a regex matched against each new line.
    pub fn new(paths: Vec<PathBuf>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            paths,
            pattern: Regex::new(pattern)?,
            state: Mutex::new(ScanState::default()),
        })
    }

    /// Count error lines appended since the previous scan.
    ///
    /// The first scan only records where each existing file ends and counts
    /// nothing. Files that appear later are read from the start. Missing
    /// files are skipped. A file that shrank was rotated and is read from
    /// the start. Bytes that are not UTF-8 are replaced, never fatal.
    pub fn scan(&self) -> Result<usize, AlertConditionError> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let baseline = !state.primed;
        state.primed = true;
        let mut total = 0;

        for path in &self.paths {
            let fail = |e: std::io::Error| {
                AlertConditionError::new("error_rate", format!("{}: {}", path.display(), e))
            };
            let mut file = match File::open(path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(fail(e)),
            };
            let len = file.metadata().map_err(fail)?.len();
            if baseline {
                state.offsets.insert(path.clone(), len);
                continue;
            }
            let mut offset = state.offsets.get(path).copied().unwrap_or(0);
            if len < offset {
                tracing::debug!(path = %path.display(), "log rotated, rescanning");
                offset = 0;
            }
            file.seek(SeekFrom::Start(offset)).map_err(fail)?;

            let mut reader = BufReader::new(file);
            let mut line = Vec::new();
            let mut consumed = offset;
            loop {
                line.clear();
                let n = reader.read_until(b'\n', &mut line).map_err(fail)?;
                // Leave a partial trailing line for the next scan.
                if n == 0 || line.last() != Some(&b'\n') {
                    break;
                }
                consumed += n as u64;
                if self.pattern.is_match(&String::from_utf8_lossy(&line)) {
                    total += 1;
                }
            }
            state.offsets.insert(path.clone(), consumed);
        }
        Ok(total)
    }
}

/// Classifies the error rate, pulling new errors from logs first.
pub struct ErrorRateProbe {
    window: Arc<ErrorWindow>,
    scanner: Option<LogScanner>,
    threshold: Threshold,
}

impl ErrorRateProbe {
    pub fn new(window: Arc<ErrorWindow>, threshold: Threshold) -> Self {
        Self {
            window,
            scanner: None,
            threshold,
        }
    }

    pub fn with_scanner(mut self, scanner: LogScanner) -> Self {
        self.scanner = Some(scanner);
        self
    }
}

impl HealthProbe for ErrorRateProbe {
    fn name(&self) -> &str {
        "error_rate"
    }

    fn runs_in(&self, mode: CheckMode) -> bool {
        mode == CheckMode::Full
    }

    fn check(&self) -> Result<ComponentStatus, AlertConditionError> {
        if let Some(scanner) = &self.scanner {
            let found = scanner.scan()?;
            if found > 0 {
                self.window.record_many(found);
            }
        }
        let rate = self.window.rate_per_minute();
        let detail = format!(
            "{:.1} errors/min over {}s",
            rate,
            self.window.window().as_secs()
        );
        Ok(ComponentStatus::from_threshold(
            &self.threshold,
            rate,
            "error_spike",
            detail,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;
    use std::io::Write;

    #[test]
    fn window_rate_scales_to_minutes() {
        let window = ErrorWindow::new(Duration::from_secs(30));
        window.record_many(3);
        assert_eq!(window.count(), 3);
        assert!((window.rate_per_minute() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn old_errors_leave_the_window() {
        let window = ErrorWindow::new(Duration::from_secs(1));
        window.record();
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(window.count(), 0);
    }

    fn append(path: &std::path::Path, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn scanner_counts_only_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "INFO start\nERROR one\nWARN x\n").unwrap();
        let scanner = LogScanner::new(
            vec![path.clone(), dir.path().join("missing.log")],
            DEFAULT_ERROR_PATTERN,
        )
        .unwrap();
        assert_eq!(scanner.scan().unwrap(), 0);
        assert_eq!(scanner.scan().unwrap(), 0);

        append(&path, b"CRITICAL two\nERROR partial");
        assert_eq!(scanner.scan().unwrap(), 1);
        append(&path, b"\n");
        assert_eq!(scanner.scan().unwrap(), 1);
    }

    #[test]
    fn file_created_after_first_scan_is_read_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.log");
        let scanner = LogScanner::new(vec![path.clone()], DEFAULT_ERROR_PATTERN).unwrap();
        assert_eq!(scanner.scan().unwrap(), 0);
        std::fs::write(&path, "ERROR a\nINFO b\nFATAL c\n").unwrap();
        assert_eq!(scanner.scan().unwrap(), 2);
    }

    #[test]
    fn rotated_file_is_rescanned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "ERROR a\nERROR b\nERROR c\n").unwrap();
        let scanner = LogScanner::new(vec![path.clone()], DEFAULT_ERROR_PATTERN).unwrap();
        assert_eq!(scanner.scan().unwrap(), 0);
        std::fs::write(&path, "ERROR new\n").unwrap();
        assert_eq!(scanner.scan().unwrap(), 1);
    }

    #[test]
    fn invalid_utf8_does_not_stall_the_scanner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "INFO boot\n").unwrap();
        let scanner = LogScanner::new(vec![path.clone()], DEFAULT_ERROR_PATTERN).unwrap();
        assert_eq!(scanner.scan().unwrap(), 0);

        append(&path, b"ERROR bad bytes \xff\xfe here\n");
        assert_eq!(scanner.scan().unwrap(), 1);
        append(&path, b"ERROR after\n");
        assert_eq!(scanner.scan().unwrap(), 1);
        assert_eq!(scanner.scan().unwrap(), 0);
    }

    #[test]
    fn historical_errors_do_not_raise_the_first_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "ERROR old failure\n".repeat(30)).unwrap();
        let scanner = LogScanner::new(vec![path.clone()], DEFAULT_ERROR_PATTERN).unwrap();
        let probe = ErrorRateProbe::new(
            Arc::new(ErrorWindow::new(Duration::from_secs(60))),
            Threshold::new(5.0, 20.0),
        )
        .with_scanner(scanner);

        assert_eq!(probe.check().unwrap().status, HealthStatus::Healthy);
        append(&path, "ERROR fresh\n".repeat(6).as_bytes());
        assert_eq!(probe.check().unwrap().status, HealthStatus::Degraded);
    }

    #[test]
    fn spike_is_unhealthy() {
        let window = Arc::new(ErrorWindow::new(Duration::from_secs(60)));
        window.record_many(25);
        let probe = ErrorRateProbe::new(window, Threshold::new(5.0, 20.0));
        let status = probe.check().unwrap();
        assert_eq!(status.status, HealthStatus::Unhealthy);
        assert_eq!(status.signature.as_deref(), Some("error_spike"));
    }
}

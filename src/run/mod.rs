//! Per-run plumbing shared by the crawl and the course selector: the bounded
//! run log, the cancellation token and the single-active-run guard.

use chrono::Utc;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Receives every run log line as it is produced.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Bounded, timestamped log of one run.
///
/// Oldest lines are dropped once `capacity` is reached. Every line is also
/// forwarded to the optional sink and to `tracing`.
pub struct RunLog {
    run_id: Uuid,
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
    sink: Option<LogSink>,
}

impl RunLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::new()),
            sink: None,
        }
    }

    pub fn with_sink(capacity: usize, sink: LogSink) -> Self {
        Self {
            sink: Some(sink),
            ..Self::new(capacity)
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(run_id = %self.run_id, "{}", message);

        let line = format!("[{}] {}", Utc::now().to_rfc3339(), message);
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() >= self.capacity {
                lines.pop_front();
            }
            lines.push_back(line.clone());
        }
        if let Some(sink) = &self.sink {
            sink(&line);
        }
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the buffered lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Takes the buffered lines, leaving the buffer empty.
    pub fn drain(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|mut l| l.drain(..).collect())
            .unwrap_or_default()
    }

    /// Writes the buffered lines to a text file, one per line.
    pub fn export(&self, path: &Path) -> Result<()> {
        let content = self.snapshot().join("\n");
        std::fs::write(path, content)
            .map_err(|e| AppError::Storage(format!("Failed to export run log: {}", e)))
    }
}

/// Cooperative cancellation flag, checked between pages and between jobs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Admits at most one active run; a second start is rejected, never queued.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    active: Arc<AtomicBool>,
}

static CRAWL_GUARD: OnceLock<RunGuard> = OnceLock::new();

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The guard every crawl in this process shares.
    pub fn global() -> Self {
        CRAWL_GUARD.get_or_init(RunGuard::new).clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn try_acquire(&self) -> Result<ActiveRun> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AppError::AlreadyRunning)?;
        Ok(ActiveRun {
            active: Arc::clone(&self.active),
        })
    }
}

/// Held for the duration of a run; releases the guard when dropped.
#[derive(Debug)]
pub struct ActiveRun {
    active: Arc<AtomicBool>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_is_bounded() {
        let log = RunLog::new(3);
        for i in 0..5 {
            log.log(format!("line {}", i));
        }
        let lines = log.snapshot();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("line 2"));
        assert!(lines[2].ends_with("line 4"));
    }

    #[test]
    fn test_run_log_forwards_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let log = RunLog::with_sink(10, Arc::new(move |line: &str| {
            captured.lock().unwrap().push(line.to_string());
        }));
        log.log("hello");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with('['));
        assert!(seen[0].ends_with("] hello"));
    }

    #[test]
    fn test_drain_empties_buffer() {
        let log = RunLog::new(10);
        log.log("a");
        log.log("b");
        assert_eq!(log.drain().len(), 2);
        assert!(log.is_empty());
    }

    #[test]
    fn test_export_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs-scout-logs.txt");
        let log = RunLog::new(10);
        log.log("first");
        log.log("second");
        log.export(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.checkpoint().is_ok());
        other.cancel();
        assert!(matches!(token.checkpoint(), Err(AppError::Cancelled)));
    }

    #[test]
    fn test_second_run_rejected_until_first_ends() {
        let guard = RunGuard::new();
        let first = guard.try_acquire().unwrap();
        assert!(guard.is_active());
        assert!(matches!(guard.try_acquire(), Err(AppError::AlreadyRunning)));
        drop(first);
        assert!(!guard.is_active());
        assert!(guard.try_acquire().is_ok());
    }

    #[test]
    fn test_global_guard_is_shared_by_every_handle() {
        let one = RunGuard::global();
        let other = RunGuard::global();
        let run = one.try_acquire().unwrap();
        assert!(other.is_active());
        assert!(matches!(other.try_acquire(), Err(AppError::AlreadyRunning)));
        drop(run);
        assert!(!other.is_active());
    }
}

//! Append-only event log
//!
//! Metrics-only, line-delimited JSON on local disk: one self-contained
//! record per line. Appends go through a bounded in-memory queue drained by
//! a background writer so the pipeline never blocks on disk; when the queue
//! is full the record is dropped and counted. Two operations: append and
//! purge-all. No rotation.

use crate::error::CoachError;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Queue capacity between the pipeline and the writer thread
const QUEUE_CAPACITY: usize = 256;

/// Kinds of events recorded by the pipeline and policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Nudged,
    Suppressed,
    ActionDone,
    ActionSnooze,
    ActionDismiss,
    QueuedUnderDnd,
    ExpiredUnderDnd,
    DeliveredAfterDnd,
    StateEntered,
    StateExited,
}

/// One event log record. Never contains images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// ISO-8601 timestamp for humans
    pub timestamp: String,
    /// Unix seconds for machines
    pub ts: f64,
    pub event_kind: EventKind,
    pub state: String,
    pub reason: String,
    #[serde(default)]
    pub metadata: Value,
}

impl EventRecord {
    pub fn new(kind: EventKind, state: &str, reason: &str, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            timestamp: now.to_rfc3339(),
            ts: now.timestamp_millis() as f64 / 1000.0,
            event_kind: kind,
            state: state.to_string(),
            reason: reason.to_string(),
            metadata,
        }
    }
}

enum WriterMessage {
    Record(String),
    Shutdown,
}

/// Handle to the event log.
///
/// Cloneable; all clones feed the same writer thread. Dropping the last
/// handle leaves the thread to drain and exit via `close` or process end.
#[derive(Clone)]
pub struct EventLog {
    tx: Sender<WriterMessage>,
    dropped: Arc<AtomicU64>,
    path: PathBuf,
}

impl EventLog {
    /// Open the log at `path`, spawning the writer thread.
    pub fn open(path: impl Into<PathBuf>) -> (Self, EventLogWriter) {
        let path = path.into();
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));

        let writer_path = path.clone();
        let handle = std::thread::Builder::new()
            .name("event-log".into())
            .spawn(move || writer_loop(&writer_path, rx))
            .ok();

        (
            Self {
                tx,
                dropped,
                path,
            },
            EventLogWriter { handle },
        )
    }

    /// Queue a record for appending. Never blocks; a full queue increments
    /// the drop counter instead.
    pub fn append(&self, kind: EventKind, state: &str, reason: &str, metadata: Value) {
        let record = EventRecord::new(kind, state, reason, metadata);
        match serde_json::to_string(&record) {
            Ok(line) => {
                if let Err(TrySendError::Full(_)) = self.tx.try_send(WriterMessage::Record(line)) {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                log::warn!("event serialization failed: {err}");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records dropped due to a full queue or write failures
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ask the writer thread to drain and exit.
    pub fn close(&self) {
        let _ = self.tx.send(WriterMessage::Shutdown);
    }

    /// Last `limit` parsed records, skipping malformed lines.
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        read_recent(&self.path, limit)
    }

    /// Remove all recorded events atomically. Purging an absent or already
    /// empty log is a no-op.
    pub fn purge(&self) -> Result<(), CoachError> {
        purge(&self.path)
    }
}

/// Owns the writer thread; joining it guarantees queued records hit disk.
pub struct EventLogWriter {
    handle: Option<JoinHandle<()>>,
}

impl EventLogWriter {
    /// Wait for the writer to drain (after `EventLog::close`).
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn writer_loop(path: &Path, rx: Receiver<WriterMessage>) {
    let mut write_errors = 0_u64;
    while let Ok(message) = rx.recv() {
        match message {
            WriterMessage::Record(line) => {
                if let Err(err) = append_line(path, &line) {
                    write_errors += 1;
                    if write_errors == 1 {
                        log::warn!("event log write failed: {err}");
                    }
                } else {
                    write_errors = 0;
                }
            }
            WriterMessage::Shutdown => break,
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")
}

/// Read the last `limit` records from a log file.
pub fn read_recent(path: &Path, limit: usize) -> Vec<EventRecord> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return Vec::new(),
    };
    let records: Vec<EventRecord> = contents
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    let start = records.len().saturating_sub(limit);
    records[start..].to_vec()
}

/// Truncate the log file in place.
pub fn purge(path: &Path) -> Result<(), CoachError> {
    if path.exists() {
        fs::write(path, b"")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..100 {
            if predicate() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let (log, writer) = EventLog::open(&path);

        log.append(
            EventKind::Nudged,
            "slouch",
            "Slouch (majority): Neck 19.5° > 16.4°",
            json!({"threshold": 16.4}),
        );
        log.append(EventKind::StateEntered, "slouch", "", Value::Null);
        log.close();
        writer.join();

        let records = log.recent(10);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_kind, EventKind::Nudged);
        assert_eq!(records[0].state, "slouch");
        assert_eq!(records[0].metadata["threshold"], 16.4);
        assert_eq!(records[1].event_kind, EventKind::StateEntered);
    }

    #[test]
    fn test_recent_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let (log, writer) = EventLog::open(&path);
        log.append(EventKind::Suppressed, "slouch", "snooze", Value::Null);
        log.close();
        writer.join();

        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("this is not json\n");
        fs::write(&path, contents).unwrap();

        let records = read_recent(&path, 10);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_recent_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let (log, writer) = EventLog::open(&path);
        for i in 0..10 {
            log.append(EventKind::Nudged, "slouch", &format!("n{i}"), Value::Null);
        }
        log.close();
        writer.join();

        let records = log.recent(3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].reason, "n9");
    }

    #[test]
    fn test_purge_twice_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let (log, writer) = EventLog::open(&path);
        log.append(EventKind::Nudged, "slouch", "x", Value::Null);
        log.close();
        writer.join();
        wait_for(|| fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false));

        log.purge().unwrap();
        assert!(log.recent(10).is_empty());
        // Purge after purge leaves the log empty and succeeds
        log.purge().unwrap();
        assert!(log.recent(10).is_empty());
    }

    #[test]
    fn test_never_blocks_when_queue_full() {
        let dir = tempfile::tempdir().unwrap();
        // Unwritable path: the writer fails, but appends still return
        let path = dir.path().join("missing-dir").join("events.jsonl");
        let (log, _writer) = EventLog::open(&path);
        for i in 0..(QUEUE_CAPACITY * 4) {
            log.append(EventKind::Nudged, "slouch", &format!("n{i}"), Value::Null);
        }
        // Either queued or counted as dropped; the call never blocked
        assert!(log.dropped_count() <= (QUEUE_CAPACITY * 4) as u64);
        log.close();
    }
}

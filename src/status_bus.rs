//! Status bus: atomic snapshot files for the out-of-process UI
//!
//! Two publishers, one file each: the live status snapshot (~1 Hz) and the
//! calibration progress snapshot (~4 Hz). Both serialize the whole document
//! and write temp-then-rename so readers never observe a torn file. Publish
//! errors are swallowed with rate-limited logging; the producer never
//! aborts. Consumers treat a missing or stale file as "unknown".
//!
//! The bus also carries the one inbound message: user actions on a nudge
//! (Done / Snooze / Dismiss) land in an atomically written drop file that
//! the daemon consumes each tick and feeds to the policy.

use crate::baseline::Baseline;
use crate::error::CoachError;
use crate::pose_loop::PipelineSnapshot;
use crate::policy::PolicyStatus;
use crate::storage::atomic_write_json;
use crate::types::{DetectionPath, PostureState, UserAction};
use crate::window::WindowStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A live status snapshot older than this is stale
pub const STATUS_STALE_SEC: f64 = 3.0;
/// A calibration progress snapshot older than this is stale
pub const CALIBRATION_STALE_SEC: f64 = 1.0;

/// Smoothed metric values in the snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricsBlock {
    pub neck_deg: f64,
    pub torso_deg: f64,
    pub lateral: f64,
}

/// Effective absolute thresholds, including any dismiss-backoff
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdsBlock {
    pub neck_abs_deg: f64,
    pub torso_abs_deg: f64,
    pub lateral_abs: f64,
}

/// Per-channel window stats in the snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowStatsBlock {
    pub neck: WindowStats,
    pub torso: WindowStats,
    pub lateral: WindowStats,
}

/// The live status document (`status.json`), rewritten whole at <= 1 Hz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub ts_unix: f64,
    pub instance_id: String,
    pub state: PostureState,
    pub time_in_state_sec: f64,
    pub confidence: f64,
    pub fps: f64,
    pub target_fps: f64,
    pub degraded: bool,
    pub skip_active: bool,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub preset: String,
    pub metrics: Option<MetricsBlock>,
    pub thresholds: Option<ThresholdsBlock>,
    pub detection_path: Option<DetectionPath>,
    pub window_stats: Option<WindowStatsBlock>,
    pub entry_counts: HashMap<PostureState, u32>,
    pub policy: PolicyStatus,
}

/// Compose the status document from the pipeline snapshot and the policy
/// view. `backoff_extra` carries the per-channel dismiss-backoff additions
/// so the published thresholds are the effective ones.
pub fn build_status_snapshot(
    pipeline: &PipelineSnapshot,
    policy: &PolicyStatus,
    preset: &str,
    instance_id: &str,
    backoff_extra: (f64, f64, f64),
    now: f64,
) -> StatusSnapshot {
    StatusSnapshot {
        ts_unix: now,
        instance_id: instance_id.to_string(),
        state: pipeline.state,
        time_in_state_sec: (now - pipeline.state_entered_at).max(0.0),
        confidence: pipeline.confidence,
        fps: pipeline.actual_fps,
        target_fps: pipeline.target_fps,
        degraded: pipeline.degraded,
        skip_active: pipeline.skip_active,
        frames_processed: pipeline.frames_processed,
        frames_skipped: pipeline.frames_skipped,
        preset: preset.to_string(),
        metrics: pipeline.last_sample.map(|s| MetricsBlock {
            neck_deg: s.neck_deg,
            torso_deg: s.torso_deg,
            lateral: s.lateral,
        }),
        thresholds: pipeline.thresholds.map(|t| ThresholdsBlock {
            neck_abs_deg: t.neck_abs_deg + backoff_extra.0,
            torso_abs_deg: t.torso_abs_deg + backoff_extra.1,
            lateral_abs: t.lateral_abs + backoff_extra.2,
        }),
        detection_path: pipeline.detection_path,
        window_stats: pipeline.diagnostics.as_ref().map(|d| WindowStatsBlock {
            neck: d.neck.stats,
            torso: d.torso.stats,
            lateral: d.lateral.stats,
        }),
        entry_counts: pipeline.entry_counts.clone(),
        policy: policy.clone(),
    }
}

/// Rate-limited atomic publisher for a snapshot file.
///
/// I/O errors are logged once per ten-second window and otherwise ignored;
/// the next tick simply retries.
pub struct SnapshotPublisher {
    path: PathBuf,
    min_interval_sec: f64,
    last_publish: f64,
    last_error_log: f64,
}

impl SnapshotPublisher {
    pub fn new(path: impl Into<PathBuf>, min_interval_sec: f64) -> Self {
        Self {
            path: path.into(),
            min_interval_sec,
            last_publish: f64::NEG_INFINITY,
            last_error_log: f64::NEG_INFINITY,
        }
    }

    /// Publisher for `status.json` at 1 Hz
    pub fn live_status(path: impl Into<PathBuf>) -> Self {
        Self::new(path, 1.0)
    }

    /// Publisher for `calibration_status.json` at 4 Hz
    pub fn calibration(path: impl Into<PathBuf>) -> Self {
        Self::new(path, 0.25)
    }

    /// Write the snapshot if the rate limit allows (or `force`). Returns
    /// whether a write was attempted.
    pub fn publish<T: Serialize>(&mut self, snapshot: &T, now: f64, force: bool) -> bool {
        if !force && now - self.last_publish < self.min_interval_sec {
            return false;
        }
        self.last_publish = now;
        if let Err(err) = atomic_write_json(&self.path, snapshot) {
            if now - self.last_error_log > 10.0 {
                log::warn!("status publish to {} failed: {err}", self.path.display());
                self.last_error_log = now;
            }
        }
        true
    }

    /// Remove the snapshot file (end of calibration, daemon shutdown).
    pub fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Read the live status, returning `None` when the file is missing,
/// unparseable, or older than the staleness bound.
pub fn read_status(path: &Path, now: f64) -> Option<StatusSnapshot> {
    let contents = fs::read_to_string(path).ok()?;
    let snapshot: StatusSnapshot = serde_json::from_str(&contents).ok()?;
    if now - snapshot.ts_unix > STATUS_STALE_SEC {
        return None;
    }
    Some(snapshot)
}

/// Calibration phases as published to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    Preparing,
    Capturing,
    Aggregating,
    Saving,
    Done,
    Error,
}

/// The calibration progress document (`calibration_status.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationProgress {
    pub ts_unix: f64,
    pub phase: CalibrationPhase,
    /// Overall progress in `[0,1]`
    pub progress: f64,
    pub elapsed_sec: f64,
    pub samples_captured: u32,
    pub conf_mean: f64,
    pub eta_sec: Option<f64>,
    /// Present only in the `done` phase
    pub baseline: Option<Baseline>,
    /// Present only in the `error` phase
    pub error: Option<String>,
}

/// Read calibration progress. When `now` is provided, snapshots older than
/// the staleness bound read as `None`.
pub fn read_calibration_progress(path: &Path, now: Option<f64>) -> Option<CalibrationProgress> {
    let contents = fs::read_to_string(path).ok()?;
    let progress: CalibrationProgress = serde_json::from_str(&contents).ok()?;
    if let Some(now) = now {
        if now - progress.ts_unix > CALIBRATION_STALE_SEC {
            return None;
        }
    }
    Some(progress)
}

/// A user action on a delivered nudge, dropped by the UI or the CLI for
/// the daemon to pick up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserActionRequest {
    pub ts_unix: f64,
    pub action: UserAction,
}

/// Write a user action to the drop file atomically. A newer action
/// overwrites an unconsumed one, which matches how a user corrects a
/// mis-click.
pub fn write_user_action(path: &Path, action: UserAction, now: f64) -> Result<(), CoachError> {
    atomic_write_json(
        path,
        &UserActionRequest {
            ts_unix: now,
            action,
        },
    )
}

/// Consume the pending user action, if any. The file is removed either
/// way so a malformed drop cannot be re-read forever.
pub fn take_user_action(path: &Path) -> Option<UserActionRequest> {
    let contents = fs::read_to_string(path).ok()?;
    let _ = fs::remove_file(path);
    match serde_json::from_str(&contents) {
        Ok(request) => Some(request),
        Err(err) => {
            log::warn!("discarding malformed action file: {err}");
            None
        }
    }
}

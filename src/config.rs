//! Configuration: sensitivity presets, sustain policies, nudge policy, and
//! performance tuning
//!
//! A single JSON document (`config.json`) holds every tunable. Missing keys
//! fall back to defaults on load; numeric ranges are validated; writes are
//! atomic. State-machine and policy parameters are hot-readable; changes
//! take effect on the next tick or the next policy decision.

use crate::error::CoachError;
use crate::storage::atomic_write_json;
use crate::types::Channel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Sensitivity presets for posture detection.
///
/// Sensitive reacts fastest with the lowest deltas; Conservative trades
/// responsiveness for fewer false positives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityPreset {
    Sensitive,
    Standard,
    Conservative,
}

impl Default for SensitivityPreset {
    fn default() -> Self {
        SensitivityPreset::Sensitive
    }
}

impl SensitivityPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitivityPreset::Sensitive => "sensitive",
            SensitivityPreset::Standard => "standard",
            SensitivityPreset::Conservative => "conservative",
        }
    }
}

impl std::str::FromStr for SensitivityPreset {
    type Err = CoachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sensitive" => Ok(SensitivityPreset::Sensitive),
            "standard" => Ok(SensitivityPreset::Standard),
            "conservative" => Ok(SensitivityPreset::Conservative),
            other => Err(CoachError::InvalidConfig(format!(
                "unknown preset: {other}"
            ))),
        }
    }
}

/// Sustained-condition detection policy for one channel.
///
/// Detection fires on any of:
/// - Majority: `above_fraction >= majority_fraction` with no gap above the
///   gap budget
/// - Cumulative: total above-threshold time reaches `cumulative_min_sec`
/// - High severity: continuous time above the elevated threshold reaches
///   `high_severity_window_sec`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SustainPolicy {
    pub window_sec: f64,
    pub majority_fraction: f64,
    pub gap_budget_sec: f64,
    pub cumulative_min_sec: f64,
    /// Delta over baseline for the high-severity shortcut (degrees for
    /// neck/torso, centimeters for lateral)
    pub high_severity_delta: f64,
    pub high_severity_window_sec: f64,
}

impl SustainPolicy {
    pub fn validate(&self, channel: &str) -> Result<(), CoachError> {
        if !(0.5..=0.9).contains(&self.majority_fraction) {
            return Err(CoachError::InvalidConfig(format!(
                "{channel}: majority_fraction {} outside 0.5-0.9",
                self.majority_fraction
            )));
        }
        if self.gap_budget_sec >= self.window_sec {
            return Err(CoachError::InvalidConfig(format!(
                "{channel}: gap_budget_sec must be below window_sec"
            )));
        }
        if self.cumulative_min_sec > self.window_sec {
            return Err(CoachError::InvalidConfig(format!(
                "{channel}: cumulative_min_sec must not exceed window_sec"
            )));
        }
        Ok(())
    }
}

/// State machine thresholds and windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Degrees over the neck baseline before the slouch channel is "above"
    pub neck_delta_deg: f64,
    /// Degrees over the torso baseline for forward lean
    pub torso_delta_deg: f64,
    /// Centimeters of shoulder asymmetry for lateral lean (converted via
    /// the shoulder-width proxy)
    pub lateral_delta_cm: f64,

    pub neck_policy: SustainPolicy,
    pub torso_policy: SustainPolicy,
    pub lateral_policy: SustainPolicy,

    /// Recovery window before an issue state releases back to GOOD
    pub recovery_window_sec: f64,
    pub recovery_majority_fraction: f64,

    /// Baseline drift EMA applied while in GOOD. Disabled by default: at
    /// 6-8 Hz even a small alpha walks the baseline up under the user's own
    /// slouch within minutes.
    pub drift_alpha: f64,

    /// Below this confidence the state machine is forced to PAUSED
    pub confidence_threshold: f64,

    pub preset: SensitivityPreset,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self::from_preset(SensitivityPreset::Sensitive)
    }
}

impl StateConfig {
    pub fn from_preset(preset: SensitivityPreset) -> Self {
        let (neck_delta, lateral_cm, window, majority, gap, cumulative) = match preset {
            SensitivityPreset::Sensitive => (8.0, 3.0, 30.0, 0.60, 3.0, 18.0),
            SensitivityPreset::Standard => (10.0, 3.5, 35.0, 0.65, 3.0, 23.0),
            SensitivityPreset::Conservative => (12.0, 4.0, 40.0, 0.70, 2.0, 28.0),
        };
        let (lateral_cumulative, lateral_hs_cm, lateral_hs_window) = match preset {
            SensitivityPreset::Sensitive => (24.0, 6.0, 10.0),
            SensitivityPreset::Standard => (29.0, 7.0, 12.0),
            SensitivityPreset::Conservative => (35.0, 8.0, 15.0),
        };

        let angular_policy = SustainPolicy {
            window_sec: window,
            majority_fraction: majority,
            gap_budget_sec: gap,
            cumulative_min_sec: cumulative,
            high_severity_delta: 20.0,
            high_severity_window_sec: 8.0,
        };
        // Lateral drifts more slowly, so it gets a longer window and budget
        let lateral_policy = SustainPolicy {
            window_sec: window + 10.0,
            majority_fraction: majority,
            gap_budget_sec: gap,
            cumulative_min_sec: lateral_cumulative,
            high_severity_delta: lateral_hs_cm,
            high_severity_window_sec: lateral_hs_window,
        };

        Self {
            neck_delta_deg: neck_delta,
            torso_delta_deg: neck_delta,
            lateral_delta_cm: lateral_cm,
            neck_policy: angular_policy,
            torso_policy: angular_policy,
            lateral_policy,
            recovery_window_sec: 12.0,
            recovery_majority_fraction: 0.60,
            drift_alpha: 0.0,
            confidence_threshold: 0.5,
            preset,
        }
    }

    pub fn policy(&self, channel: Channel) -> &SustainPolicy {
        match channel {
            Channel::Neck => &self.neck_policy,
            Channel::Torso => &self.torso_policy,
            Channel::Lateral => &self.lateral_policy,
        }
    }

    /// Per-channel delta over baseline (degrees or centimeters)
    pub fn delta(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Neck => self.neck_delta_deg,
            Channel::Torso => self.torso_delta_deg,
            Channel::Lateral => self.lateral_delta_cm,
        }
    }

    pub fn validate(&self) -> Result<(), CoachError> {
        self.neck_policy.validate("neck")?;
        self.torso_policy.validate("torso")?;
        self.lateral_policy.validate("lateral")?;
        if !(0.5..=0.9).contains(&self.recovery_majority_fraction) {
            return Err(CoachError::InvalidConfig(format!(
                "recovery_majority_fraction {} outside 0.5-0.9",
                self.recovery_majority_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(CoachError::InvalidConfig(format!(
                "confidence_threshold {} outside 0-1",
                self.confidence_threshold
            )));
        }
        if !(0.0..=0.1).contains(&self.drift_alpha) {
            return Err(CoachError::InvalidConfig(format!(
                "drift_alpha {} outside 0-0.1",
                self.drift_alpha
            )));
        }
        Ok(())
    }
}

/// Notification policy cooldowns and queueing. All durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    /// Global cooldown after a Done action
    pub cooldown_done_sec: f64,
    /// Suppression window after a Snooze action
    pub cooldown_snooze_sec: f64,

    /// Threshold increases applied for the backoff duration after Dismiss
    pub dismiss_backoff_neck_deg: f64,
    pub dismiss_backoff_torso_deg: f64,
    pub dismiss_backoff_lateral_cm: f64,
    pub dismiss_backoff_duration_sec: f64,

    /// Per-state window in which the same issue is not re-nudged
    pub dedupe_window_sec: f64,
    pub high_severity_bypass_dedupe: bool,

    /// Queued nudges expire after this long under DND
    pub dnd_queue_expiry_sec: f64,
    pub respect_dnd: bool,

    /// A delivered notification blocks new ones until acted on or this old
    pub active_notification_timeout_sec: f64,
    pub allow_stacking: bool,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            cooldown_done_sec: 1800.0,
            cooldown_snooze_sec: 900.0,
            dismiss_backoff_neck_deg: 5.0,
            dismiss_backoff_torso_deg: 5.0,
            dismiss_backoff_lateral_cm: 1.0,
            dismiss_backoff_duration_sec: 3600.0,
            dedupe_window_sec: 1200.0,
            high_severity_bypass_dedupe: true,
            dnd_queue_expiry_sec: 2700.0,
            respect_dnd: true,
            active_notification_timeout_sec: 10.0,
            allow_stacking: false,
        }
    }
}

impl NudgeConfig {
    pub fn backoff_delta(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Neck => self.dismiss_backoff_neck_deg,
            Channel::Torso => self.dismiss_backoff_torso_deg,
            Channel::Lateral => self.dismiss_backoff_lateral_cm,
        }
    }

    pub fn validate(&self) -> Result<(), CoachError> {
        for (name, value) in [
            ("cooldown_done_sec", self.cooldown_done_sec),
            ("cooldown_snooze_sec", self.cooldown_snooze_sec),
            ("dedupe_window_sec", self.dedupe_window_sec),
            ("dnd_queue_expiry_sec", self.dnd_queue_expiry_sec),
            (
                "dismiss_backoff_duration_sec",
                self.dismiss_backoff_duration_sec,
            ),
        ] {
            if value < 0.0 {
                return Err(CoachError::InvalidConfig(format!("{name} must be >= 0")));
            }
        }
        Ok(())
    }
}

/// Performance mode for the pose loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerfMode {
    Lightweight,
    Quality,
    Performance,
}

/// Pose-loop performance tuning: pacing, resolution, governor, frame skip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub target_fps: f64,
    pub min_fps: f64,
    pub max_fps: f64,

    pub camera_width: u32,
    pub camera_height: u32,

    pub enable_frame_skip: bool,
    /// Skip only while confidence stays at or above this
    pub skip_confidence_threshold: f64,
    /// Skip only after GOOD has held this long
    pub skip_good_state_sec: f64,
    /// Process every Nth captured frame while skipping
    pub skip_ratio: u32,

    pub enable_governor: bool,
    /// Moving-average frame time above this drops the target FPS
    pub target_frame_time_ms: f64,
    /// Frames per governor evaluation
    pub governor_check_interval: u32,
    /// Sustained headroom required before raising FPS again
    pub governor_raise_delay_sec: f64,

    pub enable_profiling: bool,
    pub profile_interval_sec: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self::lightweight()
    }
}

impl PerformanceConfig {
    /// Lightweight preset (default): 6 FPS at 424x240, skip and governor on
    pub fn lightweight() -> Self {
        Self {
            target_fps: 6.0,
            min_fps: 4.0,
            max_fps: 8.0,
            camera_width: 424,
            camera_height: 240,
            enable_frame_skip: true,
            skip_confidence_threshold: 0.75,
            skip_good_state_sec: 20.0,
            skip_ratio: 2,
            enable_governor: true,
            target_frame_time_ms: 120.0,
            governor_check_interval: 30,
            governor_raise_delay_sec: 120.0,
            enable_profiling: false,
            profile_interval_sec: 30.0,
        }
    }

    /// Quality preset: 8 FPS at 640x480, skip and governor off
    pub fn quality() -> Self {
        Self {
            target_fps: 8.0,
            camera_width: 640,
            camera_height: 480,
            enable_frame_skip: false,
            enable_governor: false,
            ..Self::lightweight()
        }
    }

    /// Performance preset: 4 FPS at 320x240, minimum CPU
    pub fn performance() -> Self {
        Self {
            target_fps: 4.0,
            camera_width: 320,
            camera_height: 240,
            ..Self::lightweight()
        }
    }

    pub fn from_mode(mode: PerfMode) -> Self {
        match mode {
            PerfMode::Lightweight => Self::lightweight(),
            PerfMode::Quality => Self::quality(),
            PerfMode::Performance => Self::performance(),
        }
    }

    pub fn validate(&self) -> Result<(), CoachError> {
        if !(4.0..=15.0).contains(&self.target_fps) {
            return Err(CoachError::InvalidConfig(format!(
                "target_fps {} outside 4-15",
                self.target_fps
            )));
        }
        if self.min_fps > self.max_fps {
            return Err(CoachError::InvalidConfig(
                "min_fps must not exceed max_fps".to_string(),
            ));
        }
        if self.skip_ratio == 0 {
            return Err(CoachError::InvalidConfig(
                "skip_ratio must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The on-disk configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    pub camera_index: u32,
    /// EMA smoothing factor for metric channels
    pub ema_alpha: f64,
    /// Wall-clock bound for the raw metric rolling buffers
    pub buffer_window_sec: f64,
    pub state: StateConfig,
    pub nudge: NudgeConfig,
    pub performance: PerformanceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            camera_index: 0,
            ema_alpha: 0.3,
            buffer_window_sec: 60.0,
            state: StateConfig::default(),
            nudge: NudgeConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), CoachError> {
        if !(0.1..=0.5).contains(&self.ema_alpha) {
            return Err(CoachError::InvalidConfig(format!(
                "ema_alpha {} outside 0.1-0.5",
                self.ema_alpha
            )));
        }
        if !(30.0..=120.0).contains(&self.buffer_window_sec) {
            return Err(CoachError::InvalidConfig(format!(
                "buffer_window_sec {} outside 30-120",
                self.buffer_window_sec
            )));
        }
        self.state.validate()?;
        self.nudge.validate()?;
        self.performance.validate()
    }
}

/// Loads and saves the configuration document.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the configuration, falling back to defaults when the file is
    /// missing or unparseable. A parse failure is logged, never fatal.
    pub fn load(&self) -> Config {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(config) => match config.validate() {
                    Ok(()) => config,
                    Err(err) => {
                        log::warn!("config {} invalid ({err}); using defaults", self.path.display());
                        Config::default()
                    }
                },
                Err(err) => {
                    log::warn!(
                        "config {} unparseable ({err}); using defaults",
                        self.path.display()
                    );
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// Validate and persist the configuration atomically.
    pub fn save(&self, config: &Config) -> Result<(), CoachError> {
        config.validate()?;
        atomic_write_json(&self.path, config)
    }
}

//! Core types for the DeskCoach pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: landmark frames, metric samples, posture states, and the
//! transition events consumed by the notification policy.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Number of landmarks in a pose frame
pub const LANDMARK_COUNT: usize = 33;

/// Posture evaluation states. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureState {
    Good,
    Slouch,
    ForwardLean,
    LateralLean,
    Paused,
}

impl PostureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostureState::Good => "good",
            PostureState::Slouch => "slouch",
            PostureState::ForwardLean => "forward_lean",
            PostureState::LateralLean => "lateral_lean",
            PostureState::Paused => "paused",
        }
    }

    /// Whether this state represents a posture issue (as opposed to
    /// GOOD/PAUSED, which never produce nudges).
    pub fn is_issue(&self) -> bool {
        matches!(
            self,
            PostureState::Slouch | PostureState::ForwardLean | PostureState::LateralLean
        )
    }
}

/// Posture channels, one condition window each.
///
/// Ordering doubles as detection priority: Neck (slouch) outranks Torso
/// (forward lean) outranks Lateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Neck,
    Torso,
    Lateral,
}

impl Channel {
    /// All channels in detection-priority order
    pub const ALL: [Channel; 3] = [Channel::Neck, Channel::Torso, Channel::Lateral];

    /// The issue state this channel's sustained condition maps to
    pub fn issue_state(&self) -> PostureState {
        match self {
            Channel::Neck => PostureState::Slouch,
            Channel::Torso => PostureState::ForwardLean,
            Channel::Lateral => PostureState::LateralLean,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Neck => "neck",
            Channel::Torso => "torso",
            Channel::Lateral => "lateral",
        }
    }
}

/// A single pose landmark in normalized image coordinates.
///
/// `x` and `y` are in `[0,1]` with origin top-left; `visibility` is the
/// estimator's per-landmark confidence in `[0,1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub visibility: f32,
}

/// One landmark frame as produced by the pose estimator.
///
/// Discarded immediately after metric extraction; never persisted.
#[derive(Debug, Clone)]
pub struct LandmarkFrame {
    pub points: Vec<Landmark>,
}

impl LandmarkFrame {
    /// Build a frame, returning `None` unless exactly 33 points are present
    pub fn new(points: Vec<Landmark>) -> Option<Self> {
        if points.len() == LANDMARK_COUNT {
            Some(Self { points })
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }
}

/// One metric sample derived from a landmark frame.
///
/// Angles are degrees from the in-image vertical; `lateral` is the
/// shoulder-height asymmetry normalized by shoulder width; `conf` gates
/// evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Unix seconds (monotonic within a run)
    pub ts: f64,
    pub neck_deg: f64,
    pub torso_deg: f64,
    pub lateral: f64,
    pub conf: f64,
}

impl MetricSample {
    /// Value of a single channel
    pub fn channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Neck => self.neck_deg,
            Channel::Torso => self.torso_deg,
            Channel::Lateral => self.lateral,
        }
    }
}

/// Which sustained-detection path fired a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPath {
    Majority,
    Cumulative,
    HighSeverity,
}

impl DetectionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionPath::Majority => "majority",
            DetectionPath::Cumulative => "cumulative",
            DetectionPath::HighSeverity => "high_severity",
        }
    }
}

/// Metric values captured at the moment of a transition
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub neck_deg: f64,
    pub torso_deg: f64,
    pub lateral: f64,
    pub conf: f64,
}

impl From<&MetricSample> for MetricsSnapshot {
    fn from(sample: &MetricSample) -> Self {
        Self {
            neck_deg: sample.neck_deg,
            torso_deg: sample.torso_deg,
            lateral: sample.lateral,
            conf: sample.conf,
        }
    }
}

/// Event emitted by the state machine when the posture state changes.
///
/// Carries everything the policy and the event log need so that neither has
/// to reach back into the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Unix seconds at the transition
    pub ts: f64,
    pub from_state: PostureState,
    pub to_state: PostureState,
    /// Channel that triggered an issue entry; `None` for GOOD/PAUSED moves
    pub channel: Option<Channel>,
    /// Detection path for issue entries
    pub path: Option<DetectionPath>,
    /// Human-readable explanation with the numerical witnesses
    pub reason: String,
    pub time_in_previous_state: f64,
    /// Observed value of the triggering channel, if any
    pub observed: Option<f64>,
    /// Effective absolute threshold the observation was compared against
    pub threshold: Option<f64>,
    /// Whether the observation also cleared the high-severity threshold
    pub severe: bool,
    pub metrics: MetricsSnapshot,
}

/// User response to a delivered nudge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Done,
    Snooze,
    Dismiss,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::Done => "done",
            UserAction::Snooze => "snooze",
            UserAction::Dismiss => "dismiss",
        }
    }
}

/// Monotonic wall clock.
///
/// Reports Unix seconds but advances from a captured `Instant`, so the
/// timestamps fed to windows never go backwards even if the system clock is
/// adjusted mid-run.
#[derive(Debug, Clone)]
pub struct Clock {
    anchor_unix: f64,
    anchor_instant: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        let anchor_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            anchor_unix,
            anchor_instant: Instant::now(),
        }
    }

    /// Current time as Unix seconds
    pub fn now(&self) -> f64 {
        self.anchor_unix + self.anchor_instant.elapsed().as_secs_f64()
    }
}

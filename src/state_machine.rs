//! Posture state machine
//!
//! Converts noisy per-tick metric samples into sustained posture states.
//! Detection per channel runs three paths in priority order Slouch →
//! Forward lean → Lateral lean:
//! 1. Majority with grace gap: enough of the window above threshold and no
//!    single below-run exceeding the gap budget
//! 2. Cumulative time: total above-threshold time since the last transition
//!    reaching a floor (a below-run longer than the gap budget resets it)
//! 3. High-severity shortcut: continuous time above a much larger delta
//!
//! Recovery from an issue state requires a symmetric majority *below*
//! threshold across a dedicated recovery window. Low confidence or a
//! missing sample forces PAUSED. The machine never fails: malformed input
//! is just another PAUSED tick.

use crate::baseline::Baseline;
use crate::config::StateConfig;
use crate::types::{Channel, DetectionPath, MetricSample, MetricsSnapshot, PostureState, TransitionEvent};
use crate::window::{ConditionWindow, WindowStats};
use serde::Serialize;
use std::collections::HashMap;

/// Reference shoulder width used for the cm → normalized-ratio conversion
pub const TYPICAL_SHOULDER_WIDTH_CM: f64 = 40.0;

/// Floor for the lateral threshold when the calibrated asymmetry is tiny
const LATERAL_THRESHOLD_FLOOR: f64 = 0.05;

/// Convert a centimeter delta into an absolute lateral threshold via the
/// shoulder-width heuristic: `baseline + baseline * (delta_cm / 40) * 2`.
fn lateral_threshold(baseline_lateral: f64, delta_cm: f64) -> f64 {
    let ratio = delta_cm / TYPICAL_SHOULDER_WIDTH_CM;
    let threshold = baseline_lateral + baseline_lateral * ratio * 2.0;
    threshold.max(LATERAL_THRESHOLD_FLOOR)
}

/// Tracks total above-threshold time for the cumulative detection path.
///
/// Spans are attributed by the previous observation, matching the window's
/// duration weighting. A contiguous below-run longer than the gap budget
/// resets the total, so old evidence cannot trigger after a long recovery.
#[derive(Debug, Clone, Default)]
struct CumulativeTracker {
    total_above_sec: f64,
    current_gap_sec: f64,
    last: Option<(f64, bool)>,
}

impl CumulativeTracker {
    fn update(&mut self, ts: f64, above: bool, gap_budget_sec: f64) {
        if let Some((last_ts, last_above)) = self.last {
            let dt = (ts - last_ts).max(0.0);
            if last_above {
                self.total_above_sec += dt;
                self.current_gap_sec = 0.0;
            } else {
                self.current_gap_sec += dt;
                if self.current_gap_sec > gap_budget_sec {
                    self.total_above_sec = 0.0;
                }
            }
        }
        self.last = Some((ts, above));
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Absolute per-channel thresholds in effect
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EffectiveThresholds {
    pub neck_abs_deg: f64,
    pub torso_abs_deg: f64,
    pub lateral_abs: f64,
}

/// Per-channel window diagnostics for the status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ChannelDiagnostics {
    pub threshold: f64,
    pub baseline: f64,
    pub stats: WindowStats,
    pub cumulative_since_clear_sec: f64,
}

struct Detection {
    channel: Channel,
    path: DetectionPath,
    reason: String,
    observed: f64,
    threshold: f64,
    severe: bool,
}

/// State machine for posture monitoring.
///
/// Exclusively owns the condition windows, the current state, and the drift
/// baseline. Constructed with a calibrated baseline; without one the daemon
/// runs in PAUSED-until-calibrated mode and never builds a machine.
pub struct PostureStateMachine {
    config: StateConfig,
    state: PostureState,
    state_entered_at: f64,

    neck_window: ConditionWindow,
    torso_window: ConditionWindow,
    lateral_window: ConditionWindow,
    recovery_window: ConditionWindow,

    cumulative: [CumulativeTracker; 3],
    high_severity_since: [Option<f64>; 3],

    drift_neck: f64,
    drift_torso: f64,
    drift_lateral: f64,

    entry_counts: HashMap<PostureState, u32>,
    last_transition: Option<TransitionEvent>,
}

impl PostureStateMachine {
    pub fn new(baseline: &Baseline, config: StateConfig, now: f64) -> Self {
        let neck_window = ConditionWindow::new(config.neck_policy.window_sec);
        let torso_window = ConditionWindow::new(config.torso_policy.window_sec);
        let lateral_window = ConditionWindow::new(config.lateral_policy.window_sec);
        let recovery_window = ConditionWindow::new(config.recovery_window_sec);

        Self {
            drift_neck: baseline.neck_deg,
            drift_torso: baseline.torso_deg,
            drift_lateral: baseline.lateral,
            config,
            state: PostureState::Good,
            state_entered_at: now,
            neck_window,
            torso_window,
            lateral_window,
            recovery_window,
            cumulative: Default::default(),
            high_severity_since: [None; 3],
            entry_counts: HashMap::new(),
            last_transition: None,
        }
    }

    /// Replace the configuration; takes effect this tick. Windows are
    /// rebuilt because their sizes may have changed.
    pub fn set_config(&mut self, config: StateConfig) {
        self.neck_window = ConditionWindow::new(config.neck_policy.window_sec);
        self.torso_window = ConditionWindow::new(config.torso_policy.window_sec);
        self.lateral_window = ConditionWindow::new(config.lateral_policy.window_sec);
        self.recovery_window = ConditionWindow::new(config.recovery_window_sec);
        for tracker in &mut self.cumulative {
            tracker.reset();
        }
        self.high_severity_since = [None; 3];
        self.config = config;
    }

    pub fn state(&self) -> PostureState {
        self.state
    }

    pub fn time_in_state(&self, now: f64) -> f64 {
        (now - self.state_entered_at).max(0.0)
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn last_transition(&self) -> Option<&TransitionEvent> {
        self.last_transition.as_ref()
    }

    /// Number of entries into each state since construction
    pub fn entry_counts(&self) -> &HashMap<PostureState, u32> {
        &self.entry_counts
    }

    /// Runtime drift baselines (equal to the calibrated baseline unless
    /// drift is enabled)
    pub fn drift_baselines(&self) -> (f64, f64, f64) {
        (self.drift_neck, self.drift_torso, self.drift_lateral)
    }

    /// Absolute detection threshold for a channel
    pub fn threshold(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Neck => self.drift_neck + self.config.neck_delta_deg,
            Channel::Torso => self.drift_torso + self.config.torso_delta_deg,
            Channel::Lateral => lateral_threshold(self.drift_lateral, self.config.lateral_delta_cm),
        }
    }

    /// Absolute high-severity threshold for a channel
    pub fn high_severity_threshold(&self, channel: Channel) -> f64 {
        let delta = self.config.policy(channel).high_severity_delta;
        match channel {
            Channel::Neck => self.drift_neck + delta,
            Channel::Torso => self.drift_torso + delta,
            Channel::Lateral => lateral_threshold(self.drift_lateral, delta),
        }
    }

    pub fn effective_thresholds(&self) -> EffectiveThresholds {
        EffectiveThresholds {
            neck_abs_deg: self.threshold(Channel::Neck),
            torso_abs_deg: self.threshold(Channel::Torso),
            lateral_abs: self.threshold(Channel::Lateral),
        }
    }

    /// Per-channel window diagnostics at `now`
    pub fn diagnostics(&self, now: f64) -> HashMap<Channel, ChannelDiagnostics> {
        let mut out = HashMap::new();
        for channel in Channel::ALL {
            let window = self.window(channel);
            out.insert(
                channel,
                ChannelDiagnostics {
                    threshold: self.threshold(channel),
                    baseline: match channel {
                        Channel::Neck => self.drift_neck,
                        Channel::Torso => self.drift_torso,
                        Channel::Lateral => self.drift_lateral,
                    },
                    stats: window.stats(now),
                    cumulative_since_clear_sec: self.cumulative[channel_index(channel)]
                        .total_above_sec,
                },
            );
        }
        out
    }

    /// Advance the machine one tick.
    ///
    /// `sample` is the smoothed metric sample for this tick, or `None` when
    /// no usable pose was available. Returns a transition event when the
    /// state changed.
    pub fn update(&mut self, sample: Option<&MetricSample>, now: f64) -> Option<TransitionEvent> {
        let sample = match sample {
            Some(s) if s.conf >= self.config.confidence_threshold => s,
            other => {
                // Keep feeding the windows so gap accounting stays
                // truthful: absence of a pose is never evidence of an
                // issue.
                self.feed_windows(now, None);
                if self.state != PostureState::Paused {
                    let reason = if other.is_some() {
                        "Low confidence".to_string()
                    } else {
                        "No pose detected".to_string()
                    };
                    return self.transition_to(
                        PostureState::Paused,
                        reason,
                        None,
                        None,
                        other,
                        now,
                    );
                }
                return None;
            }
        };

        if self.state == PostureState::Paused {
            // Windows were cleared when PAUSED was entered and need
            // repopulation time, so an issue cannot fire on this tick.
            return self.transition_to(
                PostureState::Good,
                "Confidence recovered".to_string(),
                None,
                None,
                Some(sample),
                now,
            );
        }

        self.feed_windows(now, Some(sample));
        self.update_high_severity_timers(sample, now);

        let detection = Channel::ALL
            .iter()
            .find_map(|&channel| self.check_channel(channel, sample, now));

        let event = match detection {
            Some(detection) => self.handle_issue_target(detection, sample, now),
            None => self.handle_good_target(sample, now),
        };

        if self.state == PostureState::Good && self.config.drift_alpha > 0.0 {
            self.apply_drift(sample);
        }

        event
    }

    fn window(&self, channel: Channel) -> &ConditionWindow {
        match channel {
            Channel::Neck => &self.neck_window,
            Channel::Torso => &self.torso_window,
            Channel::Lateral => &self.lateral_window,
        }
    }

    fn feed_windows(&mut self, now: f64, sample: Option<&MetricSample>) {
        for channel in Channel::ALL {
            let above = match sample {
                Some(s) => s.channel(channel) > self.threshold(channel),
                None => false,
            };
            let gap_budget = self.config.policy(channel).gap_budget_sec;
            match channel {
                Channel::Neck => self.neck_window.push(now, above),
                Channel::Torso => self.torso_window.push(now, above),
                Channel::Lateral => self.lateral_window.push(now, above),
            }
            self.cumulative[channel_index(channel)].update(now, above, gap_budget);
        }

        // While in an issue state, the recovery window tracks whether the
        // offending channel is still above its threshold.
        if self.state.is_issue() {
            if let Some(channel) = issue_channel(self.state) {
                let above = match sample {
                    Some(s) => s.channel(channel) > self.threshold(channel),
                    None => false,
                };
                self.recovery_window.push(now, above);
            }
        }
    }

    fn update_high_severity_timers(&mut self, sample: &MetricSample, now: f64) {
        for channel in Channel::ALL {
            let index = channel_index(channel);
            if sample.channel(channel) > self.high_severity_threshold(channel) {
                self.high_severity_since[index].get_or_insert(now);
            } else {
                self.high_severity_since[index] = None;
            }
        }
    }

    fn check_channel(&self, channel: Channel, sample: &MetricSample, now: f64) -> Option<Detection> {
        let policy = self.config.policy(channel);
        let threshold = self.threshold(channel);
        let observed = sample.channel(channel);
        let high_severity_threshold = self.high_severity_threshold(channel);
        let severe = observed > high_severity_threshold;

        // Path 3 first: it is the only one that can cut ahead of the
        // window math.
        if let Some(since) = self.high_severity_since[channel_index(channel)] {
            if now - since >= policy.high_severity_window_sec {
                return Some(Detection {
                    channel,
                    path: DetectionPath::HighSeverity,
                    reason: format!(
                        "High-severity {}: {} for {:.0}s",
                        channel_label(channel),
                        exceedance(channel, observed, high_severity_threshold),
                        policy.high_severity_window_sec
                    ),
                    observed,
                    threshold,
                    severe,
                });
            }
        }

        let stats = self.window(channel).stats(now);

        let majority_met = stats.above_fraction >= policy.majority_fraction
            && stats.max_gap_sec <= policy.gap_budget_sec;
        let cumulative_sec = self.cumulative[channel_index(channel)].total_above_sec;
        let cumulative_met = cumulative_sec >= policy.cumulative_min_sec;

        if majority_met || cumulative_met {
            let path = if majority_met {
                DetectionPath::Majority
            } else {
                DetectionPath::Cumulative
            };
            return Some(Detection {
                channel,
                path,
                reason: format!(
                    "{} ({}): {} ({:.0}% of {:.0}s, {:.0}s total)",
                    issue_label(channel),
                    path.as_str(),
                    exceedance(channel, observed, threshold),
                    stats.above_fraction * 100.0,
                    policy.window_sec,
                    cumulative_sec
                ),
                observed,
                threshold,
                severe,
            });
        }

        None
    }

    fn handle_issue_target(
        &mut self,
        detection: Detection,
        sample: &MetricSample,
        now: f64,
    ) -> Option<TransitionEvent> {
        let target = detection.channel.issue_state();

        if self.state == target {
            // Condition re-confirmed; recovery starts over.
            self.recovery_window.clear();
            return None;
        }

        // GOOD -> issue and issue -> other issue both transition directly.
        let mut event = self.transition_to(
            target,
            detection.reason,
            Some(detection.channel),
            Some(detection.path),
            Some(sample),
            now,
        )?;
        event.observed = Some(detection.observed);
        event.threshold = Some(detection.threshold);
        event.severe = detection.severe;
        self.last_transition = Some(event.clone());
        Some(event)
    }

    fn handle_good_target(&mut self, sample: &MetricSample, now: f64) -> Option<TransitionEvent> {
        if !self.state.is_issue() {
            return None;
        }

        // Recovery requires a full window of evidence with a symmetric
        // majority below threshold.
        if self.recovery_window.span(now) < self.config.recovery_window_sec {
            return None;
        }
        let stats = self.recovery_window.stats(now);
        let release_below = 1.0 - self.config.recovery_majority_fraction;
        if stats.above_fraction < release_below {
            let reason = format!(
                "Recovery: below threshold for {:.0}s ({:.0}% below)",
                self.config.recovery_window_sec,
                (1.0 - stats.above_fraction) * 100.0
            );
            return self.transition_to(PostureState::Good, reason, None, None, Some(sample), now);
        }
        None
    }

    fn transition_to(
        &mut self,
        new_state: PostureState,
        reason: String,
        channel: Option<Channel>,
        path: Option<DetectionPath>,
        sample: Option<&MetricSample>,
        now: f64,
    ) -> Option<TransitionEvent> {
        if new_state == self.state {
            return None;
        }

        let event = TransitionEvent {
            ts: now,
            from_state: self.state,
            to_state: new_state,
            channel,
            path,
            reason,
            time_in_previous_state: self.time_in_state(now),
            observed: None,
            threshold: None,
            severe: false,
            metrics: sample.map(MetricsSnapshot::from).unwrap_or_default(),
        };

        self.state = new_state;
        self.state_entered_at = now;
        *self.entry_counts.entry(new_state).or_insert(0) += 1;

        // No condition may immediately re-fire after a transition.
        self.neck_window.clear();
        self.torso_window.clear();
        self.lateral_window.clear();
        self.recovery_window.clear();
        for tracker in &mut self.cumulative {
            tracker.reset();
        }
        self.high_severity_since = [None; 3];

        self.last_transition = Some(event.clone());
        Some(event)
    }

    fn apply_drift(&mut self, sample: &MetricSample) {
        let alpha = self.config.drift_alpha;
        self.drift_neck = alpha * sample.neck_deg + (1.0 - alpha) * self.drift_neck;
        self.drift_torso = alpha * sample.torso_deg + (1.0 - alpha) * self.drift_torso;
        self.drift_lateral = alpha * sample.lateral + (1.0 - alpha) * self.drift_lateral;
    }
}

fn channel_index(channel: Channel) -> usize {
    match channel {
        Channel::Neck => 0,
        Channel::Torso => 1,
        Channel::Lateral => 2,
    }
}

fn issue_channel(state: PostureState) -> Option<Channel> {
    match state {
        PostureState::Slouch => Some(Channel::Neck),
        PostureState::ForwardLean => Some(Channel::Torso),
        PostureState::LateralLean => Some(Channel::Lateral),
        _ => None,
    }
}

fn channel_label(channel: Channel) -> &'static str {
    match channel {
        Channel::Neck => "slouch",
        Channel::Torso => "forward lean",
        Channel::Lateral => "lateral lean",
    }
}

fn issue_label(channel: Channel) -> &'static str {
    match channel {
        Channel::Neck => "Slouch",
        Channel::Torso => "Forward lean",
        Channel::Lateral => "Lateral lean",
    }
}

/// `Neck 19.5° > 16.4°` or `Lateral 0.081 > 0.056`
fn exceedance(channel: Channel, observed: f64, threshold: f64) -> String {
    match channel {
        Channel::Neck => format!("Neck {observed:.1}° > {threshold:.1}°"),
        Channel::Torso => format!("Torso {observed:.1}° > {threshold:.1}°"),
        Channel::Lateral => format!("Lateral {observed:.3} > {threshold:.3}"),
    }
}

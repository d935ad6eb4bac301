//! Notification policy
//!
//! Consumes issue-entry transitions from the state machine and decides when
//! to nudge. Five gates apply in order (global cooldown, snooze, the
//! active-notification lock, per-state dedupe, the dismiss-backoff
//! threshold) and the first failing gate records a `suppressed` event
//! naming itself. Nudges that pass the gates while DND is active are queued
//! (one per state) and serviced periodically; queued nudges expire rather
//! than surprise the user an hour later.
//!
//! The policy observes the state machine but the state machine never sees
//! the policy: data flows one way, pipeline → policy → side effect + log.

use crate::config::NudgeConfig;
use crate::event_log::{EventKind, EventLog};
use crate::notify::{DndProbe, NotificationSink};
use crate::state_machine::TYPICAL_SHOULDER_WIDTH_CM;
use crate::types::{Channel, PostureState, TransitionEvent, UserAction};
use serde_json::json;
use std::collections::HashMap;

/// Action labels offered on every nudge, in the order the OS shows them
pub const ACTION_LABELS: [&str; 3] = ["Done", "Snooze", "Dismiss"];

/// Read-only view of the policy timers for the status snapshot
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PolicyStatus {
    pub cooldown_sec_left: f64,
    pub snooze_sec_left: f64,
    pub backoff_sec_left: f64,
    pub dnd_queue_depth: usize,
    pub last_nudge_age_sec: Option<f64>,
}

/// A nudge held back because DND was active
#[derive(Debug, Clone)]
struct QueuedNudge {
    event: TransitionEvent,
    enqueued_at: f64,
    expires_at: f64,
}

/// Notification policy engine.
///
/// Exclusively owns its cooldown, queue, and dedupe state; wholly
/// in-memory and reset at startup.
pub struct NotificationPolicy {
    config: NudgeConfig,
    /// Calibrated lateral baseline, needed to convert the lateral backoff
    /// delta from centimeters into the normalized scale
    baseline_lateral: f64,
    sink: Box<dyn NotificationSink>,
    dnd: Box<dyn DndProbe>,
    log: EventLog,
    /// When false, the cooldown, snooze, and dedupe gates are bypassed
    /// (diagnostic runs)
    cooldowns_enabled: bool,

    cooldown_until: Option<f64>,
    snooze_until: Option<f64>,
    backoff_until: Option<f64>,
    per_state_last_nudge: HashMap<PostureState, f64>,
    active_notification_at: Option<f64>,
    last_nudge_at: Option<f64>,
    last_nudge_state: Option<PostureState>,
    queue: Vec<QueuedNudge>,
}

impl NotificationPolicy {
    pub fn new(
        config: NudgeConfig,
        baseline_lateral: f64,
        sink: Box<dyn NotificationSink>,
        dnd: Box<dyn DndProbe>,
        log: EventLog,
        cooldowns_enabled: bool,
    ) -> Self {
        Self {
            config,
            baseline_lateral,
            sink,
            dnd,
            log,
            cooldowns_enabled,
            cooldown_until: None,
            snooze_until: None,
            backoff_until: None,
            per_state_last_nudge: HashMap::new(),
            active_notification_at: None,
            last_nudge_at: None,
            last_nudge_state: None,
            queue: Vec::new(),
        }
    }

    /// Hot-reload the nudge configuration; applies to the next decision.
    pub fn set_config(&mut self, config: NudgeConfig) {
        self.config = config;
    }

    /// Handle a state transition. Only issue entries are candidates.
    pub fn on_transition(&mut self, event: &TransitionEvent, now: f64) {
        if !event.to_state.is_issue() {
            return;
        }

        if let Err(gate) = self.check_gates(event, now) {
            self.log.append(
                EventKind::Suppressed,
                event.to_state.as_str(),
                &gate,
                json!({ "transition_reason": event.reason }),
            );
            return;
        }

        if self.config.respect_dnd && self.dnd.is_dnd_active() {
            self.enqueue(event, now);
            return;
        }

        self.deliver(event, now, None);
    }

    /// Service the DND queue. Called at >= 1 Hz by the daemon.
    pub fn service_queue(&mut self, now: f64) {
        if self.queue.is_empty() {
            return;
        }

        let dnd_active = self.config.respect_dnd && self.dnd.is_dnd_active();
        let pending = std::mem::take(&mut self.queue);

        for entry in pending {
            if now >= entry.expires_at {
                self.log.append(
                    EventKind::ExpiredUnderDnd,
                    entry.event.to_state.as_str(),
                    &entry.event.reason,
                    json!({ "queued_duration_sec": now - entry.enqueued_at }),
                );
                continue;
            }
            if dnd_active {
                self.queue.push(entry);
                continue;
            }
            // DND ended: re-check the gates against the current state
            // before delivering.
            match self.check_gates(&entry.event, now) {
                Ok(()) => {
                    self.deliver(&entry.event, now, Some(now - entry.enqueued_at));
                }
                Err(gate) => {
                    self.log.append(
                        EventKind::Suppressed,
                        entry.event.to_state.as_str(),
                        &gate,
                        json!({ "transition_reason": entry.event.reason, "was_queued": true }),
                    );
                }
            }
        }
    }

    /// Apply a user action from a delivered notification.
    pub fn on_user_action(&mut self, action: UserAction, now: f64) {
        let state = self
            .last_nudge_state
            .map(|s| s.as_str())
            .unwrap_or("unknown");

        match action {
            UserAction::Done => {
                self.cooldown_until = Some(now + self.config.cooldown_done_sec);
                self.log.append(
                    EventKind::ActionDone,
                    state,
                    "User clicked done",
                    json!({ "cooldown_until": self.cooldown_until }),
                );
            }
            UserAction::Snooze => {
                self.snooze_until = Some(now + self.config.cooldown_snooze_sec);
                self.log.append(
                    EventKind::ActionSnooze,
                    state,
                    "User clicked snooze",
                    json!({ "snooze_until": self.snooze_until }),
                );
            }
            UserAction::Dismiss => {
                self.backoff_until = Some(now + self.config.dismiss_backoff_duration_sec);
                self.log.append(
                    EventKind::ActionDismiss,
                    state,
                    "User clicked dismiss",
                    json!({
                        "backoff_until": self.backoff_until,
                        "backoff_neck_deg": self.config.dismiss_backoff_neck_deg,
                        "backoff_torso_deg": self.config.dismiss_backoff_torso_deg,
                        "backoff_lateral_cm": self.config.dismiss_backoff_lateral_cm,
                    }),
                );
            }
        }

        // The user acknowledged the notification: the dedupe stamps exist
        // to avoid re-nudging an unacknowledged issue, so they reset here.
        self.per_state_last_nudge.clear();
        self.active_notification_at = None;
    }

    /// Remaining timers and queue depth for the status snapshot
    pub fn status(&self, now: f64) -> PolicyStatus {
        let remaining = |until: Option<f64>| until.map(|t| (t - now).max(0.0)).unwrap_or(0.0);
        PolicyStatus {
            cooldown_sec_left: remaining(self.cooldown_until),
            snooze_sec_left: remaining(self.snooze_until),
            backoff_sec_left: remaining(self.backoff_until),
            dnd_queue_depth: self.queue.len(),
            last_nudge_age_sec: self.last_nudge_at.map(|t| (now - t).max(0.0)),
        }
    }

    /// Extra threshold currently added to a channel by dismiss-backoff, in
    /// the channel's own units (degrees, or normalized ratio for lateral)
    pub fn backoff_extra(&self, channel: Channel, now: f64) -> f64 {
        match self.backoff_until {
            Some(until) if now < until => match channel {
                Channel::Neck => self.config.dismiss_backoff_neck_deg,
                Channel::Torso => self.config.dismiss_backoff_torso_deg,
                Channel::Lateral => {
                    let ratio = self.config.dismiss_backoff_lateral_cm / TYPICAL_SHOULDER_WIDTH_CM;
                    self.baseline_lateral * ratio * 2.0
                }
            },
            _ => 0.0,
        }
    }

    fn check_gates(&mut self, event: &TransitionEvent, now: f64) -> Result<(), String> {
        // 1. Global cooldown (Done)
        if self.cooldowns_enabled {
            if let Some(until) = self.cooldown_until {
                if now < until {
                    return Err(format!(
                        "global_cooldown ({:.1}m remaining)",
                        (until - now) / 60.0
                    ));
                }
            }

            // 2. Snooze
            if let Some(until) = self.snooze_until {
                if now < until {
                    return Err(format!("snooze ({:.1}m remaining)", (until - now) / 60.0));
                }
            }
        }

        // 3. Active-notification lock, auto-cleared past the timeout
        if let Some(at) = self.active_notification_at {
            if now - at > self.config.active_notification_timeout_sec {
                self.active_notification_at = None;
            }
        }
        if !self.config.allow_stacking && self.active_notification_at.is_some() {
            return Err("active_notification_exists".to_string());
        }

        // 4. Per-state dedupe, bypassable for high-severity observations
        if self.cooldowns_enabled {
            if let Some(&last) = self.per_state_last_nudge.get(&event.to_state) {
                let elapsed = now - last;
                if elapsed < self.config.dedupe_window_sec {
                    let bypass = event.severe && self.config.high_severity_bypass_dedupe;
                    if !bypass {
                        return Err(format!(
                            "dedupe_window ({:.1}m remaining for {})",
                            (self.config.dedupe_window_sec - elapsed) / 60.0,
                            event.to_state.as_str()
                        ));
                    }
                }
            }
        }

        // 5. Dismiss-backoff: the observed metric must clear the elevated
        // threshold.
        if let (Some(channel), Some(observed), Some(threshold)) =
            (event.channel, event.observed, event.threshold)
        {
            let extra = self.backoff_extra(channel, now);
            if extra > 0.0 && observed < threshold + extra {
                return Err("below_backoff_threshold".to_string());
            }
        }

        Ok(())
    }

    fn enqueue(&mut self, event: &TransitionEvent, now: f64) {
        let expires_at = now + self.config.dnd_queue_expiry_sec;
        // One queued item per state; a new arrival overwrites and
        // refreshes expiry.
        self.queue.retain(|q| q.event.to_state != event.to_state);
        self.queue.push(QueuedNudge {
            event: event.clone(),
            enqueued_at: now,
            expires_at,
        });
        self.log.append(
            EventKind::QueuedUnderDnd,
            event.to_state.as_str(),
            &event.reason,
            json!({ "expires_at": expires_at }),
        );
    }

    fn deliver(&mut self, event: &TransitionEvent, now: f64, queued_duration: Option<f64>) {
        let title = notification_title(event.to_state);
        let message = match queued_duration {
            Some(duration) => format!("{} (queued {:.1}m ago)", event.reason, duration / 60.0),
            None => event.reason.clone(),
        };

        let delivery_error = match self.sink.notify(title, &message, &ACTION_LABELS) {
            Ok(()) => None,
            Err(err) => {
                log::warn!("notification delivery failed: {err}");
                Some(err.to_string())
            }
        };

        // Cooldowns and dedupe apply even when delivery failed; there is
        // no retry.
        self.per_state_last_nudge.insert(event.to_state, now);
        self.active_notification_at = Some(now);
        self.last_nudge_at = Some(now);
        self.last_nudge_state = Some(event.to_state);

        let kind = if queued_duration.is_some() {
            EventKind::DeliveredAfterDnd
        } else {
            EventKind::Nudged
        };
        let metadata = json!({
            "observed": event.observed,
            "threshold": event.threshold,
            "path": event.path,
            "queued_duration_sec": queued_duration,
            "delivery_error": delivery_error,
        });
        self.log
            .append(kind, event.to_state.as_str(), &event.reason, metadata);
    }
}

fn notification_title(state: PostureState) -> &'static str {
    match state {
        PostureState::Slouch => "Posture Check: Slouching",
        PostureState::ForwardLean => "Posture Check: Leaning Forward",
        PostureState::LateralLean => "Posture Check: Leaning Sideways",
        _ => "Posture Check",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoachError;
    use crate::event_log::EventRecord;
    use crate::types::{DetectionPath, MetricsSnapshot};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    struct RecordingSink {
        posted: Arc<Mutex<Vec<(String, String)>>>,
        fail: bool,
    }

    impl NotificationSink for RecordingSink {
        fn notify(
            &mut self,
            title: &str,
            message: &str,
            actions: &[&str],
        ) -> Result<(), CoachError> {
            assert_eq!(actions, ACTION_LABELS);
            if self.fail {
                return Err(CoachError::NotificationError("sink offline".to_string()));
            }
            self.posted
                .lock()
                .unwrap()
                .push((title.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct FlagProbe(Arc<AtomicBool>);

    impl DndProbe for FlagProbe {
        fn is_dnd_active(&mut self) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    struct Harness {
        policy: NotificationPolicy,
        posted: Arc<Mutex<Vec<(String, String)>>>,
        dnd: Arc<AtomicBool>,
        log: EventLog,
        writer: Option<crate::event_log::EventLogWriter>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(false, true)
        }

        fn with(fail_sink: bool, cooldowns: bool) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let (log, writer) = EventLog::open(dir.path().join("events.jsonl"));
            let posted = Arc::new(Mutex::new(Vec::new()));
            let dnd = Arc::new(AtomicBool::new(false));
            let policy = NotificationPolicy::new(
                NudgeConfig::default(),
                0.031,
                Box::new(RecordingSink {
                    posted: Arc::clone(&posted),
                    fail: fail_sink,
                }),
                Box::new(FlagProbe(Arc::clone(&dnd))),
                log.clone(),
                cooldowns,
            );
            Self {
                policy,
                posted,
                dnd,
                log,
                writer: Some(writer),
                _dir: dir,
            }
        }

        fn records(&mut self) -> Vec<EventRecord> {
            self.log.close();
            if let Some(writer) = self.writer.take() {
                writer.join();
            }
            self.log.recent(1000)
        }

        fn posted_count(&self) -> usize {
            self.posted.lock().unwrap().len()
        }
    }

    fn slouch_event(ts: f64, observed: f64, threshold: f64) -> TransitionEvent {
        TransitionEvent {
            ts,
            from_state: PostureState::Good,
            to_state: PostureState::Slouch,
            channel: Some(Channel::Neck),
            path: Some(DetectionPath::Majority),
            reason: format!("Slouch (majority): Neck {observed:.1}° > {threshold:.1}°"),
            time_in_previous_state: 60.0,
            observed: Some(observed),
            threshold: Some(threshold),
            severe: false,
            metrics: MetricsSnapshot {
                neck_deg: observed,
                torso_deg: 1.0,
                lateral: 0.02,
                conf: 0.8,
            },
        }
    }

    fn forward_event(ts: f64) -> TransitionEvent {
        TransitionEvent {
            to_state: PostureState::ForwardLean,
            channel: Some(Channel::Torso),
            ..slouch_event(ts, 15.0, 10.0)
        }
    }

    #[test]
    fn test_first_transition_nudges() {
        let mut h = Harness::new();
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);

        assert_eq!(h.posted_count(), 1);
        let records = h.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_kind, EventKind::Nudged);
        assert_eq!(records[0].state, "slouch");
    }

    #[test]
    fn test_good_and_paused_never_nudge() {
        let mut h = Harness::new();
        let mut event = slouch_event(0.0, 19.5, 16.4);
        event.to_state = PostureState::Good;
        h.policy.on_transition(&event, 0.0);
        let mut event = slouch_event(0.0, 19.5, 16.4);
        event.to_state = PostureState::Paused;
        h.policy.on_transition(&event, 0.0);

        assert_eq!(h.posted_count(), 0);
        assert!(h.records().is_empty());
    }

    #[test]
    fn test_done_sets_global_cooldown() {
        let mut h = Harness::new();
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        h.policy.on_user_action(UserAction::Done, 10.0);

        // Inside [T, T+1800): suppressed
        h.policy.on_transition(&slouch_event(500.0, 19.5, 16.4), 500.0);
        assert_eq!(h.posted_count(), 1);

        // After the cooldown: nudged again
        h.policy
            .on_transition(&slouch_event(1811.0, 19.5, 16.4), 1811.0);
        assert_eq!(h.posted_count(), 2);

        let records = h.records();
        let suppressed: Vec<_> = records
            .iter()
            .filter(|r| r.event_kind == EventKind::Suppressed)
            .collect();
        assert_eq!(suppressed.len(), 1);
        assert!(suppressed[0].reason.starts_with("global_cooldown"));
    }

    #[test]
    fn test_snooze_suppresses_then_releases() {
        let mut h = Harness::new();
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        h.policy.on_user_action(UserAction::Snooze, 5.0);

        // 5 minutes in: snoozed until t=905, ~10 minutes remain
        h.policy.on_transition(&slouch_event(300.0, 19.5, 16.4), 300.0);
        assert_eq!(h.posted_count(), 1);

        // Just past the snooze window: nudged
        h.policy.on_transition(&slouch_event(910.0, 19.5, 16.4), 910.0);
        assert_eq!(h.posted_count(), 2);

        let records = h.records();
        let suppressed: Vec<_> = records
            .iter()
            .filter(|r| r.event_kind == EventKind::Suppressed)
            .collect();
        assert_eq!(suppressed.len(), 1);
        assert!(suppressed[0].reason.starts_with("snooze ("));
        assert!(suppressed[0].reason.contains("m remaining"));
    }

    #[test]
    fn test_active_notification_lock_and_timeout() {
        let mut h = Harness::new();
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);

        // 5 s later a different issue fires; the first notification is
        // still considered active.
        h.policy.on_transition(&forward_event(5.0), 5.0);
        assert_eq!(h.posted_count(), 1);

        // Past the 10 s timeout the lock auto-clears.
        h.policy.on_transition(&forward_event(15.0), 15.0);
        assert_eq!(h.posted_count(), 2);

        let records = h.records();
        let suppressed: Vec<_> = records
            .iter()
            .filter(|r| r.event_kind == EventKind::Suppressed)
            .collect();
        assert_eq!(suppressed.len(), 1);
        assert_eq!(suppressed[0].reason, "active_notification_exists");
    }

    #[test]
    fn test_per_state_dedupe_window() {
        let mut h = Harness::new();
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);

        // Same state 100 s later (lock already expired): dedupe suppresses
        h.policy.on_transition(&slouch_event(100.0, 19.5, 16.4), 100.0);
        assert_eq!(h.posted_count(), 1);

        // After the dedupe window (1200 s): nudged
        h.policy
            .on_transition(&slouch_event(1300.0, 19.5, 16.4), 1300.0);
        assert_eq!(h.posted_count(), 2);

        let records = h.records();
        let suppressed: Vec<_> = records
            .iter()
            .filter(|r| r.event_kind == EventKind::Suppressed)
            .collect();
        assert_eq!(suppressed.len(), 1);
        assert!(suppressed[0].reason.starts_with("dedupe_window"));
        assert!(suppressed[0].reason.contains("slouch"));
    }

    #[test]
    fn test_high_severity_bypasses_dedupe() {
        let mut h = Harness::new();
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        // Non-severe repeat inside the dedupe window is suppressed
        h.policy.on_transition(&slouch_event(100.0, 30.0, 16.4), 100.0);
        assert_eq!(h.posted_count(), 1);

        let mut severe = slouch_event(200.0, 30.0, 16.4);
        severe.severe = true;
        severe.path = Some(DetectionPath::HighSeverity);
        h.policy.on_transition(&severe, 200.0);
        assert_eq!(h.posted_count(), 2);
    }

    #[test]
    fn test_dismiss_backoff_raises_threshold() {
        let mut h = Harness::new();
        // Nudge, then dismiss at t=0: +5 degrees for an hour
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        h.policy.on_user_action(UserAction::Dismiss, 0.0);

        // Effective threshold is now 21.4; 20.0 does not clear it
        h.policy.on_transition(&slouch_event(300.0, 20.0, 16.4), 300.0);
        assert_eq!(h.posted_count(), 1);

        // 22.0 clears the elevated threshold
        h.policy.on_transition(&slouch_event(600.0, 22.0, 16.4), 600.0);
        assert_eq!(h.posted_count(), 2);

        let records = h.records();
        let suppressed: Vec<_> = records
            .iter()
            .filter(|r| r.event_kind == EventKind::Suppressed)
            .collect();
        assert_eq!(suppressed.len(), 1);
        assert_eq!(suppressed[0].reason, "below_backoff_threshold");
    }

    #[test]
    fn test_backoff_expires() {
        let mut h = Harness::new();
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        h.policy.on_user_action(UserAction::Dismiss, 0.0);

        // Past the 3600 s backoff the base threshold applies again
        h.policy
            .on_transition(&slouch_event(3700.0, 20.0, 16.4), 3700.0);
        assert_eq!(h.posted_count(), 2);
    }

    #[test]
    fn test_dnd_queue_delivery() {
        let mut h = Harness::new();
        h.dnd.store(true, Ordering::Relaxed);

        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        assert_eq!(h.posted_count(), 0);
        assert_eq!(h.policy.status(0.0).dnd_queue_depth, 1);

        // DND ends; the next queue service delivers
        h.dnd.store(false, Ordering::Relaxed);
        h.policy.service_queue(600.0);
        assert_eq!(h.posted_count(), 1);
        assert_eq!(h.policy.status(600.0).dnd_queue_depth, 0);

        let records = h.records();
        assert_eq!(records[0].event_kind, EventKind::QueuedUnderDnd);
        let delivered = records
            .iter()
            .find(|r| r.event_kind == EventKind::DeliveredAfterDnd)
            .expect("delivered event");
        let queued = delivered.metadata["queued_duration_sec"].as_f64().unwrap();
        assert!((queued - 600.0).abs() < 1.0);
    }

    #[test]
    fn test_dnd_queue_expiry() {
        let mut h = Harness::new();
        h.dnd.store(true, Ordering::Relaxed);
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);

        // DND stays on past the 2700 s expiry
        h.policy.service_queue(2750.0);
        assert_eq!(h.posted_count(), 0);
        assert_eq!(h.policy.status(2750.0).dnd_queue_depth, 0);

        let records = h.records();
        assert!(records
            .iter()
            .any(|r| r.event_kind == EventKind::ExpiredUnderDnd));
        assert!(!records
            .iter()
            .any(|r| r.event_kind == EventKind::DeliveredAfterDnd));
    }

    #[test]
    fn test_one_queued_item_per_state() {
        let mut h = Harness::new();
        h.dnd.store(true, Ordering::Relaxed);

        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        h.policy.on_transition(&slouch_event(100.0, 21.0, 16.4), 100.0);
        assert_eq!(h.policy.status(100.0).dnd_queue_depth, 1);

        // The replacement refreshed expiry: still alive at 2750
        h.policy.service_queue(2750.0);
        assert_eq!(h.policy.status(2750.0).dnd_queue_depth, 1);
    }

    #[test]
    fn test_delivery_failure_still_applies_cooldowns() {
        let mut h = Harness::with(true, true);
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        assert_eq!(h.posted_count(), 0);

        // Dedupe still applies: no second nudged record inside the window
        h.policy.on_transition(&slouch_event(60.0, 19.5, 16.4), 60.0);

        let records = h.records();
        let nudged: Vec<_> = records
            .iter()
            .filter(|r| r.event_kind == EventKind::Nudged)
            .collect();
        assert_eq!(nudged.len(), 1);
        assert!(!nudged[0].metadata["delivery_error"].is_null());
    }

    #[test]
    fn test_cooldowns_disabled_mode() {
        let mut h = Harness::with(false, false);
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        h.policy.on_user_action(UserAction::Done, 1.0);
        // Cooldown and dedupe are bypassed; only the active-notification
        // lock could suppress, and the action cleared it.
        h.policy.on_transition(&slouch_event(20.0, 19.5, 16.4), 20.0);
        assert_eq!(h.posted_count(), 2);
    }

    #[test]
    fn test_status_view_reports_timers() {
        let mut h = Harness::new();
        h.policy.on_transition(&slouch_event(0.0, 19.5, 16.4), 0.0);
        h.policy.on_user_action(UserAction::Done, 0.0);
        h.policy.on_user_action(UserAction::Snooze, 0.0);

        let status = h.policy.status(600.0);
        assert!((status.cooldown_sec_left - 1200.0).abs() < 0.001);
        assert!((status.snooze_sec_left - 300.0).abs() < 0.001);
        assert_eq!(status.backoff_sec_left, 0.0);
        assert!((status.last_nudge_age_sec.unwrap() - 600.0).abs() < 0.001);
    }
}

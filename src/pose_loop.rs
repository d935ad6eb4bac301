//! Pose loop: camera pacing, adaptive governor, frame skip, dispatch
//!
//! The loop owns the camera session and the estimator handle and drives the
//! whole pipeline as a timed step function: capture → estimate → extract →
//! smooth → state machine → transition dispatch. Transition events leave
//! through a channel; everything the out-of-process UI needs is mirrored
//! into a shared snapshot under a short lock.
//!
//! Frames exist only inside `step`; no pixel ever outlives the tick that
//! captured it.

use crate::camera::FrameSource;
use crate::config::{Config, PerformanceConfig};
use crate::estimator::LandmarkEstimator;
use crate::metrics::{MetricExtractor, MetricSmoother, RollingBuffer};
use crate::state_machine::{ChannelDiagnostics, EffectiveThresholds, PostureStateMachine};
use crate::types::{
    Channel, Clock, DetectionPath, MetricSample, PostureState, TransitionEvent,
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Camera retry backoff bounds
const RETRY_BACKOFF_MIN_MS: u64 = 100;
const RETRY_BACKOFF_MAX_MS: u64 = 2000;
/// Consecutive failures before the loop marks itself degraded
const DEGRADED_AFTER_FAILURES: u32 = 5;

/// Per-channel diagnostics mirrored into the shared snapshot
#[derive(Debug, Clone)]
pub struct PipelineDiagnostics {
    pub neck: ChannelDiagnostics,
    pub torso: ChannelDiagnostics,
    pub lateral: ChannelDiagnostics,
}

/// Everything the status publisher needs, refreshed after every tick.
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    pub ts: f64,
    pub state: PostureState,
    pub state_entered_at: f64,
    pub confidence: f64,
    pub last_sample: Option<MetricSample>,
    pub thresholds: Option<EffectiveThresholds>,
    pub detection_path: Option<DetectionPath>,
    pub diagnostics: Option<PipelineDiagnostics>,
    pub entry_counts: HashMap<PostureState, u32>,
    pub target_fps: f64,
    pub actual_fps: f64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub skip_active: bool,
    pub degraded: bool,
    pub avg_frame_time_ms: f64,
}

impl PipelineSnapshot {
    fn initial(now: f64, target_fps: f64) -> Self {
        Self {
            ts: now,
            state: PostureState::Paused,
            state_entered_at: now,
            confidence: 0.0,
            last_sample: None,
            thresholds: None,
            detection_path: None,
            diagnostics: None,
            entry_counts: HashMap::new(),
            target_fps,
            actual_fps: 0.0,
            frames_processed: 0,
            frames_skipped: 0,
            skip_active: false,
            degraded: false,
            avg_frame_time_ms: 0.0,
        }
    }
}

/// The pose-loop pipeline, driven one `step` per frame period.
pub struct PoseLoop {
    perf: PerformanceConfig,
    extractor: MetricExtractor,
    smoother: MetricSmoother,
    neck_buffer: RollingBuffer,
    torso_buffer: RollingBuffer,
    lateral_buffer: RollingBuffer,
    source: Box<dyn FrameSource>,
    estimator: Box<dyn LandmarkEstimator>,
    machine: Option<PostureStateMachine>,
    transitions: Sender<TransitionEvent>,
    config_updates: Option<Receiver<crate::config::StateConfig>>,
    shared: Arc<RwLock<PipelineSnapshot>>,

    target_fps: f64,
    frame_times_ms: Vec<f64>,
    governor_last_change: f64,
    avg_frame_time_ms: f64,
    min_frame_time_ms: f64,
    max_frame_time_ms: f64,

    consecutive_failures: u32,
    retry_backoff_ms: u64,
    backoff_until: f64,
    degraded: bool,

    skip_counter: u32,
    good_since: Option<f64>,
    skip_active: bool,
    last_conf: f64,

    frames_processed: u64,
    frames_skipped: u64,
    started_at: f64,
    last_profile_at: f64,
}

impl PoseLoop {
    pub fn new(
        config: &Config,
        source: Box<dyn FrameSource>,
        estimator: Box<dyn LandmarkEstimator>,
        machine: Option<PostureStateMachine>,
        transitions: Sender<TransitionEvent>,
        now: f64,
    ) -> Self {
        let perf = config.performance.clone();
        let target_fps = perf.target_fps;
        let shared = Arc::new(RwLock::new(PipelineSnapshot::initial(now, target_fps)));
        Self {
            extractor: MetricExtractor::default(),
            smoother: MetricSmoother::new(config.ema_alpha),
            neck_buffer: RollingBuffer::new(config.buffer_window_sec),
            torso_buffer: RollingBuffer::new(config.buffer_window_sec),
            lateral_buffer: RollingBuffer::new(config.buffer_window_sec),
            source,
            estimator,
            machine,
            transitions,
            config_updates: None,
            shared,
            target_fps,
            frame_times_ms: Vec::new(),
            governor_last_change: now,
            avg_frame_time_ms: 0.0,
            min_frame_time_ms: f64::INFINITY,
            max_frame_time_ms: 0.0,
            consecutive_failures: 0,
            retry_backoff_ms: RETRY_BACKOFF_MIN_MS,
            backoff_until: 0.0,
            degraded: false,
            skip_counter: 0,
            good_since: None,
            skip_active: false,
            last_conf: 0.0,
            frames_processed: 0,
            frames_skipped: 0,
            started_at: now,
            last_profile_at: now,
            perf,
        }
    }

    /// Shared snapshot handle for the status publisher.
    pub fn snapshot_handle(&self) -> Arc<RwLock<PipelineSnapshot>> {
        Arc::clone(&self.shared)
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Attach a channel delivering hot-reloaded state configurations;
    /// drained at the start of every tick.
    pub fn watch_config(&mut self, updates: Receiver<crate::config::StateConfig>) {
        self.config_updates = Some(updates);
    }

    /// Process one frame period.
    pub fn step(&mut self, now: f64) -> Option<TransitionEvent> {
        if let Some(updates) = &self.config_updates {
            let latest = updates.try_iter().last();
            if let (Some(config), Some(machine)) = (latest, &mut self.machine) {
                log::info!("state configuration reloaded");
                machine.set_config(config);
            }
        }

        if now < self.backoff_until {
            return self.tick_machine(None, now);
        }

        let frame = match self.source.read() {
            Ok(frame) => {
                if self.degraded {
                    log::info!("camera recovered after {} failures", self.consecutive_failures);
                }
                self.consecutive_failures = 0;
                self.retry_backoff_ms = RETRY_BACKOFF_MIN_MS;
                self.degraded = false;
                frame
            }
            Err(err) => {
                self.consecutive_failures += 1;
                self.backoff_until = now + self.retry_backoff_ms as f64 / 1000.0;
                self.retry_backoff_ms = (self.retry_backoff_ms * 2).min(RETRY_BACKOFF_MAX_MS);
                if self.consecutive_failures == DEGRADED_AFTER_FAILURES {
                    self.degraded = true;
                    log::warn!("camera degraded after {DEGRADED_AFTER_FAILURES} consecutive failures: {err}");
                }
                return self.tick_machine(None, now);
            }
        };

        if self.should_skip(now) {
            self.frames_skipped += 1;
            // The skipped period is covered by the next processed sample's
            // span; no synthetic window entries are inserted.
            self.publish_shared(now);
            return None;
        }

        let sample = self
            .estimator
            .estimate(&frame)
            .and_then(|landmarks| self.extractor.extract(&landmarks, now));
        drop(frame);

        let smoothed = sample.map(|raw| {
            let smoothed = self.smoother.update(&raw);
            self.neck_buffer.push(now, smoothed.neck_deg);
            self.torso_buffer.push(now, smoothed.torso_deg);
            self.lateral_buffer.push(now, smoothed.lateral);
            smoothed
        });

        self.frames_processed += 1;
        self.last_conf = smoothed.map(|s| s.conf).unwrap_or(0.0);

        let event = self.tick_machine(smoothed.as_ref(), now);
        self.track_skip_eligibility(now, event.is_some());
        self.publish_shared(now);
        event
    }

    fn tick_machine(
        &mut self,
        sample: Option<&MetricSample>,
        now: f64,
    ) -> Option<TransitionEvent> {
        let event = match &mut self.machine {
            Some(machine) => machine.update(sample, now),
            None => None,
        };
        if let Some(event) = &event {
            // Any transition disables frame skip immediately.
            self.good_since = None;
            self.skip_active = false;
            if self.transitions.send(event.clone()).is_err() {
                log::warn!("transition receiver gone; event dropped");
            }
        }
        if sample.is_none() {
            self.publish_shared(now);
        }
        event
    }

    fn state(&self) -> PostureState {
        self.machine
            .as_ref()
            .map(|m| m.state())
            .unwrap_or(PostureState::Paused)
    }

    /// Frame-skip policy: only in sustained confident GOOD, every other
    /// frame (or per `skip_ratio`).
    fn should_skip(&mut self, now: f64) -> bool {
        if !self.perf.enable_frame_skip || self.frames_processed == 0 {
            return false;
        }
        if self.last_conf < self.perf.skip_confidence_threshold
            || self.state() != PostureState::Good
        {
            self.good_since = None;
            self.skip_active = false;
            return false;
        }
        let since = *self.good_since.get_or_insert(now);
        if now - since < self.perf.skip_good_state_sec {
            self.skip_active = false;
            return false;
        }

        self.skip_active = true;
        self.skip_counter = self.skip_counter.wrapping_add(1);
        self.skip_counter % self.perf.skip_ratio != 0
    }

    fn track_skip_eligibility(&mut self, now: f64, transitioned: bool) {
        if transitioned
            || self.state() != PostureState::Good
            || self.last_conf < self.perf.skip_confidence_threshold
        {
            self.good_since = None;
            self.skip_active = false;
        } else {
            self.good_since.get_or_insert(now);
        }
    }

    /// Feed one measured frame time into the adaptive governor.
    pub fn record_frame_time(&mut self, frame_time_ms: f64, now: f64) {
        self.avg_frame_time_ms = if self.avg_frame_time_ms == 0.0 {
            frame_time_ms
        } else {
            0.1 * frame_time_ms + 0.9 * self.avg_frame_time_ms
        };
        self.min_frame_time_ms = self.min_frame_time_ms.min(frame_time_ms);
        self.max_frame_time_ms = self.max_frame_time_ms.max(frame_time_ms);

        if !self.perf.enable_governor {
            return;
        }
        self.frame_times_ms.push(frame_time_ms);
        if (self.frame_times_ms.len() as u32) < self.perf.governor_check_interval {
            return;
        }
        let avg: f64 =
            self.frame_times_ms.iter().sum::<f64>() / self.frame_times_ms.len() as f64;
        self.frame_times_ms.clear();

        if avg > self.perf.target_frame_time_ms {
            if self.target_fps > self.perf.min_fps {
                self.target_fps -= 1.0;
                self.governor_last_change = now;
                log::info!(
                    "governor: frame time {avg:.1}ms over budget, dropping to {:.0} FPS",
                    self.target_fps
                );
            }
        } else if avg < self.perf.target_frame_time_ms * 0.7
            && now - self.governor_last_change >= self.perf.governor_raise_delay_sec
            && self.target_fps < self.perf.max_fps
        {
            self.target_fps += 1.0;
            self.governor_last_change = now;
            log::info!(
                "governor: frame time {avg:.1}ms under budget, raising to {:.0} FPS",
                self.target_fps
            );
        }
    }

    fn publish_shared(&self, now: f64) {
        let elapsed = (now - self.started_at).max(f64::EPSILON);
        let mut snapshot = PipelineSnapshot {
            ts: now,
            state: self.state(),
            state_entered_at: now,
            confidence: self.last_conf,
            last_sample: None,
            thresholds: None,
            detection_path: None,
            diagnostics: None,
            entry_counts: HashMap::new(),
            target_fps: self.target_fps,
            actual_fps: self.frames_processed as f64 / elapsed,
            frames_processed: self.frames_processed,
            frames_skipped: self.frames_skipped,
            skip_active: self.skip_active,
            degraded: self.degraded,
            avg_frame_time_ms: self.avg_frame_time_ms,
        };

        snapshot.last_sample = match (
            self.neck_buffer.latest(),
            self.torso_buffer.latest(),
            self.lateral_buffer.latest(),
        ) {
            (Some(neck), Some(torso), Some(lateral)) => Some(MetricSample {
                ts: now,
                neck_deg: neck,
                torso_deg: torso,
                lateral,
                conf: self.last_conf,
            }),
            _ => None,
        };

        if let Some(machine) = &self.machine {
            snapshot.state_entered_at = now - machine.time_in_state(now);
            snapshot.thresholds = Some(machine.effective_thresholds());
            snapshot.detection_path = machine
                .last_transition()
                .filter(|t| t.to_state == machine.state())
                .and_then(|t| t.path);
            let mut diag = machine.diagnostics(now);
            snapshot.diagnostics = match (
                diag.remove(&Channel::Neck),
                diag.remove(&Channel::Torso),
                diag.remove(&Channel::Lateral),
            ) {
                (Some(neck), Some(torso), Some(lateral)) => Some(PipelineDiagnostics {
                    neck,
                    torso,
                    lateral,
                }),
                _ => None,
            };
            snapshot.entry_counts = machine.entry_counts().clone();
        }

        *self.shared.write() = snapshot;
    }

    fn profile_tick(&mut self, now: f64) {
        if !self.perf.enable_profiling
            || now - self.last_profile_at < self.perf.profile_interval_sec
        {
            return;
        }
        self.last_profile_at = now;
        let elapsed = (now - self.started_at).max(f64::EPSILON);
        let actual_fps = self.frames_processed as f64 / elapsed;
        let effective_fps = if self.skip_active {
            self.target_fps / self.perf.skip_ratio as f64
        } else {
            self.target_fps
        };
        let cpu_estimate = self.avg_frame_time_ms / 1000.0 * self.target_fps * 100.0;
        let min_ms = if self.min_frame_time_ms.is_finite() {
            self.min_frame_time_ms
        } else {
            0.0
        };
        log::info!(
            "perf: fps={actual_fps:.1} (effective={effective_fps:.1}), frame_ms min/avg/max={min_ms:.1}/{:.1}/{:.1}, cpu_est={cpu_estimate:.1}%, skip={}, degraded={}",
            self.avg_frame_time_ms,
            self.max_frame_time_ms,
            self.skip_active,
            self.degraded
        );
    }

    /// Run until the shutdown flag is set. Worst-case cancellation latency
    /// is one frame period; the camera is released on exit.
    pub fn run(mut self, shutdown: Arc<AtomicBool>, clock: Clock) {
        log::info!("pose loop started (target {:.0} FPS)", self.target_fps);
        while !shutdown.load(Ordering::Relaxed) {
            let tick_start = Instant::now();
            let now = clock.now();

            self.step(now);

            let frame_time_ms = tick_start.elapsed().as_secs_f64() * 1000.0;
            self.record_frame_time(frame_time_ms, now);
            self.profile_tick(now);

            let frame_interval = 1.0 / self.target_fps;
            let sleep_sec = (frame_interval - tick_start.elapsed().as_secs_f64()).max(0.0);
            if sleep_sec > 0.0 {
                std::thread::sleep(Duration::from_secs_f64(sleep_sec));
            }
        }
        // Dropping the source releases the camera.
        log::info!("pose loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::Baseline;
    use crate::camera::{CameraFrame, EndlessBlankSource, ScriptedSource};
    use crate::config::{Config, SensitivityPreset, StateConfig};
    use crate::error::CoachError;
    use crate::estimator::ScriptedEstimator;
    use crate::metrics::{
        LEFT_EAR, LEFT_HIP, LEFT_SHOULDER, RIGHT_EAR, RIGHT_HIP, RIGHT_SHOULDER,
    };
    use crate::types::{Landmark, LandmarkFrame, LANDMARK_COUNT};
    use crossbeam_channel::unbounded;

    const DT: f64 = 0.125;

    fn make_baseline() -> Baseline {
        Baseline {
            version: 1,
            neck_deg: 0.0,
            torso_deg: 0.0,
            lateral: 0.02,
            shoulder_width_proxy: 0.2,
            calibrated_at: "2025-06-01T10:30:00+00:00".to_string(),
            sample_count: 150,
            conf_mean: 0.9,
        }
    }

    /// A frame whose neck angle is controlled by the ear x-offset.
    fn pose_frame(ear_dx: f32, visibility: f32) -> LandmarkFrame {
        let mut points = vec![
            Landmark {
                x: 0.5,
                y: 0.5,
                visibility: 0.0
            };
            LANDMARK_COUNT
        ];
        let mut set = |index: usize, x: f32, y: f32| {
            points[index] = Landmark { x, y, visibility };
        };
        set(LEFT_EAR, 0.45 + ear_dx, 0.20);
        set(RIGHT_EAR, 0.55 + ear_dx, 0.20);
        set(LEFT_SHOULDER, 0.40, 0.40);
        set(RIGHT_SHOULDER, 0.60, 0.40);
        set(LEFT_HIP, 0.42, 0.70);
        set(RIGHT_HIP, 0.58, 0.70);
        LandmarkFrame::new(points).unwrap()
    }

    fn make_loop(
        script: Vec<Option<LandmarkFrame>>,
        config: Config,
    ) -> (PoseLoop, crossbeam_channel::Receiver<TransitionEvent>) {
        let (tx, rx) = unbounded();
        let machine = PostureStateMachine::new(
            &make_baseline(),
            StateConfig::from_preset(SensitivityPreset::Sensitive),
            0.0,
        );
        let pose_loop = PoseLoop::new(
            &config,
            Box::new(EndlessBlankSource),
            Box::new(ScriptedEstimator::new(script)),
            Some(machine),
            tx,
            0.0,
        );
        (pose_loop, rx)
    }

    fn no_skip_config() -> Config {
        let mut config = Config::default();
        config.performance.enable_frame_skip = false;
        config.performance.enable_governor = false;
        config
    }

    #[test]
    fn test_sustained_bad_posture_emits_transition() {
        // Upright baseline, then a strongly tilted neck for 30 s.
        let script: Vec<_> = (0..240).map(|_| Some(pose_frame(0.15, 0.9))).collect();
        let (mut pose_loop, rx) = make_loop(script, no_skip_config());

        for i in 0..240 {
            pose_loop.step(i as f64 * DT);
        }

        let event = rx.try_recv().expect("transition should be dispatched");
        assert_eq!(event.to_state, PostureState::Slouch);

        let snapshot = pose_loop.snapshot_handle().read().clone();
        assert_eq!(snapshot.state, PostureState::Slouch);
        assert!(snapshot.thresholds.is_some());
    }

    #[test]
    fn test_no_pose_yields_paused() {
        let script: Vec<Option<LandmarkFrame>> = (0..16).map(|_| None).collect();
        let (mut pose_loop, rx) = make_loop(script, no_skip_config());

        for i in 0..16 {
            pose_loop.step(i as f64 * DT);
        }

        let event = rx.try_recv().expect("pause transition");
        assert_eq!(event.to_state, PostureState::Paused);
        assert_eq!(
            pose_loop.snapshot_handle().read().state,
            PostureState::Paused
        );
    }

    #[test]
    fn test_camera_failures_degrade_then_recover() {
        let mut results: Vec<Result<CameraFrame, CoachError>> = Vec::new();
        for _ in 0..8 {
            results.push(Err(CoachError::CameraRead("transient".to_string())));
        }
        for _ in 0..8 {
            results.push(Ok(CameraFrame {
                width: 4,
                height: 4,
                data: vec![0; 48],
            }));
        }

        let (tx, _rx) = unbounded();
        let mut pose_loop = PoseLoop::new(
            &no_skip_config(),
            Box::new(ScriptedSource::new(results)),
            Box::new(ScriptedEstimator::new(
                (0..8).map(|_| Some(pose_frame(0.0, 0.9))),
            )),
            Some(PostureStateMachine::new(
                &make_baseline(),
                StateConfig::from_preset(SensitivityPreset::Sensitive),
                0.0,
            )),
            tx,
            0.0,
        );

        // Read attempts respect the exponential backoff schedule, so space
        // the ticks well apart.
        let mut now = 0.0;
        for _ in 0..8 {
            pose_loop.step(now);
            now += 3.0;
        }
        assert!(pose_loop.is_degraded());
        assert_eq!(
            pose_loop.snapshot_handle().read().state,
            PostureState::Paused
        );

        // First successful read clears the degradation.
        pose_loop.step(now);
        assert!(!pose_loop.is_degraded());
    }

    #[test]
    fn test_frame_skip_engages_in_sustained_good() {
        let mut config = Config::default();
        config.performance.enable_governor = false;
        config.performance.enable_frame_skip = true;
        // Upright, confident frames well past the 20 s threshold
        let script: Vec<_> = (0..400).map(|_| Some(pose_frame(0.0, 0.9))).collect();
        let (mut pose_loop, _rx) = make_loop(script, config);

        for i in 0..400 {
            pose_loop.step(i as f64 * DT);
        }

        let snapshot = pose_loop.snapshot_handle().read().clone();
        assert!(snapshot.skip_active);
        assert!(snapshot.frames_skipped > 0);
        // Roughly every other frame processed once skipping engaged
        assert!(snapshot.frames_processed < 400);
    }

    #[test]
    fn test_frame_skip_stays_off_below_confidence() {
        let mut config = Config::default();
        config.performance.enable_governor = false;
        // Visibility 0.6: confident enough to evaluate, below the 0.75
        // skip threshold
        let script: Vec<_> = (0..400).map(|_| Some(pose_frame(0.0, 0.6))).collect();
        let (mut pose_loop, _rx) = make_loop(script, config);

        for i in 0..400 {
            pose_loop.step(i as f64 * DT);
        }

        let snapshot = pose_loop.snapshot_handle().read().clone();
        assert!(!snapshot.skip_active);
        assert_eq!(snapshot.frames_skipped, 0);
    }

    #[test]
    fn test_governor_drops_and_raises_fps() {
        let (mut pose_loop, _rx) = make_loop(Vec::new(), Config::default());
        assert_eq!(pose_loop.target_fps(), 6.0);

        // 30 slow frames: drop to 5
        for i in 0..30 {
            pose_loop.record_frame_time(150.0, i as f64 * DT);
        }
        assert_eq!(pose_loop.target_fps(), 5.0);

        // Continued overload walks down to the floor of 4
        for i in 0..60 {
            pose_loop.record_frame_time(200.0, 4.0 + i as f64 * DT);
        }
        assert_eq!(pose_loop.target_fps(), 4.0);
        for i in 0..30 {
            pose_loop.record_frame_time(200.0, 12.0 + i as f64 * DT);
        }
        assert_eq!(pose_loop.target_fps(), 4.0);

        // Fast frames raise only after the 120 s delay
        for i in 0..30 {
            pose_loop.record_frame_time(40.0, 20.0 + i as f64);
        }
        assert_eq!(pose_loop.target_fps(), 4.0);
        for i in 0..30 {
            pose_loop.record_frame_time(40.0, 140.0 + i as f64);
        }
        assert_eq!(pose_loop.target_fps(), 5.0);
    }

    #[test]
    fn test_frame_time_bounds_track_min_and_max() {
        let (mut pose_loop, _rx) = make_loop(Vec::new(), no_skip_config());
        assert!(pose_loop.min_frame_time_ms.is_infinite());

        for (i, ms) in [45.0, 32.0, 118.0, 60.0].iter().enumerate() {
            pose_loop.record_frame_time(*ms, i as f64 * DT);
        }

        assert!((pose_loop.min_frame_time_ms - 32.0).abs() < 1e-9);
        assert!((pose_loop.max_frame_time_ms - 118.0).abs() < 1e-9);
        assert!(pose_loop.avg_frame_time_ms > 32.0 && pose_loop.avg_frame_time_ms < 118.0);
    }

    #[test]
    fn test_config_hot_reload_applies_next_tick() {
        let script: Vec<_> = (0..8).map(|_| Some(pose_frame(0.0, 0.9))).collect();
        let (mut pose_loop, _rx) = make_loop(script, no_skip_config());
        let (tx, rx) = unbounded();
        pose_loop.watch_config(rx);

        pose_loop.step(0.0);
        let before = pose_loop
            .snapshot_handle()
            .read()
            .thresholds
            .unwrap()
            .neck_abs_deg;

        tx.send(StateConfig::from_preset(SensitivityPreset::Conservative))
            .unwrap();
        pose_loop.step(DT);
        let after = pose_loop
            .snapshot_handle()
            .read()
            .thresholds
            .unwrap()
            .neck_abs_deg;

        // Baseline 0: sensitive delta 8, conservative delta 12
        assert!((before - 8.0).abs() < 1e-9);
        assert!((after - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothed_metrics_reach_snapshot() {
        let script: Vec<_> = (0..40).map(|_| Some(pose_frame(0.1, 0.9))).collect();
        let (mut pose_loop, _rx) = make_loop(script, no_skip_config());

        for i in 0..40 {
            pose_loop.step(i as f64 * DT);
        }

        let snapshot = pose_loop.snapshot_handle().read().clone();
        let sample = snapshot.last_sample.expect("metrics should be present");
        // EMA has converged close to the raw angle by 5 s
        assert!(sample.neck_deg > 10.0);
        assert!((snapshot.confidence - 0.9).abs() < 1e-6);
        assert!(snapshot.actual_fps > 0.0);
    }
}

//! Calibration routine
//!
//! Captures a neutral posture for a fixed duration and persists the
//! baseline: a 3 s preparing countdown, a capture phase sampling at the
//! configured FPS and rejecting low-confidence frames, median aggregation
//! for outlier robustness, and an atomic save. Progress is reported through
//! a callback after every phase change and capture sample so the 4 Hz
//! publisher always has something fresh.

use crate::baseline::{Baseline, BaselineStore, BASELINE_VERSION};
use crate::camera::FrameSource;
use crate::error::CoachError;
use crate::estimator::LandmarkEstimator;
use crate::metrics::{median_of_sorted, shoulder_width, MetricExtractor};
use crate::status_bus::{CalibrationPhase, CalibrationProgress};
use crate::types::{Clock, MetricSample};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Fraction of the theoretical sample count that must be accepted
const MIN_ACCEPT_FRACTION: f64 = 0.3;

/// Minimum confidence for a sample to count toward the baseline
const MIN_SAMPLE_CONF: f64 = 0.5;

/// Progress callback: receives the snapshot and whether it marks a phase
/// change that should bypass rate limiting.
pub type ProgressFn<'a> = &'a mut dyn FnMut(&CalibrationProgress, bool);

#[derive(Debug, Clone)]
pub struct CalibrationOptions {
    /// Capture duration in seconds (the CLI clamps to 15-45)
    pub duration_sec: f64,
    /// Sampling rate during capture
    pub target_fps: f64,
    /// Countdown before capture starts
    pub prep_sec: f64,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            duration_sec: 25.0,
            target_fps: 8.0,
            prep_sec: 3.0,
        }
    }
}

/// Captures a neutral-posture baseline.
pub struct CalibrationRoutine {
    options: CalibrationOptions,
    extractor: MetricExtractor,
}

impl CalibrationRoutine {
    pub fn new(options: CalibrationOptions) -> Self {
        Self {
            options,
            extractor: MetricExtractor::default(),
        }
    }

    /// Run the full routine. Cancellation is checked at every sample and
    /// between phases.
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        estimator: &mut dyn LandmarkEstimator,
        store: &BaselineStore,
        cancel: &AtomicBool,
        progress: ProgressFn<'_>,
    ) -> Result<Baseline, CoachError> {
        let clock = Clock::new();
        let started = clock.now();

        // Preparing: countdown in small increments so cancellation stays
        // responsive.
        report(
            progress,
            started,
            CalibrationPhase::Preparing,
            0.0,
            0.0,
            0,
            0.0,
            Some(self.options.prep_sec + self.options.duration_sec),
            None,
            None,
            true,
        );
        let mut waited = 0.0;
        while waited < self.options.prep_sec {
            if cancel.load(Ordering::Relaxed) {
                return self.cancelled(progress, clock.now() - started);
            }
            std::thread::sleep(Duration::from_millis(100));
            waited = clock.now() - started;
        }

        // Capturing
        let frame_interval = 1.0 / self.options.target_fps;
        let capture_start = clock.now();
        let mut samples: Vec<MetricSample> = Vec::new();
        let mut widths: Vec<f64> = Vec::new();

        loop {
            if cancel.load(Ordering::Relaxed) {
                return self.cancelled(progress, clock.now() - started);
            }
            let elapsed_capture = clock.now() - capture_start;
            if elapsed_capture >= self.options.duration_sec {
                break;
            }

            if let Ok(frame) = source.read() {
                if let Some(landmarks) = estimator.estimate(&frame) {
                    let now = clock.now();
                    if let Some(sample) = self.extractor.extract(&landmarks, now) {
                        if sample.conf >= MIN_SAMPLE_CONF {
                            if let Some(width) = shoulder_width(&landmarks) {
                                samples.push(sample);
                                widths.push(width);
                            }
                        }
                    }
                }
            }

            let conf_mean = mean_conf(&samples);
            let elapsed = clock.now() - started;
            let fraction =
                (elapsed_capture / self.options.duration_sec * 0.9).clamp(0.0, 0.9);
            report(
                progress,
                started,
                CalibrationPhase::Capturing,
                fraction,
                elapsed,
                samples.len() as u32,
                conf_mean,
                Some((self.options.duration_sec - elapsed_capture).max(0.0)),
                None,
                None,
                false,
            );

            std::thread::sleep(Duration::from_secs_f64(frame_interval));
        }

        if cancel.load(Ordering::Relaxed) {
            return self.cancelled(progress, clock.now() - started);
        }

        // Aggregating
        let conf_mean = mean_conf(&samples);
        report(
            progress,
            started,
            CalibrationPhase::Aggregating,
            0.95,
            clock.now() - started,
            samples.len() as u32,
            conf_mean,
            Some(1.0),
            None,
            None,
            true,
        );

        let baseline = match self.aggregate(&samples, &widths) {
            Ok(baseline) => baseline,
            Err(err) => {
                report(
                    progress,
                    started,
                    CalibrationPhase::Error,
                    0.0,
                    clock.now() - started,
                    samples.len() as u32,
                    conf_mean,
                    None,
                    None,
                    Some(err.to_string()),
                    true,
                );
                return Err(err);
            }
        };

        // Saving
        report(
            progress,
            started,
            CalibrationPhase::Saving,
            0.98,
            clock.now() - started,
            baseline.sample_count,
            baseline.conf_mean,
            Some(0.5),
            None,
            None,
            true,
        );
        if let Err(err) = store.save(&baseline) {
            report(
                progress,
                started,
                CalibrationPhase::Error,
                0.0,
                clock.now() - started,
                baseline.sample_count,
                baseline.conf_mean,
                None,
                None,
                Some(format!("failed to save baseline: {err}")),
                true,
            );
            return Err(err);
        }

        report(
            progress,
            started,
            CalibrationPhase::Done,
            1.0,
            clock.now() - started,
            baseline.sample_count,
            baseline.conf_mean,
            Some(0.0),
            Some(baseline.clone()),
            None,
            true,
        );
        Ok(baseline)
    }

    /// Median aggregation over the accepted samples.
    pub fn aggregate(
        &self,
        samples: &[MetricSample],
        widths: &[f64],
    ) -> Result<Baseline, CoachError> {
        let minimum = (MIN_ACCEPT_FRACTION * self.options.duration_sec * self.options.target_fps)
            .ceil() as usize;
        if samples.len() < minimum {
            return Err(CoachError::InsufficientSamples(format!(
                "accepted {} samples, need at least {minimum}; check lighting and framing",
                samples.len()
            )));
        }

        let median = |extract: fn(&MetricSample) -> f64| {
            let mut values: Vec<f64> = samples.iter().map(extract).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            median_of_sorted(&values)
        };
        let mut sorted_widths = widths.to_vec();
        sorted_widths.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Ok(Baseline {
            version: BASELINE_VERSION,
            neck_deg: median(|s| s.neck_deg),
            torso_deg: median(|s| s.torso_deg),
            lateral: median(|s| s.lateral),
            shoulder_width_proxy: median_of_sorted(&sorted_widths),
            calibrated_at: Utc::now().to_rfc3339(),
            sample_count: samples.len() as u32,
            conf_mean: mean_conf(samples),
        })
    }

    fn cancelled(
        &self,
        progress: ProgressFn<'_>,
        elapsed: f64,
    ) -> Result<Baseline, CoachError> {
        progress(
            &CalibrationProgress {
                ts_unix: 0.0,
                phase: CalibrationPhase::Error,
                progress: 0.0,
                elapsed_sec: elapsed,
                samples_captured: 0,
                conf_mean: 0.0,
                eta_sec: None,
                baseline: None,
                error: Some("calibration cancelled".to_string()),
            },
            true,
        );
        Err(CoachError::CalibrationCancelled)
    }
}

#[allow(clippy::too_many_arguments)]
fn report(
    progress: ProgressFn<'_>,
    started: f64,
    phase: CalibrationPhase,
    fraction: f64,
    elapsed: f64,
    samples_captured: u32,
    conf_mean: f64,
    eta_sec: Option<f64>,
    baseline: Option<Baseline>,
    error: Option<String>,
    force: bool,
) {
    progress(
        &CalibrationProgress {
            ts_unix: started + elapsed,
            phase,
            progress: fraction,
            elapsed_sec: elapsed,
            samples_captured,
            conf_mean,
            eta_sec,
            baseline,
            error,
        },
        force,
    );
}

fn mean_conf(samples: &[MetricSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.conf).sum::<f64>() / samples.len() as f64
}

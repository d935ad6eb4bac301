//! Posture metrics from pose landmarks
//!
//! This module derives the three geometric posture scalars from a landmark
//! frame and provides the smoothing primitives used by the pose loop:
//! - Neck flexion: angle between the shoulder→ear vector and image vertical
//! - Torso flexion: angle between the hip→shoulder vector and image vertical
//! - Lateral lean: shoulder height asymmetry normalized by shoulder width
//!
//! Angles are measured against the in-image vertical rather than world
//! gravity so small camera tilts cancel out. Frames never leave this module;
//! only the derived scalars do.

use crate::types::{Landmark, LandmarkFrame, MetricSample};
use std::collections::VecDeque;

// MediaPipe-compatible landmark indices
pub const LEFT_EAR: usize = 7;
pub const RIGHT_EAR: usize = 8;
pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;

/// Default minimum per-landmark visibility for a usable sample
pub const MIN_VISIBILITY: f64 = 0.5;

/// Extracts posture metrics from landmark frames.
pub struct MetricExtractor {
    min_visibility: f64,
}

impl Default for MetricExtractor {
    fn default() -> Self {
        Self::new(MIN_VISIBILITY)
    }
}

impl MetricExtractor {
    pub fn new(min_visibility: f64) -> Self {
        Self { min_visibility }
    }

    /// Compute a metric sample from a landmark frame.
    ///
    /// Returns `None` when the required landmarks (both shoulders, both
    /// hips, and at least one ear) do not meet the minimum visibility;
    /// callers treat that as "pause evaluation this frame".
    pub fn extract(&self, frame: &LandmarkFrame, ts: f64) -> Option<MetricSample> {
        let left_ear = *frame.get(LEFT_EAR)?;
        let right_ear = *frame.get(RIGHT_EAR)?;
        let left_shoulder = *frame.get(LEFT_SHOULDER)?;
        let right_shoulder = *frame.get(RIGHT_SHOULDER)?;
        let left_hip = *frame.get(LEFT_HIP)?;
        let right_hip = *frame.get(RIGHT_HIP)?;

        let best_ear_vis = left_ear.visibility.max(right_ear.visibility) as f64;
        let required = [
            left_shoulder.visibility as f64,
            right_shoulder.visibility as f64,
            left_hip.visibility as f64,
            right_hip.visibility as f64,
            best_ear_vis,
        ];
        if required.iter().any(|v| *v < self.min_visibility) {
            return None;
        }

        // Gating confidence: weakest of the required landmarks
        let conf = required.iter().cloned().fold(f64::INFINITY, f64::min);

        // Ear reference: midpoint when both ears are visible, else the
        // visible side alone
        let ear_ref = if (left_ear.visibility as f64) >= self.min_visibility
            && (right_ear.visibility as f64) >= self.min_visibility
        {
            midpoint(&left_ear, &right_ear)
        } else if (left_ear.visibility as f64) >= self.min_visibility {
            (left_ear.x as f64, left_ear.y as f64)
        } else {
            (right_ear.x as f64, right_ear.y as f64)
        };

        let shoulder_mid = midpoint(&left_shoulder, &right_shoulder);
        let hip_mid = midpoint(&left_hip, &right_hip);

        let neck_deg = vertical_angle_deg(shoulder_mid, ear_ref);
        let torso_deg = vertical_angle_deg(hip_mid, shoulder_mid);
        let lateral = lateral_lean(&left_shoulder, &right_shoulder);

        Some(MetricSample {
            ts,
            neck_deg,
            torso_deg,
            lateral,
            conf,
        })
    }
}

fn midpoint(a: &Landmark, b: &Landmark) -> (f64, f64) {
    (
        (a.x as f64 + b.x as f64) / 2.0,
        (a.y as f64 + b.y as f64) / 2.0,
    )
}

/// Angle in degrees between the vector `from`→`to` and the image vertical.
///
/// Image coordinates have y increasing downward; only the magnitude of the
/// deviation matters.
fn vertical_angle_deg(from: (f64, f64), to: (f64, f64)) -> f64 {
    let dx = (to.0 - from.0).abs();
    let dy = (to.1 - from.1).abs();
    dx.atan2(dy).to_degrees()
}

/// Shoulder height difference normalized by shoulder width.
///
/// Scale-independent; the sign is irrelevant for detection so the absolute
/// ratio is returned. A degenerate shoulder width yields 0.
fn lateral_lean(left_shoulder: &Landmark, right_shoulder: &Landmark) -> f64 {
    let height_diff = (left_shoulder.y as f64 - right_shoulder.y as f64).abs();
    let width = (left_shoulder.x as f64 - right_shoulder.x as f64).abs();
    if width < 0.01 {
        return 0.0;
    }
    height_diff / width
}

/// Shoulder width proxy for the lateral cm→ratio conversion
pub fn shoulder_width(frame: &LandmarkFrame) -> Option<f64> {
    let left = frame.get(LEFT_SHOULDER)?;
    let right = frame.get(RIGHT_SHOULDER)?;
    Some((left.x as f64 - right.x as f64).abs())
}

/// First-order exponential moving average.
///
/// Seeds on the first value; `reset` clears the seed.
#[derive(Debug, Clone)]
pub struct EmaSmoother {
    alpha: f64,
    value: Option<f64>,
}

impl EmaSmoother {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, new_value: f64) -> f64 {
        let smoothed = match self.value {
            None => new_value,
            Some(prev) => self.alpha * new_value + (1.0 - self.alpha) * prev,
        };
        self.value = Some(smoothed);
        smoothed
    }

    pub fn get(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Per-channel EMA over a raw metric sample.
///
/// Confidence is passed through unsmoothed so gating always reflects the
/// current frame.
#[derive(Debug, Clone)]
pub struct MetricSmoother {
    neck: EmaSmoother,
    torso: EmaSmoother,
    lateral: EmaSmoother,
}

impl MetricSmoother {
    pub fn new(alpha: f64) -> Self {
        Self {
            neck: EmaSmoother::new(alpha),
            torso: EmaSmoother::new(alpha),
            lateral: EmaSmoother::new(alpha),
        }
    }

    pub fn update(&mut self, raw: &MetricSample) -> MetricSample {
        MetricSample {
            ts: raw.ts,
            neck_deg: self.neck.update(raw.neck_deg),
            torso_deg: self.torso.update(raw.torso_deg),
            lateral: self.lateral.update(raw.lateral),
            conf: raw.conf,
        }
    }

    pub fn reset(&mut self) {
        self.neck.reset();
        self.torso.reset();
        self.lateral.reset();
    }
}

/// Rolling buffer of `(ts, value)` pairs bounded by a wall-clock window.
///
/// Entries older than `window_sec` are evicted on insert. Time-ordered;
/// stats are O(n) scans.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    window_sec: f64,
    entries: VecDeque<(f64, f64)>,
}

impl RollingBuffer {
    pub fn new(window_sec: f64) -> Self {
        Self {
            window_sec,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, ts: f64, value: f64) {
        if let Some(&(last_ts, _)) = self.entries.back() {
            if ts < last_ts {
                return;
            }
        }
        self.entries.push_back((ts, value));
        let cutoff = ts - self.window_sec;
        while let Some(&(front_ts, _)) = self.entries.front() {
            if front_ts < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn latest(&self) -> Option<f64> {
        self.entries.back().map(|&(_, v)| v)
    }

    pub fn mean(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let sum: f64 = self.entries.iter().map(|&(_, v)| v).sum();
        Some(sum / self.entries.len() as f64)
    }

    pub fn median(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let mut values: Vec<f64> = self.entries.iter().map(|&(_, v)| v).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Some(median_of_sorted(&values))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Median of an already-sorted non-empty slice
pub fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Landmark, LandmarkFrame, LANDMARK_COUNT};

    fn blank_frame() -> Vec<Landmark> {
        vec![
            Landmark {
                x: 0.5,
                y: 0.5,
                visibility: 0.0
            };
            LANDMARK_COUNT
        ]
    }

    fn set(points: &mut [Landmark], index: usize, x: f32, y: f32, visibility: f32) {
        points[index] = Landmark { x, y, visibility };
    }

    /// Upright subject: ears directly above shoulders, shoulders above hips,
    /// shoulders level.
    fn upright_frame() -> LandmarkFrame {
        let mut points = blank_frame();
        set(&mut points, LEFT_EAR, 0.45, 0.20, 0.9);
        set(&mut points, RIGHT_EAR, 0.55, 0.20, 0.9);
        set(&mut points, LEFT_SHOULDER, 0.40, 0.40, 0.95);
        set(&mut points, RIGHT_SHOULDER, 0.60, 0.40, 0.95);
        set(&mut points, LEFT_HIP, 0.42, 0.70, 0.8);
        set(&mut points, RIGHT_HIP, 0.58, 0.70, 0.8);
        LandmarkFrame::new(points).unwrap()
    }

    #[test]
    fn test_upright_frame_has_zero_angles() {
        let extractor = MetricExtractor::default();
        let sample = extractor.extract(&upright_frame(), 100.0).unwrap();

        assert!(sample.neck_deg.abs() < 0.001);
        assert!(sample.torso_deg.abs() < 0.001);
        assert!(sample.lateral.abs() < 0.001);
        // Weakest required landmark is a hip at 0.8
        assert!((sample.conf - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_forward_head_raises_neck_angle() {
        let mut points = blank_frame();
        // Ears shifted forward (in x) relative to shoulders
        set(&mut points, LEFT_EAR, 0.55, 0.25, 0.9);
        set(&mut points, RIGHT_EAR, 0.65, 0.25, 0.9);
        set(&mut points, LEFT_SHOULDER, 0.40, 0.40, 0.95);
        set(&mut points, RIGHT_SHOULDER, 0.60, 0.40, 0.95);
        set(&mut points, LEFT_HIP, 0.42, 0.70, 0.8);
        set(&mut points, RIGHT_HIP, 0.58, 0.70, 0.8);
        let frame = LandmarkFrame::new(points).unwrap();

        let sample = MetricExtractor::default().extract(&frame, 100.0).unwrap();
        // dx = 0.10, dy = 0.15 -> atan(0.10/0.15) = 33.69 degrees
        assert!((sample.neck_deg - 33.69).abs() < 0.1);
        assert!(sample.torso_deg.abs() < 0.001);
    }

    #[test]
    fn test_single_visible_ear_is_used() {
        let mut points = blank_frame();
        set(&mut points, LEFT_EAR, 0.45, 0.20, 0.9);
        set(&mut points, RIGHT_EAR, 0.75, 0.10, 0.1); // occluded
        set(&mut points, LEFT_SHOULDER, 0.40, 0.40, 0.95);
        set(&mut points, RIGHT_SHOULDER, 0.60, 0.40, 0.95);
        set(&mut points, LEFT_HIP, 0.42, 0.70, 0.8);
        set(&mut points, RIGHT_HIP, 0.58, 0.70, 0.8);
        let frame = LandmarkFrame::new(points).unwrap();

        let sample = MetricExtractor::default().extract(&frame, 100.0).unwrap();
        // Left ear at (0.45, 0.20) vs shoulder mid (0.50, 0.40):
        // dx = 0.05, dy = 0.20 -> 14.04 degrees
        assert!((sample.neck_deg - 14.04).abs() < 0.1);
    }

    #[test]
    fn test_low_visibility_returns_none() {
        let mut points = blank_frame();
        set(&mut points, LEFT_EAR, 0.45, 0.20, 0.9);
        set(&mut points, RIGHT_EAR, 0.55, 0.20, 0.9);
        set(&mut points, LEFT_SHOULDER, 0.40, 0.40, 0.3); // below threshold
        set(&mut points, RIGHT_SHOULDER, 0.60, 0.40, 0.95);
        set(&mut points, LEFT_HIP, 0.42, 0.70, 0.8);
        set(&mut points, RIGHT_HIP, 0.58, 0.70, 0.8);
        let frame = LandmarkFrame::new(points).unwrap();

        assert!(MetricExtractor::default().extract(&frame, 100.0).is_none());
    }

    #[test]
    fn test_lateral_lean_normalized_by_width() {
        let mut points = blank_frame();
        set(&mut points, LEFT_EAR, 0.45, 0.20, 0.9);
        set(&mut points, RIGHT_EAR, 0.55, 0.20, 0.9);
        // Left shoulder 0.04 lower than right, width 0.20
        set(&mut points, LEFT_SHOULDER, 0.40, 0.44, 0.95);
        set(&mut points, RIGHT_SHOULDER, 0.60, 0.40, 0.95);
        set(&mut points, LEFT_HIP, 0.42, 0.70, 0.8);
        set(&mut points, RIGHT_HIP, 0.58, 0.70, 0.8);
        let frame = LandmarkFrame::new(points).unwrap();

        let sample = MetricExtractor::default().extract(&frame, 100.0).unwrap();
        assert!((sample.lateral - 0.2).abs() < 0.001);
    }

    #[test]
    fn test_ema_seeds_then_smooths() {
        let mut ema = EmaSmoother::new(0.3);
        assert!(ema.get().is_none());
        assert!((ema.update(10.0) - 10.0).abs() < 0.001);
        // 0.3 * 20 + 0.7 * 10 = 13
        assert!((ema.update(20.0) - 13.0).abs() < 0.001);
        ema.reset();
        assert!(ema.get().is_none());
    }

    #[test]
    fn test_rolling_buffer_evicts_by_window() {
        let mut buffer = RollingBuffer::new(10.0);
        for i in 0..20 {
            buffer.push(i as f64, i as f64);
        }
        // Entries at ts < 9.0 are evicted (19 - 10)
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.latest(), Some(19.0));
    }

    #[test]
    fn test_rolling_buffer_median() {
        let mut buffer = RollingBuffer::new(60.0);
        for (i, v) in [5.0, 1.0, 9.0, 3.0, 7.0].iter().enumerate() {
            buffer.push(i as f64, *v);
        }
        assert_eq!(buffer.median(), Some(5.0));

        buffer.push(5.0, 11.0);
        // Sorted: 1 3 5 7 9 11 -> (5 + 7) / 2
        assert_eq!(buffer.median(), Some(6.0));
    }

    #[test]
    fn test_rolling_buffer_rejects_backwards_time() {
        let mut buffer = RollingBuffer::new(60.0);
        buffer.push(10.0, 1.0);
        buffer.push(5.0, 2.0);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.latest(), Some(1.0));
    }
}

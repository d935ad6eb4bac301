//! Pose estimator interface
//!
//! The landmark estimator is an external collaborator: a black box that
//! turns a camera frame into 33 normalized keypoints with per-landmark
//! visibility, or nothing when no subject is found. Only the interface
//! lives here; the daemon is wired with whichever backend the build
//! provides, and the pipeline treats a `None` result as a PAUSED frame.

use crate::camera::CameraFrame;
use crate::types::LandmarkFrame;
use std::collections::VecDeque;

/// Produces pose landmarks from camera frames.
///
/// Implementations select the single largest subject when more than one
/// person is in frame; missing landmarks carry low visibility scores.
pub trait LandmarkEstimator: Send {
    fn estimate(&mut self, frame: &CameraFrame) -> Option<LandmarkFrame>;
}

/// The estimator backend available to this build, if any.
///
/// Inference engines are deployment-specific and plug in here; a build
/// without one still runs the full pipeline and reports PAUSED, which the
/// UI surfaces as "no pose available".
pub fn default_backend() -> Option<Box<dyn LandmarkEstimator>> {
    None
}

/// Backend-less estimator: never detects a pose.
///
/// Used when no inference backend is wired in; the pipeline stays in
/// PAUSED, which is exactly the missing-pose contract.
pub struct NullEstimator;

impl LandmarkEstimator for NullEstimator {
    fn estimate(&mut self, _frame: &CameraFrame) -> Option<LandmarkFrame> {
        None
    }
}

/// Replays a pre-programmed sequence of landmark frames.
///
/// Drives the pipeline in tests and demos without a camera or model. Once
/// the script is exhausted it keeps returning `None`.
pub struct ScriptedEstimator {
    frames: VecDeque<Option<LandmarkFrame>>,
}

impl ScriptedEstimator {
    pub fn new(frames: impl IntoIterator<Item = Option<LandmarkFrame>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl LandmarkEstimator for ScriptedEstimator {
    fn estimate(&mut self, _frame: &CameraFrame) -> Option<LandmarkFrame> {
        self.frames.pop_front().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Landmark, LANDMARK_COUNT};

    fn frame() -> CameraFrame {
        CameraFrame {
            width: 4,
            height: 4,
            data: vec![0; 48],
        }
    }

    fn pose() -> LandmarkFrame {
        LandmarkFrame::new(vec![
            Landmark {
                x: 0.5,
                y: 0.5,
                visibility: 0.9
            };
            LANDMARK_COUNT
        ])
        .unwrap()
    }

    #[test]
    fn test_null_estimator_never_detects() {
        let mut estimator = NullEstimator;
        assert!(estimator.estimate(&frame()).is_none());
    }

    #[test]
    fn test_scripted_estimator_replays_then_dries_up() {
        let mut estimator = ScriptedEstimator::new([Some(pose()), None, Some(pose())]);
        assert!(estimator.estimate(&frame()).is_some());
        assert!(estimator.estimate(&frame()).is_none());
        assert!(estimator.estimate(&frame()).is_some());
        assert_eq!(estimator.remaining(), 0);
        // Exhausted scripts behave like a lost subject
        assert!(estimator.estimate(&frame()).is_none());
    }
}

//! Calibration baseline persistence
//!
//! The baseline captures a user's neutral posture: median neck and torso
//! angles, median lateral asymmetry, and a shoulder-width proxy used to
//! convert centimeter thresholds into the normalized lateral scale. Written
//! exactly once per calibration run; reloaded at daemon startup. Without a
//! baseline the state machine stays inactive.

use crate::error::CoachError;
use crate::storage::atomic_write_json;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Current baseline document version
pub const BASELINE_VERSION: u32 = 1;

fn default_version() -> u32 {
    BASELINE_VERSION
}

/// Per-user neutral-posture reference values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Median neck flexion during calibration (degrees)
    pub neck_deg: f64,
    /// Median torso flexion during calibration (degrees)
    pub torso_deg: f64,
    /// Median lateral asymmetry during calibration (normalized ratio)
    pub lateral: f64,
    /// Median inter-shoulder distance in normalized image coordinates
    pub shoulder_width_proxy: f64,
    /// ISO-8601 timestamp of the calibration run
    pub calibrated_at: String,
    /// Samples accepted during aggregation
    pub sample_count: u32,
    /// Mean gating confidence across accepted samples
    pub conf_mean: f64,
}

/// Loads and saves the baseline file (`calibration.json`).
///
/// Read-many, written only by the calibration routine, atomically.
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the baseline. `None` when the file is absent; a parse failure
    /// is reported so calibration can be re-run.
    pub fn load(&self) -> Result<Option<Baseline>, CoachError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let baseline: Baseline = serde_json::from_str(&contents)?;
        Ok(Some(baseline))
    }

    /// Persist the baseline atomically.
    pub fn save(&self, baseline: &Baseline) -> Result<(), CoachError> {
        atomic_write_json(&self.path, baseline)
    }

    /// Remove the baseline (part of a privacy purge).
    pub fn delete(&self) -> Result<(), CoachError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

//! Error types for DeskCoach

use thiserror::Error;

/// Errors that can occur in the posture pipeline and its coordination layer
#[derive(Debug, Error)]
pub enum CoachError {
    #[error("Failed to open camera: {0}")]
    CameraOpen(String),

    #[error("Camera read failed: {0}")]
    CameraRead(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Insufficient calibration samples: {0}")]
    InsufficientSamples(String),

    #[error("Calibration already in progress (pid {0})")]
    CalibrationInProgress(u32),

    #[error("Calibration cancelled")]
    CalibrationCancelled,

    #[error("No calibration baseline found; run calibration first")]
    MissingBaseline,

    #[error("Configuration value out of range: {0}")]
    InvalidConfig(String),

    #[error("Notification delivery failed: {0}")]
    NotificationError(String),

    #[error("Supervisor error: {0}")]
    SupervisorError(String),
}

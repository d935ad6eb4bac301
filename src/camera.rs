//! Camera session
//!
//! The pose loop is the single owner of the camera for the lifetime of the
//! daemon. Frames are decoded to RGB in memory, handed to the estimator,
//! and dropped; nothing is ever written to disk. The `FrameSource` trait
//! lets tests script capture failures without hardware.

use crate::error::CoachError;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraIndex, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

/// One decoded RGB frame. Lives only as long as metric extraction needs it.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB8 pixel data
    pub data: Vec<u8>,
}

/// Source of camera frames; the production implementation wraps the webcam,
/// tests provide scripted sources.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<CameraFrame, CoachError>;
}

/// Webcam session backed by nokhwa.
pub struct CameraSession {
    camera: Camera,
}

impl CameraSession {
    /// Open the device at `index`, requesting the configured resolution.
    /// Failure here is fatal at daemon startup.
    pub fn open(index: u32, width: u32, height: u32) -> Result<Self, CoachError> {
        let requested = RequestedFormat::new::<RgbFormat>(
            RequestedFormatType::HighestResolution(Resolution::new(width, height)),
        );
        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| CoachError::CameraOpen(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CoachError::CameraOpen(e.to_string()))?;
        Ok(Self { camera })
    }
}

impl FrameSource for CameraSession {
    fn read(&mut self) -> Result<CameraFrame, CoachError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CoachError::CameraRead(e.to_string()))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CoachError::CameraRead(e.to_string()))?;
        Ok(CameraFrame {
            width: decoded.width(),
            height: decoded.height(),
            data: decoded.into_raw(),
        })
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        let _ = self.camera.stop_stream();
    }
}

/// Scripted source for tests: yields queued results, then errors.
pub struct ScriptedSource {
    results: std::collections::VecDeque<Result<CameraFrame, CoachError>>,
}

impl ScriptedSource {
    pub fn new(results: impl IntoIterator<Item = Result<CameraFrame, CoachError>>) -> Self {
        Self {
            results: results.into_iter().collect(),
        }
    }

    /// A source that always succeeds with a tiny blank frame.
    pub fn endless_blank() -> EndlessBlankSource {
        EndlessBlankSource
    }
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<CameraFrame, CoachError> {
        self.results
            .pop_front()
            .unwrap_or_else(|| Err(CoachError::CameraRead("script exhausted".to_string())))
    }
}

/// Always returns a small blank frame; pairs with `ScriptedEstimator`.
pub struct EndlessBlankSource;

impl FrameSource for EndlessBlankSource {
    fn read(&mut self) -> Result<CameraFrame, CoachError> {
        Ok(CameraFrame {
            width: 4,
            height: 4,
            data: vec![0; 48],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_source_replays_then_errors() {
        let frame = CameraFrame {
            width: 2,
            height: 2,
            data: vec![0; 12],
        };
        let mut source = ScriptedSource::new([
            Ok(frame.clone()),
            Err(CoachError::CameraRead("transient".to_string())),
            Ok(frame),
        ]);

        assert!(source.read().is_ok());
        assert!(source.read().is_err());
        assert!(source.read().is_ok());
        // Exhausted scripts surface as read errors
        assert!(source.read().is_err());
    }

    #[test]
    fn test_endless_blank_source() {
        let mut source = ScriptedSource::endless_blank();
        let frame = source.read().unwrap();
        assert_eq!((frame.width, frame.height), (4, 4));
        assert_eq!(frame.data.len(), 48);
    }
}

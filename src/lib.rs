//! DeskCoach - local, privacy-preserving posture coach
//!
//! DeskCoach turns webcam pose landmarks into posture nudges through a
//! deterministic pipeline: metric extraction → smoothing → condition
//! windows → sustained-state detection → notification policy. Live state is
//! published for an out-of-process UI through atomic snapshot files.
//!
//! No frame ever leaves RAM: only derived angles, booleans, and timestamps
//! are stored or published.
//!
//! ## Modules
//!
//! - **Pipeline**: `metrics`, `window`, `state_machine`, `pose_loop`
//! - **Policy**: `policy`, `notify`
//! - **Calibration**: `calibration`, `baseline`
//! - **Coordination**: `status_bus`, `event_log`, `supervisor`, `storage`,
//!   `config`

pub mod baseline;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod error;
pub mod estimator;
pub mod event_log;
pub mod metrics;
pub mod notify;
pub mod policy;
pub mod pose_loop;
pub mod state_machine;
pub mod status_bus;
pub mod storage;
pub mod supervisor;
pub mod types;
pub mod window;

pub use baseline::{Baseline, BaselineStore};
pub use config::{Config, ConfigStore, SensitivityPreset};
pub use error::CoachError;
pub use policy::NotificationPolicy;
pub use pose_loop::PoseLoop;
pub use state_machine::PostureStateMachine;
pub use types::{MetricSample, PostureState, TransitionEvent};

/// DeskCoach version embedded in snapshots and the daemon meta file
pub const COACH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for snapshots
pub const PRODUCER_NAME: &str = "deskcoach";

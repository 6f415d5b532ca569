//! # Kestrel Core
//!
//! Navigation state estimation for vehicles aided by visual odometry:
//! - Error-state EKF over attitude, velocity, position and IMU biases
//! - External vision fusion (position, velocity, heading) in the navigation
//!   frame or in the vision system's own frame
//! - Online estimation of the vision-to-navigation frame alignment
//! - Per-axis reset bookkeeping on initialization and divergence
//! - Optional GNSS position/velocity aiding
//!
//! The estimator is a plain owned value. Every call performs one step and
//! reports its outcome as a [`FilterStatus`]; nothing in this crate panics on
//! bad data.

pub mod alignment;
pub mod config;
pub mod ekf;
pub mod fusion;
pub mod gate;
pub mod gnss;
pub mod math;
pub mod predictor;
pub mod reset;
pub mod state;
pub mod status;
pub mod vision;

// Re-export core types
pub use config::{ConfigError, EkfConfig, VisionControl};
pub use ekf::Ekf;
pub use gnss::{GeoReference, GnssFusionReport, GnssSample};
pub use math::{canonical, Scalar, GRAVITY};
pub use predictor::ImuSample;
pub use reset::{AxisClass, ResetEntry, ResetLog};
pub use state::{ActiveStates, NominalState};
pub use status::{Channel, ChannelStatus, FilterStatus};
pub use vision::{
    ExtVisionSample, ReferenceFrame, VisionFusionReport, VisionMeasurement, VisionObservation,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Kestrel Simulation Library
//!
//! Synthetic IMU, visual odometry and GNSS sources driven from a shared
//! truth, a reset logging checker, and a scenario runner for the estimator.

pub mod reset_checker;
pub mod scenario;
pub mod sensor;
pub mod simulator;

// Re-export main types
pub use reset_checker::ResetLoggingChecker;
pub use scenario::{run_scenario, ScenarioConfig, ScenarioResult, ScenarioSummary};
pub use sensor::{measure_imu, Gnss, NoiseSource, SensorConfig, Truth, Vio};
pub use simulator::{SensorSimulator, StepOutcome, IMU_PERIOD_US};

use kestrel_core::math::{Scalar, Vector3r};
use kestrel_core::{Ekf, FilterStatus, GnssFusionReport, VisionFusionReport};
use tracing::debug;

use crate::sensor::{measure_imu, Gnss, NoiseSource, SensorConfig, Truth, Vio};

pub const IMU_PERIOD_US: u64 = 4_000;

/// What the estimator reported during one simulator step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub time_us: u64,
    pub imu: FilterStatus,
    pub vision: Option<VisionFusionReport>,
    pub gnss: Option<GnssFusionReport>,
}

/// Drives an estimator with synthetic IMU, vision and GNSS data, in time
/// order, from a shared truth.
#[derive(Debug, Clone)]
pub struct SensorSimulator {
    pub config: SensorConfig,
    pub truth: Truth,
    pub vio: Vio,
    pub gnss: Gnss,
    noise: NoiseSource,
    time_us: u64,
}

impl SensorSimulator {
    pub fn new(config: SensorConfig) -> Self {
        let noise = NoiseSource::new(config.seed, config.noise_scale);
        Self {
            config,
            truth: Truth::default(),
            vio: Vio::default(),
            gnss: Gnss::default(),
            noise,
            time_us: 0,
        }
    }

    pub fn time_us(&self) -> u64 {
        self.time_us
    }

    pub fn start_external_vision(&mut self) {
        self.vio.restart();
    }

    pub fn stop_external_vision(&mut self) {
        self.vio.running = false;
    }

    pub fn start_gnss(&mut self) {
        self.gnss.restart();
    }

    pub fn stop_gnss(&mut self) {
        self.gnss.running = false;
    }

    /// Sets the truth velocity from its value in the vision sample frame.
    pub fn set_vision_velocity(&mut self, velocity: &Vector3r) {
        self.truth.velocity = self.vio.to_nav(velocity);
    }

    pub fn set_velocity(&mut self, velocity: &Vector3r) {
        self.truth.velocity = *velocity;
    }

    pub fn step(&mut self, ekf: &mut Ekf) -> StepOutcome {
        self.time_us += IMU_PERIOD_US;
        let t = self.time_us;
        self.truth.advance(IMU_PERIOD_US as Scalar * 1e-6);

        let imu = measure_imu(&self.truth, t, &self.config, &mut self.noise);
        let imu_status = ekf.predict(&imu);

        let vision = if self.vio.is_due(t) {
            let sample = self.vio.measure(&self.truth, t, &self.config, &mut self.noise);
            Some(ekf.fuse_ext_vision(&sample))
        } else {
            None
        };

        let gnss = if self.gnss.is_due(t) {
            let sample = self.gnss.measure(&self.truth, t, &self.config, &mut self.noise);
            Some(ekf.fuse_gnss(&sample))
        } else {
            None
        };

        StepOutcome {
            time_us: t,
            imu: imu_status,
            vision,
            gnss,
        }
    }

    pub fn run_microseconds(&mut self, ekf: &mut Ekf, duration_us: u64) {
        let end = self.time_us + duration_us;
        while self.time_us < end {
            self.step(ekf);
        }
        debug!(time_us = self.time_us, "simulation advanced");
    }

    pub fn run_seconds(&mut self, ekf: &mut Ekf, duration_s: Scalar) {
        self.run_microseconds(ekf, (duration_s.max(0.0) * 1e6) as u64);
    }
}

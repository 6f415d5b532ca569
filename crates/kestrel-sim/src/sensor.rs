use kestrel_core::math::{Scalar, UnitQuaternionr, Vector3r};
use kestrel_core::{
    ExtVisionSample, GeoReference, GnssSample, ImuSample, ReferenceFrame, GRAVITY,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    /// Multiplies every noise sigma below; 0 gives exact measurements.
    pub noise_scale: f64,
    pub accel_noise_std: f64,           // m/s^2
    pub gyro_noise_std: f64,            // rad/s
    pub vision_position_noise_std: f64, // m
    pub vision_velocity_noise_std: f64, // m/s
    pub gnss_position_noise_std: f64,   // m
    pub gnss_velocity_noise_std: f64,   // m/s

    // Static biases
    pub accel_bias: Vector3r,
    pub gyro_bias: Vector3r,

    pub seed: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            noise_scale: 0.0,
            accel_noise_std: 0.05,
            gyro_noise_std: 0.001,
            vision_position_noise_std: 0.02,
            vision_velocity_noise_std: 0.02,
            gnss_position_noise_std: 0.5,
            gnss_velocity_noise_std: 0.1,
            accel_bias: Vector3r::zeros(),
            gyro_bias: Vector3r::zeros(),
            seed: 42,
        }
    }
}

/// Seeded zero-mean Gaussian noise.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    rng: StdRng,
    scale: f64,
}

impl NoiseSource {
    pub fn new(seed: u64, scale: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            scale,
        }
    }

    pub fn sample(&mut self, std: f64) -> Scalar {
        let sigma = self.scale * std;
        if sigma.is_nan() || sigma <= 0.0 {
            return 0.0;
        }
        match Normal::new(0.0, sigma) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => 0.0,
        }
    }

    pub fn vector(&mut self, std: f64) -> Vector3r {
        Vector3r::new(self.sample(std), self.sample(std), self.sample(std))
    }
}

// ---------------------------------------------------------------------------
// TRUTH
// ---------------------------------------------------------------------------
/// Vehicle ground truth in the navigation frame. Attitude is held constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Truth {
    pub position: Vector3r,
    pub velocity: Vector3r,
    pub attitude: UnitQuaternionr,
}

impl Default for Truth {
    fn default() -> Self {
        Self {
            position: Vector3r::zeros(),
            velocity: Vector3r::zeros(),
            attitude: UnitQuaternionr::identity(),
        }
    }
}

impl Truth {
    pub fn advance(&mut self, dt: Scalar) {
        self.position += self.velocity * dt;
    }
}

// ---------------------------------------------------------------------------
// IMU
// ---------------------------------------------------------------------------
pub fn measure_imu(
    truth: &Truth,
    time_us: u64,
    cfg: &SensorConfig,
    noise: &mut NoiseSource,
) -> ImuSample {
    // Constant velocity: the accelerometer only sees the reaction to gravity.
    let specific_force_nav = Vector3r::new(0.0, 0.0, -GRAVITY);
    let accel = truth.attitude.inverse() * specific_force_nav
        + cfg.accel_bias
        + noise.vector(cfg.accel_noise_std);
    let gyro = cfg.gyro_bias + noise.vector(cfg.gyro_noise_std);
    ImuSample {
        time_us,
        gyro,
        accel,
    }
}

// ---------------------------------------------------------------------------
// VISUAL ODOMETRY
// ---------------------------------------------------------------------------
/// Visual odometry source. In the local frame it reports everything rotated
/// by the inverse of `frame_offset` (vision to navigation).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vio {
    pub frame: ReferenceFrame,
    pub frame_offset: UnitQuaternionr,
    pub position_variance: Vector3r,
    pub velocity_variance: Vector3r,
    pub heading_variance: Scalar,
    pub period_us: u64,
    pub running: bool,
    last_sample_us: Option<u64>,
}

impl Default for Vio {
    fn default() -> Self {
        Self {
            frame: ReferenceFrame::Local,
            frame_offset: UnitQuaternionr::identity(),
            position_variance: Vector3r::repeat(0.01),
            velocity_variance: Vector3r::repeat(0.01),
            heading_variance: 0.0025,
            period_us: 20_000,
            running: false,
            last_sample_us: None,
        }
    }
}

impl Vio {
    pub fn set_frame_yaw(&mut self, yaw: Scalar) {
        self.frame_offset = UnitQuaternionr::from_euler_angles(0.0, 0.0, yaw);
    }

    /// Navigation-frame vector for one expressed in the sample frame.
    pub fn to_nav(&self, v: &Vector3r) -> Vector3r {
        match self.frame {
            ReferenceFrame::Navigation => *v,
            ReferenceFrame::Local => self.frame_offset * v,
        }
    }

    pub(crate) fn is_due(&self, time_us: u64) -> bool {
        self.running
            && self
                .last_sample_us
                .map_or(true, |last| time_us.saturating_sub(last) >= self.period_us)
    }

    pub fn measure(
        &mut self,
        truth: &Truth,
        time_us: u64,
        cfg: &SensorConfig,
        noise: &mut NoiseSource,
    ) -> ExtVisionSample {
        self.last_sample_us = Some(time_us);
        let to_sample = match self.frame {
            ReferenceFrame::Navigation => UnitQuaternionr::identity(),
            ReferenceFrame::Local => self.frame_offset.inverse(),
        };

        let mut sample = ExtVisionSample::new(time_us, self.frame);
        sample.position =
            Some(to_sample * truth.position + noise.vector(cfg.vision_position_noise_std));
        sample.position_variance = self.position_variance;
        sample.velocity =
            Some(to_sample * truth.velocity + noise.vector(cfg.vision_velocity_noise_std));
        sample.velocity_variance = self.velocity_variance;
        sample.orientation = Some(to_sample * truth.attitude);
        sample.heading_variance = self.heading_variance;
        sample
    }

    pub(crate) fn restart(&mut self) {
        self.running = true;
        self.last_sample_us = None;
    }
}

// ---------------------------------------------------------------------------
// GNSS
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gnss {
    pub home: GeoReference,
    pub horizontal_accuracy: Scalar,
    pub vertical_accuracy: Scalar,
    pub speed_accuracy: Scalar,
    pub period_us: u64,
    pub running: bool,
    last_sample_us: Option<u64>,
}

impl Default for Gnss {
    fn default() -> Self {
        Self {
            home: GeoReference::new(47.3977, 8.5456, 488.0),
            horizontal_accuracy: 0.5,
            vertical_accuracy: 0.8,
            speed_accuracy: 0.2,
            period_us: 200_000,
            running: false,
            last_sample_us: None,
        }
    }
}

impl Gnss {
    pub(crate) fn is_due(&self, time_us: u64) -> bool {
        self.running
            && self
                .last_sample_us
                .map_or(true, |last| time_us.saturating_sub(last) >= self.period_us)
    }

    pub fn measure(
        &mut self,
        truth: &Truth,
        time_us: u64,
        cfg: &SensorConfig,
        noise: &mut NoiseSource,
    ) -> GnssSample {
        self.last_sample_us = Some(time_us);
        let ned = truth.position + noise.vector(cfg.gnss_position_noise_std);
        let (lat_deg, lon_deg, alt_m) = self.home.ned_to_geodetic(&ned);
        GnssSample {
            time_us,
            lat_deg,
            lon_deg,
            alt_m,
            velocity_ned: truth.velocity + noise.vector(cfg.gnss_velocity_noise_std),
            horizontal_accuracy: self.horizontal_accuracy,
            vertical_accuracy: self.vertical_accuracy,
            speed_accuracy: self.speed_accuracy,
        }
    }

    pub(crate) fn restart(&mut self) {
        self.running = true;
        self.last_sample_us = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_zero_scale_is_exact() {
        let mut noise = NoiseSource::new(7, 0.0);
        assert_eq!(noise.vector(1.0), Vector3r::zeros());
    }

    #[test]
    fn test_noise_is_seeded() {
        let mut a = NoiseSource::new(3, 1.0);
        let mut b = NoiseSource::new(3, 1.0);
        let va = a.vector(0.5);
        assert_eq!(va, b.vector(0.5));
        assert!(va.norm() > 0.0);
    }

    #[test]
    fn test_level_imu_sees_gravity() {
        let mut noise = NoiseSource::new(0, 0.0);
        let imu = measure_imu(&Truth::default(), 10, &SensorConfig::default(), &mut noise);
        assert_abs_diff_eq!(imu.accel, Vector3r::new(0.0, 0.0, -GRAVITY), epsilon = 1e-12);
        assert_eq!(imu.gyro, Vector3r::zeros());
    }

    #[test]
    fn test_local_frame_vio_rotates_into_vision_frame() {
        let mut vio = Vio::default();
        vio.set_frame_yaw(std::f64::consts::FRAC_PI_2);
        let truth = Truth {
            velocity: Vector3r::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        let mut noise = NoiseSource::new(0, 0.0);
        let sample = vio.measure(&truth, 0, &SensorConfig::default(), &mut noise);

        let v = sample.velocity.unwrap();
        assert_abs_diff_eq!(v, Vector3r::new(0.0, -1.0, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(vio.to_nav(&v), truth.velocity, epsilon = 1e-12);
        let (_, _, yaw) = sample.orientation.unwrap().euler_angles();
        assert_abs_diff_eq!(yaw, -std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_gnss_round_trips_through_home() {
        let mut gnss = Gnss::default();
        let truth = Truth {
            position: Vector3r::new(5.0, -3.0, -2.0),
            ..Default::default()
        };
        let mut noise = NoiseSource::new(0, 0.0);
        let sample = gnss.measure(&truth, 0, &SensorConfig::default(), &mut noise);
        let ned = gnss.home.geodetic_to_ned(sample.lat_deg, sample.lon_deg, sample.alt_m);
        assert_abs_diff_eq!(ned, truth.position, epsilon = 1e-6);
    }
}

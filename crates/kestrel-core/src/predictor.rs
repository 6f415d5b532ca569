use tracing::{debug, info};

use crate::config::EkfConfig;
use crate::ekf::Ekf;
use crate::fusion::{block_jacobian, Prediction};
use crate::math::{
    skew_symmetric, tilt_from_specific_force, Matrix3r, Scalar, UnitQuaternionr, Vector3r, GRAVITY,
};
use crate::state::{idx, ErrorCovariance, ErrorVector, NominalState, StateStore};
use crate::status::FilterStatus;

/// Gate of the no-aiding position hold. Its innovation is the drift since
/// aiding stopped, so it is only a guard against non-finite values.
const NO_AID_GATE: Scalar = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub time_us: u64,
    /// Angular rate, body frame (rad/s).
    pub gyro: Vector3r,
    /// Specific force, body frame (m/s^2).
    pub accel: Vector3r,
}

// ---------------------------------------------------------------------------
// TILT ALIGNMENT
// ---------------------------------------------------------------------------
/// Averages accelerometer samples to level the attitude before the filter
/// starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltAligner {
    accel_sum: Vector3r,
    samples: u32,
    start_us: Option<u64>,
}

impl Default for TiltAligner {
    fn default() -> Self {
        Self::new()
    }
}

impl TiltAligner {
    pub fn new() -> Self {
        Self {
            accel_sum: Vector3r::zeros(),
            samples: 0,
            start_us: None,
        }
    }

    pub fn accumulate(&mut self, sample: &ImuSample) {
        self.start_us.get_or_insert(sample.time_us);
        self.accel_sum += sample.accel;
        self.samples += 1;
    }

    pub fn elapsed_us(&self, now_us: u64) -> u64 {
        self.start_us.map_or(0, |start| now_us.saturating_sub(start))
    }

    /// Attitude levelled from the mean specific force, with the given yaw.
    pub fn attitude(&self, yaw: Scalar) -> Option<UnitQuaternionr> {
        if self.samples == 0 {
            return None;
        }
        let mean = self.accel_sum / self.samples as Scalar;
        if mean.norm() < 0.5 * GRAVITY {
            return None;
        }
        let (roll, pitch) = tilt_from_specific_force(&mean);
        Some(UnitQuaternionr::from_euler_angles(roll, pitch, yaw))
    }
}

// ---------------------------------------------------------------------------
// PROPAGATION
// ---------------------------------------------------------------------------
impl StateStore {
    /// Strapdown integration of one inertial interval and first-order
    /// covariance propagation.
    pub fn propagate(&mut self, gyro: &Vector3r, accel: &Vector3r, dt: Scalar, cfg: &EkfConfig) {
        let w_unbiased = gyro - self.nominal.gyro_bias;
        let a_unbiased = accel - self.nominal.accel_bias;
        let rot = self.nominal.orientation.to_rotation_matrix().into_inner();
        let a_ned = rot * a_unbiased + Vector3r::new(0.0, 0.0, GRAVITY);

        self.nominal.position += self.nominal.velocity * dt + 0.5 * a_ned * dt * dt;
        self.nominal.velocity += a_ned * dt;
        self.nominal.orientation *= UnitQuaternionr::from_scaled_axis(w_unbiased * dt);
        self.nominal.orientation.renormalize();

        self.propagate_cov(dt, &a_unbiased, &w_unbiased, &rot, cfg);
    }

    fn propagate_cov(
        &mut self,
        dt: Scalar,
        a_unbiased: &Vector3r,
        w_unbiased: &Vector3r,
        rot_mat: &Matrix3r,
        cfg: &EkfConfig,
    ) {
        let mut f = ErrorCovariance::identity();

        let att_att = Matrix3r::identity() - skew_symmetric(*w_unbiased) * dt;
        f.fixed_view_mut::<3, 3>(idx::THETA, idx::THETA)
            .copy_from(&att_att);
        f.fixed_view_mut::<3, 3>(idx::THETA, idx::GYRO_BIAS)
            .fill_diagonal(-dt);

        let vel_att = -(rot_mat * skew_symmetric(*a_unbiased)) * dt;
        f.fixed_view_mut::<3, 3>(idx::VEL, idx::THETA)
            .copy_from(&vel_att);
        f.fixed_view_mut::<3, 3>(idx::VEL, idx::ACCEL_BIAS)
            .copy_from(&(-rot_mat * dt));

        f.fixed_view_mut::<3, 3>(idx::POS, idx::VEL)
            .fill_diagonal(dt);

        let mut q = ErrorVector::zeros();
        q.fixed_rows_mut::<3>(idx::THETA)
            .fill(cfg.gyro_noise_density.powi(2) * dt);
        q.fixed_rows_mut::<3>(idx::VEL)
            .fill(cfg.accel_noise_density.powi(2) * dt);
        q.fixed_rows_mut::<3>(idx::GYRO_BIAS)
            .fill(cfg.gyro_bias_instability.powi(2) * dt);
        q.fixed_rows_mut::<3>(idx::ACCEL_BIAS)
            .fill(cfg.accel_bias_instability.powi(2) * dt);
        q.fixed_rows_mut::<3>(idx::ALIGNMENT)
            .fill(cfg.alignment_random_walk.powi(2) * dt);
        q.fixed_rows_mut::<3>(idx::EV_POS_BIAS)
            .fill(cfg.ev_position_bias_random_walk.powi(2) * dt);
        let q = q.component_mul(&self.active.mask());

        self.covariance.p =
            f * self.covariance.p * f.transpose() + ErrorCovariance::from_diagonal(&q);
        self.covariance.constrain(self.active);
    }
}

// ---------------------------------------------------------------------------
// PREDICT
// ---------------------------------------------------------------------------
impl Ekf {
    /// Runs once per inertial sample.
    pub fn predict(&mut self, imu: &ImuSample) -> FilterStatus {
        if !self.tilt_aligned {
            self.time_us = Some(imu.time_us);
            self.tilt.accumulate(imu);
            if self.tilt.elapsed_us(imu.time_us) < self.config.tilt_align_duration_us {
                return FilterStatus::Aligning;
            }
            match self.tilt.attitude(self.config.initial_yaw) {
                Some(attitude) => {
                    self.store.nominal.orientation = attitude;
                    self.tilt_aligned = true;
                    let (roll, pitch, yaw) = attitude.euler_angles();
                    info!(
                        time_us = imu.time_us,
                        roll_deg = roll.to_degrees(),
                        pitch_deg = pitch.to_degrees(),
                        yaw_deg = yaw.to_degrees(),
                        "tilt alignment complete"
                    );
                }
                None => debug!("tilt alignment waiting for a usable gravity vector"),
            }
            return FilterStatus::Aligning;
        }

        let dt = match self.time_us {
            Some(last) => imu.time_us.saturating_sub(last) as Scalar * 1e-6,
            None => 0.0,
        };
        self.time_us = Some(imu.time_us);

        if dt < 1e-6 {
            return FilterStatus::SkippedSmallDt;
        }

        self.store.propagate(&imu.gyro, &imu.accel, dt, &self.config);
        self.expire_channels(imu.time_us);
        self.hold_position_without_aiding(imu.time_us);

        FilterStatus::Updated
    }

    /// While nothing constrains velocity or position, fuse the last known
    /// position with a large variance at a low rate so the covariance stays
    /// bounded.
    fn hold_position_without_aiding(&mut self, now_us: u64) {
        if self.is_aiding() {
            self.last_no_aid_fusion_us = None;
            self.last_known_position = self.store.nominal.position;
            return;
        }

        let due = self.last_no_aid_fusion_us.map_or(true, |last| {
            now_us.saturating_sub(last) >= self.config.no_aid_fusion_interval_us
        });
        if !due {
            return;
        }
        self.last_no_aid_fusion_us = Some(now_us);

        let noise = Matrix3r::identity() * self.config.no_aid_position_noise.powi(2);
        let held = self.last_known_position;
        let outcome = self.store.fuse(
            &held,
            |s: &NominalState| {
                Some(Prediction {
                    value: s.position,
                    jacobian: block_jacobian::<3>(&[idx::POS]),
                })
            },
            &noise,
            NO_AID_GATE,
            false,
        );
        if outcome.status != FilterStatus::Updated {
            debug!(status = ?outcome.status, "position hold not applied");
        }
    }
}

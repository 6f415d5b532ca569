//! Vision-to-navigation frame alignment.
//!
//! The alignment is a rotation `R_nv` folded into the state. Its error is a
//! navigation-frame rotation, `R_nv_true = Exp(da) * R_nv`, so for a vector
//! `w` expressed in navigation coordinates the vision-frame observation
//! `R_nv^T w` has Jacobian `R_nv^T [w]x` with respect to `da`.

use tracing::info;

use crate::config::VisionControl;
use crate::ekf::Ekf;
use crate::math::{heading_of, skew_symmetric, wrap_pi, Matrix3r, Scalar, UnitQuaternionr, Vector3r};
use crate::state::{idx, ActiveStates, StateStore};

impl StateStore {
    /// Starts estimating the alignment from its current value, identity after
    /// initialization.
    pub fn activate_alignment(&mut self, tilt_variance: Scalar, yaw_variance: Scalar) {
        self.active |= ActiveStates::ALIGNMENT;
        let block = Matrix3r::from_diagonal(&Vector3r::new(tilt_variance, tilt_variance, yaw_variance));
        self.covariance.reset_block(idx::ALIGNMENT, &block);
        self.covariance.constrain(self.active);
    }

    /// Freezes the current alignment estimate.
    pub fn deactivate_alignment(&mut self) {
        self.active.remove(ActiveStates::ALIGNMENT);
        self.covariance.clear_block(idx::ALIGNMENT);
    }

    pub fn activate_ev_position_bias(&mut self, variance: Scalar) {
        self.active |= ActiveStates::EV_POS_BIAS;
        self.covariance
            .reset_block(idx::EV_POS_BIAS, &(Matrix3r::identity() * variance));
        self.covariance.constrain(self.active);
    }

    pub fn deactivate_ev_position_bias(&mut self) {
        self.active.remove(ActiveStates::EV_POS_BIAS);
        self.covariance.clear_block(idx::EV_POS_BIAS);
    }

    /// Rotates the alignment about the down axis so that its heading becomes
    /// `yaw`, keeping its tilt, and sets the yaw variance.
    pub fn seed_alignment_yaw(&mut self, yaw: Scalar, yaw_variance: Scalar) {
        let current = heading_of(&self.alignment_matrix());
        let correction = UnitQuaternionr::from_euler_angles(0.0, 0.0, wrap_pi(yaw - current));
        self.nominal.ev_alignment = correction * self.nominal.ev_alignment;

        let tilt = self.covariance.variance3(idx::ALIGNMENT);
        let block = Matrix3r::from_diagonal(&Vector3r::new(tilt.x, tilt.y, yaw_variance));
        self.covariance.reset_block(idx::ALIGNMENT, &block);
        self.covariance.constrain(self.active);
    }

    pub fn alignment_matrix(&self) -> Matrix3r {
        self.nominal.ev_alignment.to_rotation_matrix().into_inner()
    }
}

/// Jacobians of `R_nv^T w` with respect to `w` and to the alignment error.
pub fn vision_frame_jacobians(r_nv: &Matrix3r, w: &Vector3r) -> (Matrix3r, Matrix3r) {
    let r_vn = r_nv.transpose();
    (r_vn, r_vn * skew_symmetric(*w))
}

/// Expresses a vision-frame vector and its per-axis variance in the
/// navigation frame through a fixed rotation.
pub fn rotate_into_nav(r_nv: &Matrix3r, value: &Vector3r, variance: &Vector3r) -> (Vector3r, Matrix3r) {
    let cov = r_nv * Matrix3r::from_diagonal(variance) * r_nv.transpose();
    (r_nv * value, (cov + cov.transpose()) * 0.5)
}

impl Ekf {
    /// Activates or freezes the vision-owned states after a change of the
    /// vision control flags.
    pub(crate) fn apply_vision_state_control(&mut self, previous: VisionControl) {
        let current = self.config.vision;
        let toggled = previous ^ current;

        if toggled.contains(VisionControl::ALIGNMENT) {
            if current.contains(VisionControl::ALIGNMENT) {
                self.store.activate_alignment(
                    self.config.alignment_initial_tilt_variance,
                    self.config.alignment_initial_yaw_variance,
                );
                info!(
                    yaw_sigma_deg = self.config.alignment_initial_yaw_variance.sqrt().to_degrees(),
                    "vision alignment estimation started"
                );
            } else {
                self.store.deactivate_alignment();
                let (_, _, yaw) = self.store.nominal.ev_alignment.euler_angles();
                info!(yaw_deg = yaw.to_degrees(), "vision alignment frozen");
            }
        }

        if toggled.contains(VisionControl::POSITION_BIAS) {
            if current.contains(VisionControl::POSITION_BIAS) {
                self.store
                    .activate_ev_position_bias(self.config.ev_position_bias_initial_variance);
                info!("vision position bias estimation started");
            } else {
                self.store.deactivate_ev_position_bias();
                info!(bias = ?self.store.nominal.ev_position_bias, "vision position bias frozen");
            }
        }
    }

    /// Current vision-to-navigation rotation estimate.
    pub fn vision_alignment(&self) -> UnitQuaternionr {
        self.store.nominal.ev_alignment
    }

    pub fn alignment_is_active(&self) -> bool {
        self.store.active.contains(ActiveStates::ALIGNMENT)
    }

    pub fn alignment_yaw_variance(&self) -> Scalar {
        self.store.covariance.variance(idx::ALIGNMENT + 2)
    }

    /// Alignment yaw is known well enough to rotate local-frame samples.
    pub fn alignment_is_settled(&self) -> bool {
        self.alignment_is_active()
            && self.alignment_yaw_variance() < self.config.alignment_settled_variance
    }
}

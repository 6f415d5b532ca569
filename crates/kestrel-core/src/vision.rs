use nalgebra::{Matrix1, SMatrix, Vector1};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alignment::{rotate_into_nav, vision_frame_jacobians};
use crate::ekf::Ekf;
use crate::fusion::{block_jacobian, Prediction};
use crate::math::{heading_gradient, heading_of, Matrix3r, Scalar, UnitQuaternionr, Vector3r};
use crate::reset::{ResetCause, ResetQuantity, ResetTarget};
use crate::state::{idx, NominalState, STATE_DIM};
use crate::status::{Channel, FilterStatus};

/// Frame a vision sample is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceFrame {
    /// Already in the navigation (NED) frame.
    Navigation,
    /// The vision system's own frame, related to navigation by the alignment.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VisionMeasurement {
    Position { value: Vector3r, variance: Vector3r },
    Velocity { value: Vector3r, variance: Vector3r },
    Heading { angle: Scalar, variance: Scalar },
}

impl VisionMeasurement {
    pub fn channel(&self) -> Channel {
        match self {
            VisionMeasurement::Position { .. } => Channel::EvPosition,
            VisionMeasurement::Velocity { .. } => Channel::EvVelocity,
            VisionMeasurement::Heading { .. } => Channel::EvHeading,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionObservation {
    pub time_us: u64,
    pub frame: ReferenceFrame,
    pub measurement: VisionMeasurement,
}

/// One sample from a visual odometry system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtVisionSample {
    pub time_us: u64,
    pub frame: ReferenceFrame,
    pub position: Option<Vector3r>,
    pub position_variance: Vector3r,
    pub velocity: Option<Vector3r>,
    pub velocity_variance: Vector3r,
    /// Body attitude in the sample frame.
    pub orientation: Option<UnitQuaternionr>,
    pub heading_variance: Scalar,
}

impl ExtVisionSample {
    pub fn new(time_us: u64, frame: ReferenceFrame) -> Self {
        Self {
            time_us,
            frame,
            position: None,
            position_variance: Vector3r::repeat(0.01),
            velocity: None,
            velocity_variance: Vector3r::repeat(0.01),
            orientation: None,
            heading_variance: 0.0025,
        }
    }

    /// Observations carried by the sample, heading first so that the
    /// alignment is corrected before vectors are rotated through it.
    pub fn observations(&self) -> impl Iterator<Item = VisionObservation> {
        let heading = self.orientation.map(|q| VisionMeasurement::Heading {
            angle: heading_of(&q.to_rotation_matrix().into_inner()),
            variance: self.heading_variance,
        });
        let velocity = self.velocity.map(|value| VisionMeasurement::Velocity {
            value,
            variance: self.velocity_variance,
        });
        let position = self.position.map(|value| VisionMeasurement::Position {
            value,
            variance: self.position_variance,
        });

        let (time_us, frame) = (self.time_us, self.frame);
        [heading, velocity, position]
            .into_iter()
            .flatten()
            .map(move |measurement| VisionObservation {
                time_us,
                frame,
                measurement,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionFusionReport {
    pub heading: FilterStatus,
    pub velocity: FilterStatus,
    pub position: FilterStatus,
}

impl Default for VisionFusionReport {
    fn default() -> Self {
        Self {
            heading: FilterStatus::Inactive,
            velocity: FilterStatus::Inactive,
            position: FilterStatus::Inactive,
        }
    }
}

// ---------------------------------------------------------------------------
// MEASUREMENT MODELS
// ---------------------------------------------------------------------------
fn observed_vector(quantity: ResetQuantity, s: &NominalState) -> Vector3r {
    match quantity {
        ResetQuantity::Velocity => s.velocity,
        ResetQuantity::Position => s.position + s.ev_position_bias,
    }
}

fn vector_jacobian_starts(quantity: ResetQuantity) -> &'static [usize] {
    match quantity {
        ResetQuantity::Velocity => &[idx::VEL],
        ResetQuantity::Position => &[idx::POS, idx::EV_POS_BIAS],
    }
}

fn nav_vector_prediction(quantity: ResetQuantity, s: &NominalState) -> Prediction<3> {
    Prediction {
        value: observed_vector(quantity, s),
        jacobian: block_jacobian::<3>(vector_jacobian_starts(quantity)),
    }
}

/// Vision-frame prediction `R_nv^T w` with the alignment folded in.
fn local_vector_prediction(quantity: ResetQuantity, s: &NominalState) -> Prediction<3> {
    let r_nv = s.ev_alignment.to_rotation_matrix().into_inner();
    let w = observed_vector(quantity, s);
    let (h_w, h_align) = vision_frame_jacobians(&r_nv, &w);

    let mut jacobian = SMatrix::<Scalar, 3, STATE_DIM>::zeros();
    for &start in vector_jacobian_starts(quantity) {
        jacobian.fixed_view_mut::<3, 3>(0, start).copy_from(&h_w);
    }
    jacobian
        .fixed_view_mut::<3, 3>(0, idx::ALIGNMENT)
        .copy_from(&h_align);

    Prediction {
        value: r_nv.transpose() * w,
        jacobian,
    }
}

/// Heading of the body as seen from `frame`.
fn heading_prediction(frame: ReferenceFrame, s: &NominalState) -> Option<Prediction<1>> {
    let r_nb = s.orientation.to_rotation_matrix().into_inner();
    let r_nv = match frame {
        ReferenceFrame::Navigation => Matrix3r::identity(),
        ReferenceFrame::Local => s.ev_alignment.to_rotation_matrix().into_inner(),
    };
    let m = r_nv.transpose() * r_nb;
    let g = heading_gradient(&m)?;

    let mut jacobian = SMatrix::<Scalar, 1, STATE_DIM>::zeros();
    jacobian
        .fixed_view_mut::<1, 3>(0, idx::THETA)
        .copy_from(&(g * m));
    if frame == ReferenceFrame::Local {
        jacobian
            .fixed_view_mut::<1, 3>(0, idx::ALIGNMENT)
            .copy_from(&(-g * r_nv.transpose()));
    }

    Some(Prediction {
        value: Vector1::new(heading_of(&m)),
        jacobian,
    })
}

// ---------------------------------------------------------------------------
// ADAPTER
// ---------------------------------------------------------------------------
impl Ekf {
    pub fn fuse_ext_vision(&mut self, sample: &ExtVisionSample) -> VisionFusionReport {
        self.seed_alignment_from_attitude(sample);

        let mut report = VisionFusionReport::default();
        for obs in sample.observations() {
            let status = self.fuse_vision_observation(&obs);
            match obs.measurement.channel() {
                Channel::EvHeading => report.heading = status,
                Channel::EvVelocity => report.velocity = status,
                _ => report.position = status,
            }
        }
        report
    }

    /// The first local-frame vector resets through the alignment. Without
    /// heading fusion, take the alignment heading from the sample attitude
    /// (`R_nb R_vb^T`) when such a reset is pending.
    fn seed_alignment_from_attitude(&mut self, sample: &ExtVisionSample) {
        if sample.frame != ReferenceFrame::Local
            || !self.alignment_is_active()
            || self.is_intending(Channel::EvHeading)
        {
            return;
        }
        let Some(attitude) = sample.orientation else {
            return;
        };

        let vectors = [
            (sample.velocity.is_some(), Channel::EvVelocity, ResetQuantity::Velocity),
            (sample.position.is_some(), Channel::EvPosition, ResetQuantity::Position),
        ];
        let max_delay = self.config.max_measurement_delay_us;
        let initializing = vectors.iter().any(|&(present, channel, quantity)| {
            present
                && self.is_intending(channel)
                && !self.channels[channel.index()].is_stale(sample.time_us, self.time_us, max_delay)
                && !quantity
                    .classes()
                    .iter()
                    .all(|&class| self.resets.is_initialized(class))
        });
        if !initializing {
            return;
        }

        let r_nb = self.store.nominal.orientation.to_rotation_matrix().into_inner();
        let r_vb = attitude.to_rotation_matrix().into_inner();
        let yaw = heading_of(&(r_nb * r_vb.transpose()));
        let variance = self.config.ev_heading_variance.unwrap_or(sample.heading_variance)
            + self.store.covariance.variance(idx::THETA + 2);
        self.store.seed_alignment_yaw(yaw, variance);
        info!(yaw_deg = yaw.to_degrees(), "vision alignment seeded from sample attitude");
    }

    pub fn fuse_vision_observation(&mut self, obs: &VisionObservation) -> FilterStatus {
        let channel = obs.measurement.channel();
        if !self.is_intending(channel) {
            return FilterStatus::Inactive;
        }

        let max_delay = self.config.max_measurement_delay_us;
        if self.channels[channel.index()].is_stale(obs.time_us, self.time_us, max_delay) {
            debug!(channel = channel.label(), time_us = obs.time_us, "stale sample dropped");
            return FilterStatus::SkippedOutdated;
        }
        self.channels[channel.index()].last_sample_us = Some(obs.time_us);

        match obs.measurement {
            VisionMeasurement::Heading { angle, variance } => {
                self.fuse_vision_heading(obs.frame, angle, variance, obs.time_us)
            }
            VisionMeasurement::Velocity { value, variance }
            | VisionMeasurement::Position { value, variance } => {
                self.fuse_vision_vector(channel, obs.frame, &value, &variance, obs.time_us)
            }
        }
    }

    fn fuse_vision_heading(
        &mut self,
        frame: ReferenceFrame,
        angle: Scalar,
        sample_variance: Scalar,
        time_us: u64,
    ) -> FilterStatus {
        let variance = self.config.ev_heading_variance.unwrap_or(sample_variance);
        let outcome = self.store.fuse(
            &Vector1::new(angle),
            |s| heading_prediction(frame, s),
            &Matrix1::new(variance),
            self.config.ev_heading_gate,
            true,
        );
        self.conclude_fusion(Channel::EvHeading, &outcome, time_us, None)
    }

    fn fuse_vision_vector(
        &mut self,
        channel: Channel,
        frame: ReferenceFrame,
        value: &Vector3r,
        sample_variance: &Vector3r,
        time_us: u64,
    ) -> FilterStatus {
        let (quantity, variance_override, gate) = match channel {
            Channel::EvVelocity => (
                ResetQuantity::Velocity,
                self.config.ev_velocity_variance,
                self.config.ev_velocity_gate,
            ),
            _ => (
                ResetQuantity::Position,
                self.config.ev_position_variance,
                self.config.ev_position_gate,
            ),
        };
        let variance = variance_override.map_or(*sample_variance, Vector3r::repeat);
        let folded = frame == ReferenceFrame::Local && self.alignment_is_active();

        let (nav_value, nav_cov) = match frame {
            ReferenceFrame::Navigation => (*value, Matrix3r::from_diagonal(&variance)),
            ReferenceFrame::Local => rotate_into_nav(&self.store.alignment_matrix(), value, &variance),
        };
        let target = ResetTarget {
            quantity,
            value: match quantity {
                ResetQuantity::Velocity => nav_value,
                ResetQuantity::Position => nav_value - self.store.nominal.ev_position_bias,
            },
            covariance: nav_cov,
        };

        let initialized = quantity
            .classes()
            .iter()
            .all(|&class| self.resets.is_initialized(class));
        if !initialized {
            if folded && self.is_intending(Channel::EvHeading) && !self.alignment_is_settled() {
                debug!(channel = channel.label(), "initialization deferred until alignment settles");
                return FilterStatus::Deferred;
            }
            self.reset_to(&target, time_us, ResetCause::Initialization);
            self.channels[channel.index()].mark_fused(time_us);
            return FilterStatus::Reset;
        }

        let outcome = if folded {
            self.store.fuse(
                value,
                |s| Some(local_vector_prediction(quantity, s)),
                &Matrix3r::from_diagonal(&variance),
                gate,
                false,
            )
        } else {
            self.store.fuse(
                &nav_value,
                |s| Some(nav_vector_prediction(quantity, s)),
                &nav_cov,
                gate,
                false,
            )
        };
        self.conclude_fusion(channel, &outcome, time_us, Some(&target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EkfConfig, VisionControl};
    use crate::ekf::test_support::{aligned_ekf, run_imu};
    use crate::math::{skew_symmetric, wrap_pi};
    use crate::reset::AxisClass;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_observations_heading_first() {
        let mut sample = ExtVisionSample::new(10, ReferenceFrame::Local);
        sample.position = Some(Vector3r::new(1.0, 2.0, 3.0));
        sample.velocity = Some(Vector3r::zeros());
        sample.orientation = Some(UnitQuaternionr::from_euler_angles(0.0, 0.0, 0.7));

        let channels: Vec<Channel> = sample.observations().map(|o| o.measurement.channel()).collect();
        assert_eq!(channels, vec![Channel::EvHeading, Channel::EvVelocity, Channel::EvPosition]);

        match sample.observations().next().map(|o| o.measurement) {
            Some(VisionMeasurement::Heading { angle, .. }) => assert_abs_diff_eq!(angle, 0.7, epsilon = 1e-12),
            other => panic!("unexpected first observation {other:?}"),
        }
    }

    #[test]
    fn test_heading_jacobian_matches_finite_difference() {
        let mut s = NominalState::new();
        s.orientation = UnitQuaternionr::from_euler_angles(0.1, -0.05, 0.4);
        s.ev_alignment = UnitQuaternionr::from_euler_angles(0.01, 0.02, -1.2);
        let base = heading_prediction(ReferenceFrame::Local, &s).unwrap();

        let eps = 1e-7;
        for (start, right) in [(idx::THETA, true), (idx::ALIGNMENT, false)] {
            for axis in 0..3 {
                let mut d = Vector3r::zeros();
                d[axis] = eps;
                let mut p = s;
                let dq = UnitQuaternionr::from_scaled_axis(d);
                if right {
                    p.orientation = s.orientation * dq;
                } else {
                    p.ev_alignment = dq * s.ev_alignment;
                }
                let moved = heading_prediction(ReferenceFrame::Local, &p).unwrap();
                let numeric = wrap_pi(moved.value[0] - base.value[0]) / eps;
                assert_abs_diff_eq!(numeric, base.jacobian[(0, start + axis)], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_local_position_jacobian_includes_bias() {
        let mut s = NominalState::new();
        s.position = Vector3r::new(1.0, 2.0, -0.5);
        s.ev_position_bias = Vector3r::new(0.1, 0.0, 0.0);
        s.ev_alignment = UnitQuaternionr::from_euler_angles(0.0, 0.0, 0.5);
        let pred = local_vector_prediction(ResetQuantity::Position, &s);

        let r_nv = s.ev_alignment.to_rotation_matrix().into_inner();
        let w = s.position + s.ev_position_bias;
        assert_abs_diff_eq!(pred.value, r_nv.transpose() * w, epsilon = 1e-12);
        assert_abs_diff_eq!(
            pred.jacobian.fixed_view::<3, 3>(0, idx::EV_POS_BIAS).into_owned(),
            r_nv.transpose(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            pred.jacobian.fixed_view::<3, 3>(0, idx::ALIGNMENT).into_owned(),
            r_nv.transpose() * skew_symmetric(w),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_first_sample_resets_then_fuses() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::VELOCITY,
            ..Default::default()
        });
        let t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Navigation);
        sample.velocity = Some(Vector3r::new(0.3, -1.0, 0.4));

        let report = ekf.fuse_ext_vision(&sample);
        assert_eq!(report.velocity, FilterStatus::Reset);
        assert_eq!(report.position, FilterStatus::Inactive);
        assert_eq!(ekf.velocity(), Vector3r::new(0.3, -1.0, 0.4));
        assert_eq!(ekf.velocity_variance(), Vector3r::repeat(0.01));
        assert_eq!(ekf.reset_log().counter(AxisClass::HorizontalVelocity), 1);

        let t = run_imu(&mut ekf, t, 5);
        sample.time_us = t;
        let report = ekf.fuse_ext_vision(&sample);
        assert_eq!(report.velocity, FilterStatus::Updated);
        assert_eq!(ekf.reset_log().counter(AxisClass::HorizontalVelocity), 1);
        assert!(ekf.is_fusing(Channel::EvVelocity));
    }

    #[test]
    fn test_stale_sample_changes_nothing() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::POSITION,
            ..Default::default()
        });
        let t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Navigation);
        sample.position = Some(Vector3r::new(1.0, 0.0, 0.0));
        assert_eq!(ekf.fuse_ext_vision(&sample).position, FilterStatus::Reset);

        let state = *ekf.state();
        let cov = *ekf.covariance();
        let log = *ekf.reset_log();
        sample.position = Some(Vector3r::new(50.0, 0.0, 0.0));
        assert_eq!(ekf.fuse_ext_vision(&sample).position, FilterStatus::SkippedOutdated);
        assert_eq!(*ekf.state(), state);
        assert_eq!(*ekf.covariance(), cov);
        assert_eq!(*ekf.reset_log(), log);
    }

    #[test]
    fn test_local_initialization_waits_for_alignment() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::VELOCITY | VisionControl::HEADING | VisionControl::ALIGNMENT,
            ..Default::default()
        });
        let t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Local);
        sample.velocity = Some(Vector3r::new(1.0, 0.0, 0.0));

        // No attitude in the sample: alignment cannot settle.
        assert_eq!(ekf.fuse_ext_vision(&sample).velocity, FilterStatus::Deferred);
        assert_eq!(ekf.reset_log().counter(AxisClass::HorizontalVelocity), 0);

        let t = run_imu(&mut ekf, t, 5);
        sample.time_us = t;
        sample.orientation = Some(UnitQuaternionr::from_euler_angles(0.0, 0.0, 0.5));
        let report = ekf.fuse_ext_vision(&sample);
        assert_eq!(report.heading, FilterStatus::Updated);
        assert_eq!(report.velocity, FilterStatus::Reset);
        assert!(ekf.alignment_is_settled());
        assert_eq!(ekf.reset_log().counter(AxisClass::HorizontalVelocity), 1);
    }

    #[test]
    fn test_divergence_reset_after_sustained_rejection() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::VELOCITY,
            divergence_rejection_limit: 5,
            ..Default::default()
        });
        let mut t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Navigation);
        sample.velocity = Some(Vector3r::zeros());
        assert_eq!(ekf.fuse_ext_vision(&sample).velocity, FilterStatus::Reset);

        sample.velocity = Some(Vector3r::new(5.0, 0.0, 0.0));
        let mut statuses = Vec::new();
        for _ in 0..5 {
            t = run_imu(&mut ekf, t, 5);
            sample.time_us = t;
            statuses.push(ekf.fuse_ext_vision(&sample).velocity);
        }

        assert!(statuses[..4]
            .iter()
            .all(|s| matches!(s, FilterStatus::RejectedInnovation(_))));
        assert_eq!(statuses[4], FilterStatus::Reset);
        assert_eq!(ekf.reset_log().counter(AxisClass::HorizontalVelocity), 2);
        assert_abs_diff_eq!(ekf.velocity(), Vector3r::new(5.0, 0.0, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(ekf.reset_log().velocity_delta().x, 5.0, epsilon = 1e-9);

        t = run_imu(&mut ekf, t, 5);
        sample.time_us = t;
        assert_eq!(ekf.fuse_ext_vision(&sample).velocity, FilterStatus::Updated);
        assert_eq!(ekf.reset_log().counter(AxisClass::HorizontalVelocity), 2);
    }

    #[test]
    fn test_alignment_seeded_from_attitude_before_reset() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::VELOCITY | VisionControl::ALIGNMENT,
            ..Default::default()
        });
        assert!(!ekf.is_intending(Channel::EvHeading));
        let t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Local);
        sample.velocity = Some(Vector3r::new(1.0, 0.0, 0.0));
        sample.orientation = Some(UnitQuaternionr::from_euler_angles(0.0, 0.0, -0.8));

        let report = ekf.fuse_ext_vision(&sample);
        assert_eq!(report.heading, FilterStatus::Inactive);
        assert_eq!(report.velocity, FilterStatus::Reset);
        assert_abs_diff_eq!(ekf.vision_alignment().euler_angles().2, 0.8, epsilon = 1e-9);
        assert_abs_diff_eq!(ekf.velocity(), Vector3r::new(0.8f64.cos(), 0.8f64.sin(), 0.0), epsilon = 1e-9);
        assert!(ekf.alignment_yaw_variance() < ekf.config().alignment_initial_yaw_variance);

        // Initialized: later attitudes no longer move the alignment directly.
        let t = run_imu(&mut ekf, t, 5);
        sample.time_us = t;
        sample.orientation = Some(UnitQuaternionr::from_euler_angles(0.0, 0.0, 0.4));
        ekf.fuse_ext_vision(&sample);
        assert_abs_diff_eq!(ekf.vision_alignment().euler_angles().2, 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_alignment_not_seeded_without_attitude() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::VELOCITY | VisionControl::ALIGNMENT,
            ..Default::default()
        });
        let t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Local);
        sample.velocity = Some(Vector3r::new(1.0, 0.0, 0.0));

        assert_eq!(ekf.fuse_ext_vision(&sample).velocity, FilterStatus::Reset);
        assert_eq!(ekf.vision_alignment(), UnitQuaternionr::identity());
        assert_eq!(ekf.velocity(), Vector3r::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_singular_innovation_marks_channel_unhealthy() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::VELOCITY,
            ..Default::default()
        });
        let t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Navigation);
        sample.velocity = Some(Vector3r::zeros());
        sample.velocity_variance = Vector3r::zeros();
        assert_eq!(ekf.fuse_ext_vision(&sample).velocity, FilterStatus::Reset);
        assert_eq!(ekf.velocity_variance(), Vector3r::zeros());

        // No propagation in between: both covariance and noise are zero.
        sample.time_us = t + 1;
        assert_eq!(ekf.fuse_ext_vision(&sample).velocity, FilterStatus::SingularMatrix);
        assert!(!ekf.channel_status(Channel::EvVelocity).numerically_healthy);
        assert_eq!(ekf.velocity(), Vector3r::zeros());

        sample.time_us = t + 2;
        sample.velocity_variance = Vector3r::repeat(0.01);
        assert_eq!(ekf.fuse_ext_vision(&sample).velocity, FilterStatus::Updated);
        assert!(ekf.channel_status(Channel::EvVelocity).numerically_healthy);
    }

    #[test]
    fn test_heading_not_intended_without_alignment() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::HEADING,
            ..Default::default()
        });
        let t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Local);
        sample.orientation = Some(UnitQuaternionr::identity());
        assert_eq!(ekf.fuse_ext_vision(&sample).heading, FilterStatus::Inactive);
        assert!(!ekf.is_intending(Channel::EvHeading));
    }
}

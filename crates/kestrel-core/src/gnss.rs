use tracing::{debug, info};

use crate::ekf::Ekf;
use crate::fusion::{block_jacobian, Prediction};
use crate::math::{Matrix3r, Scalar, Vector3r};
use crate::reset::{ResetCause, ResetQuantity, ResetTarget};
use crate::state::{idx, NominalState};
use crate::status::{Channel, FilterStatus};

const EARTH_RADIUS: Scalar = 6_371_000.0;

/// Geodetic origin of the local NED frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoReference {
    lat0: Scalar,
    lon0: Scalar,
    alt0: Scalar,
}

impl GeoReference {
    pub fn new(lat_deg: Scalar, lon_deg: Scalar, alt_m: Scalar) -> Self {
        Self {
            lat0: lat_deg.to_radians(),
            lon0: lon_deg.to_radians(),
            alt0: alt_m,
        }
    }

    /// Flat-earth projection around the origin.
    pub fn geodetic_to_ned(&self, lat_deg: Scalar, lon_deg: Scalar, alt_m: Scalar) -> Vector3r {
        let d_lat = lat_deg.to_radians() - self.lat0;
        let d_lon = lon_deg.to_radians() - self.lon0;
        let n = d_lat * EARTH_RADIUS;
        let e = d_lon * EARTH_RADIUS * self.lat0.cos();
        let d = self.alt0 - alt_m;
        Vector3r::new(n, e, d)
    }

    /// Inverse of [`geodetic_to_ned`](Self::geodetic_to_ned): (lat deg, lon deg, alt m).
    pub fn ned_to_geodetic(&self, ned: &Vector3r) -> (Scalar, Scalar, Scalar) {
        let lat = self.lat0 + ned.x / EARTH_RADIUS;
        let lon = self.lon0 + ned.y / (EARTH_RADIUS * self.lat0.cos());
        (lat.to_degrees(), lon.to_degrees(), self.alt0 - ned.z)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GnssSample {
    pub time_us: u64,
    pub lat_deg: Scalar,
    pub lon_deg: Scalar,
    pub alt_m: Scalar,
    pub velocity_ned: Vector3r,
    /// 1-sigma accuracies reported by the receiver.
    pub horizontal_accuracy: Scalar,
    pub vertical_accuracy: Scalar,
    pub speed_accuracy: Scalar,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GnssFusionReport {
    pub position: FilterStatus,
    pub velocity: FilterStatus,
}

fn gnss_position_prediction(s: &NominalState) -> Option<Prediction<3>> {
    Some(Prediction {
        value: s.position,
        jacobian: block_jacobian::<3>(&[idx::POS]),
    })
}

fn gnss_velocity_prediction(s: &NominalState) -> Option<Prediction<3>> {
    Some(Prediction {
        value: s.velocity,
        jacobian: block_jacobian::<3>(&[idx::VEL]),
    })
}

impl Ekf {
    pub fn set_home_location(&mut self, lat_deg: Scalar, lon_deg: Scalar, alt_m: Scalar) {
        self.geo_ref = Some(GeoReference::new(lat_deg, lon_deg, alt_m));
        info!(lat_deg, lon_deg, alt_m, "geodetic origin set");
    }

    pub fn geo_reference(&self) -> Option<&GeoReference> {
        self.geo_ref.as_ref()
    }

    pub fn fuse_gnss(&mut self, sample: &GnssSample) -> GnssFusionReport {
        let mut report = GnssFusionReport {
            position: FilterStatus::Inactive,
            velocity: FilterStatus::Inactive,
        };
        if !self.is_intending(Channel::GnssPosition) {
            return report;
        }

        let home = match self.geo_ref {
            Some(home) => home,
            None => {
                let home = GeoReference::new(sample.lat_deg, sample.lon_deg, sample.alt_m);
                self.geo_ref = Some(home);
                info!(lat_deg = sample.lat_deg, lon_deg = sample.lon_deg, "geodetic origin from first fix");
                home
            }
        };

        let h_var = self
            .config
            .gnss_position_variance
            .unwrap_or(sample.horizontal_accuracy.powi(2));
        let v_var = self
            .config
            .gnss_position_variance
            .unwrap_or(sample.vertical_accuracy.powi(2));
        let s_var = self
            .config
            .gnss_velocity_variance
            .unwrap_or(sample.speed_accuracy.powi(2));

        let position = home.geodetic_to_ned(sample.lat_deg, sample.lon_deg, sample.alt_m);
        report.velocity = self.fuse_gnss_vector(
            Channel::GnssVelocity,
            &sample.velocity_ned,
            &Vector3r::repeat(s_var),
            sample.time_us,
        );
        report.position = self.fuse_gnss_vector(
            Channel::GnssPosition,
            &position,
            &Vector3r::new(h_var, h_var, v_var),
            sample.time_us,
        );
        report
    }

    fn fuse_gnss_vector(
        &mut self,
        channel: Channel,
        value: &Vector3r,
        variance: &Vector3r,
        time_us: u64,
    ) -> FilterStatus {
        let max_delay = self.config.max_measurement_delay_us;
        if self.channels[channel.index()].is_stale(time_us, self.time_us, max_delay) {
            debug!(channel = channel.label(), time_us, "stale sample dropped");
            return FilterStatus::SkippedOutdated;
        }
        self.channels[channel.index()].last_sample_us = Some(time_us);

        let (quantity, gate, predict): (_, _, fn(&NominalState) -> Option<Prediction<3>>) =
            match channel {
                Channel::GnssVelocity => (
                    ResetQuantity::Velocity,
                    self.config.gnss_velocity_gate,
                    gnss_velocity_prediction,
                ),
                _ => (
                    ResetQuantity::Position,
                    self.config.gnss_position_gate,
                    gnss_position_prediction,
                ),
            };

        let noise = Matrix3r::from_diagonal(variance);
        let target = ResetTarget {
            quantity,
            value: *value,
            covariance: noise,
        };

        let initialized = quantity
            .classes()
            .iter()
            .all(|&class| self.resets.is_initialized(class));
        if !initialized {
            self.reset_to(&target, time_us, ResetCause::Initialization);
            self.channels[channel.index()].mark_fused(time_us);
            return FilterStatus::Reset;
        }

        let outcome = self.store.fuse(value, predict, &noise, gate, false);
        self.conclude_fusion(channel, &outcome, time_us, Some(&target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EkfConfig;
    use crate::ekf::test_support::{aligned_ekf, run_imu};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_flat_earth_projection() {
        let home = GeoReference::new(47.0, 8.0, 400.0);
        let ned = home.geodetic_to_ned(47.001, 8.0, 390.0);
        assert_abs_diff_eq!(ned.x, 0.001_f64.to_radians() * EARTH_RADIUS, epsilon = 1e-6);
        assert_abs_diff_eq!(ned.y, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(ned.z, 10.0, epsilon = 1e-9);

        let (lat, lon, alt) = home.ned_to_geodetic(&Vector3r::new(12.0, -30.0, 2.0));
        let back = home.geodetic_to_ned(lat, lon, alt);
        assert_abs_diff_eq!(back, Vector3r::new(12.0, -30.0, 2.0), epsilon = 1e-6);
    }

    #[test]
    fn test_gnss_makes_global_position_valid() {
        let mut ekf = aligned_ekf(EkfConfig {
            gnss_fusion: true,
            ..Default::default()
        });
        ekf.set_home_location(47.0, 8.0, 400.0);
        assert!(!ekf.global_position_is_valid());

        let mut t = ekf.time_us().unwrap();
        let mut sample = GnssSample {
            time_us: t,
            lat_deg: 47.0,
            lon_deg: 8.0,
            alt_m: 400.0,
            velocity_ned: Vector3r::zeros(),
            horizontal_accuracy: 0.5,
            vertical_accuracy: 0.8,
            speed_accuracy: 0.1,
        };
        let report = ekf.fuse_gnss(&sample);
        assert_eq!(report.position, FilterStatus::Reset);
        assert_eq!(report.velocity, FilterStatus::Reset);
        assert!(ekf.global_position_is_valid());
        assert!(ekf.local_position_is_valid());

        t = run_imu(&mut ekf, t, 50);
        sample.time_us = t;
        let report = ekf.fuse_gnss(&sample);
        assert_eq!(report.position, FilterStatus::Updated);
        assert!(ekf.position_variance().x < 0.25);
    }

    #[test]
    fn test_gnss_disabled_is_inactive() {
        let mut ekf = aligned_ekf(EkfConfig::default());
        let t = ekf.time_us().unwrap();
        let report = ekf.fuse_gnss(&GnssSample {
            time_us: t,
            lat_deg: 1.0,
            lon_deg: 2.0,
            alt_m: 3.0,
            velocity_ned: Vector3r::zeros(),
            horizontal_accuracy: 1.0,
            vertical_accuracy: 1.0,
            speed_accuracy: 1.0,
        });
        assert_eq!(report.position, FilterStatus::Inactive);
        assert!(ekf.geo_reference().is_none());
    }
}

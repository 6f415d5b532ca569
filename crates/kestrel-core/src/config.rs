use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::Scalar;

bitflags! {
    /// External vision aiding selection.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct VisionControl: u8 {
        const POSITION = 1 << 0;
        const VELOCITY = 1 << 1;
        /// Only takes effect together with `ALIGNMENT`.
        const HEADING = 1 << 2;
        const ALIGNMENT = 1 << 3;
        const POSITION_BIAS = 1 << 4;
    }
}

impl VisionControl {
    pub fn intends_position(self) -> bool {
        self.contains(Self::POSITION)
    }

    pub fn intends_velocity(self) -> bool {
        self.contains(Self::VELOCITY)
    }

    /// Heading is observed against the alignment yaw, so it is never fused
    /// without alignment estimation.
    pub fn intends_heading(self) -> bool {
        self.contains(Self::HEADING | Self::ALIGNMENT)
    }
}

impl Default for VisionControl {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("`{name}` must be positive and finite, got {value}")]
    NotPositive { name: &'static str, value: Scalar },
    #[error("`{name}` must be non-negative and finite, got {value}")]
    Negative { name: &'static str, value: Scalar },
    #[error("`{name}` must be finite, got {value}")]
    NotFinite { name: &'static str, value: Scalar },
    #[error("`{name}` must be at least 1")]
    ZeroLimit { name: &'static str },
}

// ---------------------------------------------------------------------------
// TUNING
// ---------------------------------------------------------------------------
/// Estimator configuration. Every gate, timeout and variance the filter uses
/// is taken from here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EkfConfig {
    pub vision: VisionControl,
    /// Overrides the variance carried by the vision sample when set.
    pub ev_position_variance: Option<Scalar>,
    pub ev_velocity_variance: Option<Scalar>,
    pub ev_heading_variance: Option<Scalar>,
    pub ev_position_gate: Scalar,
    pub ev_velocity_gate: Scalar,
    pub ev_heading_gate: Scalar,

    pub gnss_fusion: bool,
    pub gnss_position_variance: Option<Scalar>,
    pub gnss_velocity_variance: Option<Scalar>,
    pub gnss_position_gate: Scalar,
    pub gnss_velocity_gate: Scalar,

    pub divergence_rejection_limit: u32,
    pub max_measurement_delay_us: u64,
    pub fusion_timeout_us: u64,
    pub tilt_align_duration_us: u64,

    pub gyro_noise_density: Scalar,
    pub accel_noise_density: Scalar,
    pub gyro_bias_instability: Scalar,
    pub accel_bias_instability: Scalar,
    pub alignment_random_walk: Scalar,
    pub ev_position_bias_random_walk: Scalar,

    pub initial_yaw: Scalar,
    pub initial_tilt_variance: Scalar,
    pub initial_yaw_variance: Scalar,
    pub initial_velocity_variance: Scalar,
    pub initial_position_variance: Scalar,
    pub initial_gyro_bias_variance: Scalar,
    pub initial_accel_bias_variance: Scalar,
    pub alignment_initial_tilt_variance: Scalar,
    pub alignment_initial_yaw_variance: Scalar,
    pub alignment_settled_variance: Scalar,
    pub ev_position_bias_initial_variance: Scalar,

    /// Position noise (m, 1-sigma) of the hold observation fused while no
    /// aiding source is active.
    pub no_aid_position_noise: Scalar,
    pub no_aid_fusion_interval_us: u64,
    /// Horizontal position variance sum (m^2) above which the local position
    /// is reported invalid.
    pub max_local_position_variance: Scalar,
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            vision: VisionControl::empty(),
            ev_position_variance: None,
            ev_velocity_variance: None,
            ev_heading_variance: None,
            ev_position_gate: 5.0,
            ev_velocity_gate: 3.0,
            ev_heading_gate: 3.0,

            gnss_fusion: false,
            gnss_position_variance: None,
            gnss_velocity_variance: None,
            gnss_position_gate: 5.0,
            gnss_velocity_gate: 5.0,

            divergence_rejection_limit: 50,
            max_measurement_delay_us: 300_000,
            fusion_timeout_us: 1_000_000,
            tilt_align_duration_us: 200_000,

            gyro_noise_density: 0.015,
            accel_noise_density: 0.35,
            gyro_bias_instability: 1e-4,
            accel_bias_instability: 3e-3,
            alignment_random_walk: 1e-4,
            ev_position_bias_random_walk: 1e-3,

            initial_yaw: 0.0,
            initial_tilt_variance: 0.01,
            initial_yaw_variance: 1e-4,
            initial_velocity_variance: 0.25,
            initial_position_variance: 0.25,
            initial_gyro_bias_variance: 3e-6,
            initial_accel_bias_variance: 0.04,
            alignment_initial_tilt_variance: 1e-4,
            alignment_initial_yaw_variance: 4.0,
            alignment_settled_variance: 0.01,
            ev_position_bias_initial_variance: 1.0,

            no_aid_position_noise: 10.0,
            no_aid_fusion_interval_us: 200_000,
            max_local_position_variance: 1000.0,
        }
    }
}

impl EkfConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("ev_position_gate", self.ev_position_gate),
            ("ev_velocity_gate", self.ev_velocity_gate),
            ("ev_heading_gate", self.ev_heading_gate),
            ("gnss_position_gate", self.gnss_position_gate),
            ("gnss_velocity_gate", self.gnss_velocity_gate),
            ("alignment_settled_variance", self.alignment_settled_variance),
            ("no_aid_position_noise", self.no_aid_position_noise),
            ("max_local_position_variance", self.max_local_position_variance),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }

        let overrides = [
            ("ev_position_variance", self.ev_position_variance),
            ("ev_velocity_variance", self.ev_velocity_variance),
            ("ev_heading_variance", self.ev_heading_variance),
            ("gnss_position_variance", self.gnss_position_variance),
            ("gnss_velocity_variance", self.gnss_velocity_variance),
        ];
        for (name, value) in overrides {
            if let Some(value) = value {
                if !(value.is_finite() && value > 0.0) {
                    return Err(ConfigError::NotPositive { name, value });
                }
            }
        }

        let non_negative = [
            ("gyro_noise_density", self.gyro_noise_density),
            ("accel_noise_density", self.accel_noise_density),
            ("gyro_bias_instability", self.gyro_bias_instability),
            ("accel_bias_instability", self.accel_bias_instability),
            ("alignment_random_walk", self.alignment_random_walk),
            ("ev_position_bias_random_walk", self.ev_position_bias_random_walk),
            ("initial_tilt_variance", self.initial_tilt_variance),
            ("initial_yaw_variance", self.initial_yaw_variance),
            ("initial_velocity_variance", self.initial_velocity_variance),
            ("initial_position_variance", self.initial_position_variance),
            ("initial_gyro_bias_variance", self.initial_gyro_bias_variance),
            ("initial_accel_bias_variance", self.initial_accel_bias_variance),
            ("alignment_initial_tilt_variance", self.alignment_initial_tilt_variance),
            ("alignment_initial_yaw_variance", self.alignment_initial_yaw_variance),
            ("ev_position_bias_initial_variance", self.ev_position_bias_initial_variance),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Negative { name, value });
            }
        }

        if !self.initial_yaw.is_finite() {
            return Err(ConfigError::NotFinite {
                name: "initial_yaw",
                value: self.initial_yaw,
            });
        }

        if self.divergence_rejection_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "divergence_rejection_limit",
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(EkfConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_heading_requires_alignment() {
        assert!(!VisionControl::HEADING.intends_heading());
        assert!((VisionControl::HEADING | VisionControl::ALIGNMENT).intends_heading());
        assert!(!VisionControl::ALIGNMENT.intends_heading());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = EkfConfig {
            ev_velocity_gate: 0.0,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NotPositive {
                name: "ev_velocity_gate",
                value: 0.0
            })
        );

        let cfg = EkfConfig {
            ev_heading_variance: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NotPositive { name: "ev_heading_variance", .. })
        ));

        let cfg = EkfConfig {
            divergence_rejection_limit: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: EkfConfig =
            serde_json::from_str(r#"{ "vision": "POSITION | VELOCITY", "ev_velocity_gate": 4.5 }"#)
                .unwrap();
        assert_eq!(cfg.vision, VisionControl::POSITION | VisionControl::VELOCITY);
        assert_eq!(cfg.ev_velocity_gate, 4.5);
        assert_eq!(cfg.ev_position_gate, EkfConfig::default().ev_position_gate);
    }
}

use std::path::Path;

use anyhow::{Context, Result};
use kestrel_core::math::{canonical, Vector3r};
use kestrel_core::{
    AxisClass, Channel, Ekf, EkfConfig, GeoReference, ReferenceFrame, VisionControl,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::sensor::SensorConfig;
use crate::simulator::SensorSimulator;

/// A hover or constant-velocity run with vision switched on after the
/// estimator has settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub ekf: EkfConfig,
    /// Vision control enabled once `settle_s` has elapsed.
    pub vision_after_settle: VisionControl,
    pub settle_s: f64,
    pub duration_s: f64,
    pub frame: ReferenceFrame,
    /// Yaw of the vision frame relative to navigation.
    pub frame_yaw_deg: f64,
    /// Truth velocity, expressed in the vision sample frame.
    pub vision_velocity: [f64; 3],
    pub vision_position_variance: f64,
    pub vision_velocity_variance: f64,
    pub gnss: bool,
    pub home_lat_deg: f64,
    pub home_lon_deg: f64,
    pub home_alt_m: f64,
    pub noise_scale: f64,
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            ekf: EkfConfig::default(),
            vision_after_settle: VisionControl::VELOCITY | VisionControl::POSITION,
            settle_s: 3.0,
            duration_s: 10.0,
            frame: ReferenceFrame::Local,
            frame_yaw_deg: 0.0,
            vision_velocity: [0.0; 3],
            vision_position_variance: 0.01,
            vision_velocity_variance: 0.01,
            gnss: false,
            home_lat_deg: 47.3977,
            home_lon_deg: 8.5456,
            home_alt_m: 488.0,
            noise_scale: 0.0,
            seed: 42,
        }
    }
}

impl ScenarioConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing scenario {}", path.display()))?;
        cfg.ekf.validate().context("invalid estimator configuration")?;
        Ok(cfg)
    }

    pub fn sensor_config(&self) -> SensorConfig {
        SensorConfig {
            noise_scale: self.noise_scale,
            seed: self.seed,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "vision_after_settle": format!("{:?}", self.vision_after_settle),
            "settle_s": self.settle_s,
            "duration_s": self.duration_s,
            "frame": format!("{:?}", self.frame),
            "frame_yaw_deg": self.frame_yaw_deg,
            "vision_velocity": self.vision_velocity,
            "vision_position_variance": self.vision_position_variance,
            "vision_velocity_variance": self.vision_velocity_variance,
            "gnss": self.gnss,
            "noise_scale": self.noise_scale,
            "seed": self.seed,
        })
    }
}

/// Time series recorded after the settle phase, one row per IMU step.
#[derive(Debug, Clone, Default)]
pub struct ScenarioResult {
    pub time: Vec<f64>,
    pub position: Vec<Vector3r>,
    pub velocity: Vec<Vector3r>,
    pub true_position: Vec<Vector3r>,
    pub true_velocity: Vec<Vector3r>,
    pub orientation_euler: Vec<Vector3r>,
    pub alignment_yaw: Vec<f64>,
    pub summary: ScenarioSummary,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioSummary {
    pub velocity_resets: u32,
    pub position_resets: u32,
    pub rejected_samples: u64,
    pub final_velocity_error: f64,
    pub final_position_error: f64,
    pub alignment_error_deg: f64,
    pub vision_fusing: bool,
    pub local_position_valid: bool,
    pub global_position_valid: bool,
}

impl ScenarioSummary {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "velocity_resets": self.velocity_resets,
            "position_resets": self.position_resets,
            "rejected_samples": self.rejected_samples,
            "final_velocity_error": self.final_velocity_error,
            "final_position_error": self.final_position_error,
            "alignment_error_deg": self.alignment_error_deg,
            "vision_fusing": self.vision_fusing,
            "local_position_valid": self.local_position_valid,
            "global_position_valid": self.global_position_valid,
        })
    }
}

pub fn run_scenario(cfg: &ScenarioConfig) -> Result<ScenarioResult> {
    let mut ekf = Ekf::new(cfg.ekf.clone()).context("invalid estimator configuration")?;
    ekf.init(0);

    let mut sim = SensorSimulator::new(cfg.sensor_config());
    sim.vio.frame = cfg.frame;
    sim.vio.set_frame_yaw(cfg.frame_yaw_deg.to_radians());
    sim.vio.position_variance = Vector3r::repeat(cfg.vision_position_variance);
    sim.vio.velocity_variance = Vector3r::repeat(cfg.vision_velocity_variance);
    let [vx, vy, vz] = cfg.vision_velocity;
    sim.set_vision_velocity(&Vector3r::new(vx, vy, vz));

    if cfg.gnss {
        ekf.set_home_location(cfg.home_lat_deg, cfg.home_lon_deg, cfg.home_alt_m);
        sim.gnss.home = GeoReference::new(cfg.home_lat_deg, cfg.home_lon_deg, cfg.home_alt_m);
        ekf.set_gnss_fusion(true);
        sim.start_gnss();
    }

    sim.run_seconds(&mut ekf, cfg.settle_s);
    ekf.enable_vision(cfg.vision_after_settle);
    sim.start_external_vision();
    info!(
        time_us = sim.time_us(),
        vision = ?cfg.vision_after_settle,
        "external vision started"
    );

    let mut result = ScenarioResult::default();
    let end_us = (cfg.duration_s.max(cfg.settle_s) * 1e6) as u64;
    while sim.time_us() < end_us {
        let outcome = sim.step(&mut ekf);
        let (roll, pitch, yaw) = ekf.attitude().euler_angles();
        let (_, _, align_yaw) = ekf.vision_alignment().euler_angles();

        result.time.push(outcome.time_us as f64 * 1e-6);
        result.position.push(ekf.position());
        result.velocity.push(ekf.velocity());
        result.true_position.push(sim.truth.position);
        result.true_velocity.push(sim.truth.velocity);
        result.orientation_euler.push(Vector3r::new(roll, pitch, yaw));
        result.alignment_yaw.push(align_yaw);
    }

    result.summary = summarize(&ekf, &sim, cfg);
    info!(
        velocity_resets = result.summary.velocity_resets,
        position_resets = result.summary.position_resets,
        final_velocity_error = result.summary.final_velocity_error,
        "scenario complete"
    );
    Ok(result)
}

fn summarize(ekf: &Ekf, sim: &SensorSimulator, cfg: &ScenarioConfig) -> ScenarioSummary {
    let log = ekf.reset_log();
    let rejected_samples = Channel::ALL
        .iter()
        .map(|&channel| ekf.channel_status(channel).rejected_total)
        .sum();

    let alignment_error_deg = if cfg.frame == ReferenceFrame::Local && ekf.alignment_is_active()
    {
        let estimated = canonical(&ekf.vision_alignment());
        let truth = canonical(&sim.vio.frame_offset);
        estimated.angle_to(&truth).to_degrees()
    } else {
        0.0
    };

    ScenarioSummary {
        velocity_resets: log.counter(AxisClass::HorizontalVelocity),
        position_resets: log.counter(AxisClass::HorizontalPosition),
        rejected_samples,
        final_velocity_error: (ekf.velocity() - sim.truth.velocity).norm(),
        final_position_error: (ekf.position() - sim.truth.position).norm(),
        alignment_error_deg,
        vision_fusing: Channel::VISION.iter().any(|&channel| ekf.is_fusing(channel)),
        local_position_valid: ekf.local_position_is_valid(),
        global_position_valid: ekf.global_position_is_valid(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_json_defaults() {
        let cfg: ScenarioConfig =
            serde_json::from_str(r#"{ "frame": "navigation", "duration_s": 5.0 }"#).unwrap();
        assert_eq!(cfg.frame, ReferenceFrame::Navigation);
        assert_eq!(cfg.duration_s, 5.0);
        assert_eq!(cfg.settle_s, 3.0);
        assert_eq!(cfg.to_json()["seed"], 42);
    }

    #[test]
    fn test_hover_scenario_converges() {
        let cfg = ScenarioConfig {
            duration_s: 5.0,
            frame: ReferenceFrame::Navigation,
            vision_velocity: [0.5, 0.0, 0.0],
            ..Default::default()
        };
        let result = run_scenario(&cfg).unwrap();

        assert_eq!(result.time.len(), 500);
        assert_eq!(result.summary.velocity_resets, 1);
        assert_eq!(result.summary.position_resets, 1);
        assert!(result.summary.final_velocity_error < 0.05);
        assert!(result.summary.vision_fusing);
        assert!(result.summary.local_position_valid);
        assert!(!result.summary.global_position_valid);
    }
}

use tracing::info;

use crate::config::{ConfigError, EkfConfig, VisionControl};
use crate::gnss::GeoReference;
use crate::math::{UnitQuaternionr, Vector3r};
use crate::predictor::TiltAligner;
use crate::reset::{ResetLog, ResetManager};
use crate::state::{idx, ActiveStates, ErrorCovariance, ErrorVector, NominalState, StateStore};
use crate::status::{Channel, ChannelStatus};

/// Navigation estimator: inertial prediction with vision and GNSS aiding.
///
/// Single-threaded and deterministic; every call performs one step.
#[derive(Debug, Clone)]
pub struct Ekf {
    pub(crate) config: EkfConfig,
    pub(crate) store: StateStore,
    /// Inertial horizon: timestamp of the last IMU sample.
    pub(crate) time_us: Option<u64>,
    pub(crate) tilt: TiltAligner,
    pub(crate) tilt_aligned: bool,
    pub(crate) channels: [ChannelStatus; 5],
    pub(crate) resets: ResetManager,
    pub(crate) geo_ref: Option<GeoReference>,
    pub(crate) last_known_position: Vector3r,
    pub(crate) last_no_aid_fusion_us: Option<u64>,
}

impl Default for Ekf {
    fn default() -> Self {
        Self::build(EkfConfig::default())
    }
}

impl Ekf {
    pub fn new(config: EkfConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EkfConfig) -> Self {
        let store = initial_store(&config);
        Self {
            config,
            store,
            time_us: None,
            tilt: TiltAligner::new(),
            tilt_aligned: false,
            channels: [ChannelStatus::default(); 5],
            resets: ResetManager::new(),
            geo_ref: None,
            last_known_position: Vector3r::zeros(),
            last_no_aid_fusion_us: None,
        }
    }

    /// Discards all estimation state and starts over from the configuration,
    /// with the inertial horizon at `time_us`.
    pub fn init(&mut self, time_us: u64) {
        *self = Self::build(self.config.clone());
        self.time_us = Some(time_us);
        info!(time_us, "estimator initialized");
    }

    // =====================================================================
    // CONTROL
    // =====================================================================
    pub fn config(&self) -> &EkfConfig {
        &self.config
    }

    pub fn set_vision_control(&mut self, control: VisionControl) {
        let previous = self.config.vision;
        if previous == control {
            return;
        }
        self.config.vision = control;
        self.apply_vision_state_control(previous);

        for channel in Channel::VISION {
            if !self.is_intending(channel) {
                self.channels[channel.index()].fusing = false;
            }
        }
        info!(vision = ?control, "vision control changed");
    }

    pub fn enable_vision(&mut self, flags: VisionControl) {
        self.set_vision_control(self.config.vision | flags);
    }

    pub fn disable_vision(&mut self, flags: VisionControl) {
        self.set_vision_control(self.config.vision - flags);
    }

    pub fn set_gnss_fusion(&mut self, enabled: bool) {
        self.config.gnss_fusion = enabled;
        if !enabled {
            self.channels[Channel::GnssPosition.index()].fusing = false;
            self.channels[Channel::GnssVelocity.index()].fusing = false;
        }
    }

    // =====================================================================
    // CHANNEL STATUS
    // =====================================================================
    /// Configuration and preconditions allow the channel to fuse.
    pub fn is_intending(&self, channel: Channel) -> bool {
        if !self.tilt_aligned {
            return false;
        }
        let vision = self.config.vision;
        match channel {
            Channel::EvPosition => vision.intends_position(),
            Channel::EvVelocity => vision.intends_velocity(),
            Channel::EvHeading => vision.intends_heading(),
            Channel::GnssPosition | Channel::GnssVelocity => self.config.gnss_fusion,
        }
    }

    /// The channel has been accepted or used for a reset and has not timed
    /// out since.
    pub fn is_fusing(&self, channel: Channel) -> bool {
        self.is_intending(channel) && self.channels[channel.index()].fusing
    }

    pub fn channel_status(&self, channel: Channel) -> &ChannelStatus {
        &self.channels[channel.index()]
    }

    /// Any velocity or position source is currently fusing.
    pub fn is_aiding(&self) -> bool {
        Channel::ALL
            .iter()
            .any(|&channel| channel.is_aiding() && self.is_fusing(channel))
    }

    pub(crate) fn expire_channels(&mut self, now_us: u64) {
        let timeout = self.config.fusion_timeout_us;
        for channel in Channel::ALL {
            let status = &mut self.channels[channel.index()];
            if status.fusing && status.timed_out(now_us, timeout) {
                status.fusing = false;
                info!(channel = channel.label(), now_us, "fusion timed out");
            }
        }
    }

    // =====================================================================
    // QUERIES
    // =====================================================================
    pub fn time_us(&self) -> Option<u64> {
        self.time_us
    }

    pub fn is_tilt_aligned(&self) -> bool {
        self.tilt_aligned
    }

    pub fn state(&self) -> &NominalState {
        &self.store.nominal
    }

    pub fn covariance(&self) -> &ErrorCovariance {
        self.store.covariance.matrix()
    }

    pub fn active_states(&self) -> ActiveStates {
        self.store.active
    }

    pub fn attitude(&self) -> UnitQuaternionr {
        self.store.nominal.orientation
    }

    pub fn velocity(&self) -> Vector3r {
        self.store.nominal.velocity
    }

    pub fn velocity_variance(&self) -> Vector3r {
        self.store.covariance.variance3(idx::VEL)
    }

    pub fn position(&self) -> Vector3r {
        self.store.nominal.position
    }

    pub fn position_variance(&self) -> Vector3r {
        self.store.covariance.variance3(idx::POS)
    }

    pub fn ev_position_bias(&self) -> Vector3r {
        self.store.nominal.ev_position_bias
    }

    pub fn local_position_is_valid(&self) -> bool {
        let var = self.position_variance();
        self.is_aiding() && var.x + var.y < self.config.max_local_position_variance
    }

    /// Requires an absolute source: vision alone never makes this true.
    pub fn global_position_is_valid(&self) -> bool {
        self.geo_ref.is_some()
            && self.is_fusing(Channel::GnssPosition)
            && self.local_position_is_valid()
    }

    pub fn reset_log(&self) -> &ResetLog {
        self.resets.log()
    }

    pub fn reset_manager(&self) -> &ResetManager {
        &self.resets
    }
}

fn initial_store(cfg: &EkfConfig) -> StateStore {
    let mut variances = ErrorVector::zeros();
    variances[idx::THETA] = cfg.initial_tilt_variance;
    variances[idx::THETA + 1] = cfg.initial_tilt_variance;
    variances[idx::THETA + 2] = cfg.initial_yaw_variance;
    variances
        .fixed_rows_mut::<3>(idx::VEL)
        .fill(cfg.initial_velocity_variance);
    variances
        .fixed_rows_mut::<3>(idx::POS)
        .fill(cfg.initial_position_variance);
    variances
        .fixed_rows_mut::<3>(idx::GYRO_BIAS)
        .fill(cfg.initial_gyro_bias_variance);
    variances
        .fixed_rows_mut::<3>(idx::ACCEL_BIAS)
        .fill(cfg.initial_accel_bias_variance);

    let mut nominal = NominalState::new();
    nominal.orientation = UnitQuaternionr::from_euler_angles(0.0, 0.0, cfg.initial_yaw);

    let mut store = StateStore::new(nominal, &variances, ActiveStates::INERTIAL);
    if cfg.vision.contains(VisionControl::ALIGNMENT) {
        store.activate_alignment(
            cfg.alignment_initial_tilt_variance,
            cfg.alignment_initial_yaw_variance,
        );
    }
    if cfg.vision.contains(VisionControl::POSITION_BIAS) {
        store.activate_ev_position_bias(cfg.ev_position_bias_initial_variance);
    }
    store
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::math::GRAVITY;
    use crate::predictor::ImuSample;

    pub const IMU_PERIOD_US: u64 = 4_000;

    pub fn level_imu(time_us: u64) -> ImuSample {
        ImuSample {
            time_us,
            gyro: Vector3r::zeros(),
            accel: Vector3r::new(0.0, 0.0, -GRAVITY),
        }
    }

    /// Feeds `steps` level samples after `t`, returning the last timestamp.
    pub fn run_imu(ekf: &mut Ekf, mut t: u64, steps: u32) -> u64 {
        for _ in 0..steps {
            t += IMU_PERIOD_US;
            ekf.predict(&level_imu(t));
        }
        t
    }

    /// Estimator past tilt alignment and one propagation step.
    pub fn aligned_ekf(config: EkfConfig) -> Ekf {
        let mut ekf = Ekf::new(config).expect("valid config");
        ekf.init(0);
        let mut t = 0;
        ekf.predict(&level_imu(t));
        while !ekf.is_tilt_aligned() {
            t = run_imu(&mut ekf, t, 1);
        }
        run_imu(&mut ekf, t, 1);
        ekf
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::status::FilterStatus;
    use crate::vision::{ExtVisionSample, ReferenceFrame};

    #[test]
    fn test_new_rejects_invalid_config() {
        let cfg = EkfConfig {
            ev_position_gate: -1.0,
            ..Default::default()
        };
        assert!(Ekf::new(cfg).is_err());
    }

    #[test]
    fn test_intending_follows_control() {
        let mut ekf = aligned_ekf(EkfConfig::default());
        assert!(!ekf.is_intending(Channel::EvPosition));

        ekf.enable_vision(VisionControl::POSITION);
        assert!(ekf.is_intending(Channel::EvPosition));
        assert!(!ekf.is_intending(Channel::EvVelocity));

        ekf.enable_vision(VisionControl::HEADING);
        assert!(!ekf.is_intending(Channel::EvHeading));
        ekf.enable_vision(VisionControl::ALIGNMENT);
        assert!(ekf.is_intending(Channel::EvHeading));
        assert!(ekf.alignment_is_active());
        assert!(ekf.is_intending(Channel::EvPosition));

        ekf.disable_vision(VisionControl::ALIGNMENT);
        assert!(!ekf.alignment_is_active());
        assert!(!ekf.is_intending(Channel::EvHeading));
    }

    #[test]
    fn test_not_intending_before_tilt_alignment() {
        let mut ekf = Ekf::new(EkfConfig {
            vision: VisionControl::POSITION,
            ..Default::default()
        })
        .unwrap();
        ekf.init(0);
        assert!(!ekf.is_intending(Channel::EvPosition));

        let mut sample = ExtVisionSample::new(0, ReferenceFrame::Navigation);
        sample.position = Some(Vector3r::zeros());
        assert_eq!(ekf.fuse_ext_vision(&sample).position, FilterStatus::Inactive);
    }

    #[test]
    fn test_fusion_times_out() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::VELOCITY,
            ..Default::default()
        });
        let t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Navigation);
        sample.velocity = Some(Vector3r::zeros());
        ekf.fuse_ext_vision(&sample);
        assert!(ekf.is_fusing(Channel::EvVelocity));
        assert!(ekf.local_position_is_valid());

        let timeout_steps = (ekf.config().fusion_timeout_us / IMU_PERIOD_US) as u32 + 2;
        run_imu(&mut ekf, t, timeout_steps);
        assert!(!ekf.is_fusing(Channel::EvVelocity));
        assert!(!ekf.local_position_is_valid());
    }

    #[test]
    fn test_init_sets_horizon_for_stale_check() {
        let mut ekf = Ekf::new(EkfConfig::default()).unwrap();
        ekf.init(1_000_000);
        assert_eq!(ekf.time_us(), Some(1_000_000));

        let max_delay = ekf.config().max_measurement_delay_us;
        let status = ekf.channel_status(Channel::EvPosition);
        assert!(status.is_stale(1_000_000 - max_delay - 1, ekf.time_us(), max_delay));
        assert!(!status.is_stale(1_000_000 - max_delay, ekf.time_us(), max_delay));
    }

    #[test]
    fn test_init_clears_everything() {
        let mut ekf = aligned_ekf(EkfConfig {
            vision: VisionControl::VELOCITY,
            ..Default::default()
        });
        let t = ekf.time_us().unwrap();
        let mut sample = ExtVisionSample::new(t, ReferenceFrame::Navigation);
        sample.velocity = Some(Vector3r::new(1.0, 0.0, 0.0));
        ekf.fuse_ext_vision(&sample);

        ekf.init(t);
        assert!(!ekf.is_tilt_aligned());
        assert_eq!(ekf.time_us(), Some(t));
        assert_eq!(ekf.velocity(), Vector3r::zeros());
        assert_eq!(*ekf.reset_log(), ResetLog::new());
        assert_eq!(ekf.config().vision, VisionControl::VELOCITY);
    }
}

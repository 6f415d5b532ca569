use crate::math::Scalar;
use crate::reset::AxisClass;

/// Outcome of one predict or fusion step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterStatus {
    Updated,
    /// The observation was used to overwrite the state.
    Reset,
    Aligning,
    SkippedSmallDt,
    SkippedOutdated,
    RejectedInnovation(Scalar),
    SingularMatrix,
    /// The channel is not intended to fuse.
    Inactive,
    /// Initialization postponed until the vision alignment settles.
    Deferred,
}

impl FilterStatus {
    /// True when the step changed the estimate.
    pub fn is_applied(&self) -> bool {
        matches!(self, FilterStatus::Updated | FilterStatus::Reset)
    }
}

/// Aiding channels fused through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    EvPosition,
    EvVelocity,
    EvHeading,
    GnssPosition,
    GnssVelocity,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::EvPosition,
        Channel::EvVelocity,
        Channel::EvHeading,
        Channel::GnssPosition,
        Channel::GnssVelocity,
    ];

    pub const VISION: [Channel; 3] = [Channel::EvPosition, Channel::EvVelocity, Channel::EvHeading];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::EvPosition => "ev_pos",
            Channel::EvVelocity => "ev_vel",
            Channel::EvHeading => "ev_yaw",
            Channel::GnssPosition => "gnss_pos",
            Channel::GnssVelocity => "gnss_vel",
        }
    }

    /// Axis classes this channel observes directly.
    pub fn axis_classes(self) -> &'static [AxisClass] {
        match self {
            Channel::EvPosition | Channel::GnssPosition => {
                &[AxisClass::HorizontalPosition, AxisClass::VerticalPosition]
            }
            Channel::EvVelocity | Channel::GnssVelocity => {
                &[AxisClass::HorizontalVelocity, AxisClass::VerticalVelocity]
            }
            Channel::EvHeading => &[],
        }
    }

    /// Channels that constrain velocity or position.
    pub fn is_aiding(self) -> bool {
        !matches!(self, Channel::EvHeading)
    }
}

/// Bookkeeping for one fusion channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStatus {
    pub fusing: bool,
    pub numerically_healthy: bool,
    pub test_ratio: Scalar,
    pub last_sample_us: Option<u64>,
    pub last_fused_us: Option<u64>,
    pub rejected_total: u64,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self {
            fusing: false,
            numerically_healthy: true,
            test_ratio: 0.0,
            last_sample_us: None,
            last_fused_us: None,
            rejected_total: 0,
        }
    }
}

impl ChannelStatus {
    /// A sample is stale if it does not advance the channel clock or lags
    /// the inertial horizon by more than `max_delay_us`.
    pub fn is_stale(&self, time_us: u64, horizon_us: Option<u64>, max_delay_us: u64) -> bool {
        let not_newer = self.last_sample_us.map_or(false, |last| time_us <= last);
        let too_old = horizon_us.map_or(false, |now| time_us.saturating_add(max_delay_us) < now);
        not_newer || too_old
    }

    pub fn timed_out(&self, now_us: u64, timeout_us: u64) -> bool {
        match self.last_sample_us {
            Some(last) => now_us.saturating_sub(last) > timeout_us,
            None => true,
        }
    }

    pub(crate) fn mark_fused(&mut self, time_us: u64) {
        self.fusing = true;
        self.numerically_healthy = true;
        self.last_fused_us = Some(time_us);
    }
}

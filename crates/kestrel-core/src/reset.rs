use tracing::{debug, info, warn};

use crate::ekf::Ekf;
use crate::fusion::FusionOutcome;
use crate::math::{Matrix3r, Scalar, Vector2r, Vector3r};
use crate::state::idx;
use crate::status::{Channel, FilterStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisClass {
    HorizontalVelocity,
    VerticalVelocity,
    HorizontalPosition,
    VerticalPosition,
}

impl AxisClass {
    pub const ALL: [AxisClass; 4] = [
        AxisClass::HorizontalVelocity,
        AxisClass::VerticalVelocity,
        AxisClass::HorizontalPosition,
        AxisClass::VerticalPosition,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    Initialization,
    Divergence,
}

/// State quantity a 3D observation overwrites on reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetQuantity {
    Velocity,
    Position,
}

impl ResetQuantity {
    pub fn classes(self) -> [AxisClass; 2] {
        match self {
            ResetQuantity::Velocity => [AxisClass::HorizontalVelocity, AxisClass::VerticalVelocity],
            ResetQuantity::Position => [AxisClass::HorizontalPosition, AxisClass::VerticalPosition],
        }
    }

    fn state_index(self) -> usize {
        match self {
            ResetQuantity::Velocity => idx::VEL,
            ResetQuantity::Position => idx::POS,
        }
    }
}

/// Nav-frame value and covariance a channel falls back to on reset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResetTarget {
    pub quantity: ResetQuantity,
    pub value: Vector3r,
    pub covariance: Matrix3r,
}

// ---------------------------------------------------------------------------
// LOG
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResetEntry<T> {
    pub counter: u32,
    /// State after minus state before the last reset.
    pub delta: T,
    pub time_us: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResetLog {
    pub horizontal_velocity: ResetEntry<Vector2r>,
    pub vertical_velocity: ResetEntry<Scalar>,
    pub horizontal_position: ResetEntry<Vector2r>,
    pub vertical_position: ResetEntry<Scalar>,
}

impl Default for ResetLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetLog {
    pub fn new() -> Self {
        let planar = ResetEntry {
            counter: 0,
            delta: Vector2r::zeros(),
            time_us: 0,
        };
        let vertical = ResetEntry {
            counter: 0,
            delta: 0.0,
            time_us: 0,
        };
        Self {
            horizontal_velocity: planar,
            vertical_velocity: vertical,
            horizontal_position: planar,
            vertical_position: vertical,
        }
    }

    pub fn counter(&self, class: AxisClass) -> u32 {
        match class {
            AxisClass::HorizontalVelocity => self.horizontal_velocity.counter,
            AxisClass::VerticalVelocity => self.vertical_velocity.counter,
            AxisClass::HorizontalPosition => self.horizontal_position.counter,
            AxisClass::VerticalPosition => self.vertical_position.counter,
        }
    }

    /// Full 3D delta of the last velocity reset (NE from the horizontal entry,
    /// D from the vertical one).
    pub fn velocity_delta(&self) -> Vector3r {
        let ne = self.horizontal_velocity.delta;
        Vector3r::new(ne.x, ne.y, self.vertical_velocity.delta)
    }

    pub fn position_delta(&self) -> Vector3r {
        let ne = self.horizontal_position.delta;
        Vector3r::new(ne.x, ne.y, self.vertical_position.delta)
    }

    fn record(&mut self, quantity: ResetQuantity, delta: &Vector3r, time_us: u64) {
        let (planar, vertical) = match quantity {
            ResetQuantity::Velocity => (&mut self.horizontal_velocity, &mut self.vertical_velocity),
            ResetQuantity::Position => (&mut self.horizontal_position, &mut self.vertical_position),
        };
        planar.counter += 1;
        planar.delta = Vector2r::new(delta.x, delta.y);
        planar.time_us = time_us;
        vertical.counter += 1;
        vertical.delta = delta.z;
        vertical.time_us = time_us;
    }
}

// ---------------------------------------------------------------------------
// MANAGER
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct ResetManager {
    log: ResetLog,
    initialized: [bool; 4],
    consecutive_rejections: [u32; 4],
}

impl Default for ResetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetManager {
    pub fn new() -> Self {
        Self {
            log: ResetLog::new(),
            initialized: [false; 4],
            consecutive_rejections: [0; 4],
        }
    }

    pub fn log(&self) -> &ResetLog {
        &self.log
    }

    pub fn is_initialized(&self, class: AxisClass) -> bool {
        self.initialized[class.index()]
    }

    pub fn consecutive_rejections(&self, class: AxisClass) -> u32 {
        self.consecutive_rejections[class.index()]
    }

    pub fn record_acceptance(&mut self, class: AxisClass) {
        self.initialized[class.index()] = true;
        self.consecutive_rejections[class.index()] = 0;
    }

    /// Returns true once the class has been rejected `limit` times in a row.
    pub fn record_rejection(&mut self, class: AxisClass, limit: u32) -> bool {
        let count = &mut self.consecutive_rejections[class.index()];
        *count = count.saturating_add(1);
        *count >= limit
    }

    fn record_reset(&mut self, quantity: ResetQuantity, delta: &Vector3r, time_us: u64) {
        self.log.record(quantity, delta, time_us);
        for class in quantity.classes() {
            self.initialized[class.index()] = true;
            self.consecutive_rejections[class.index()] = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// ESTIMATOR HOOKS
// ---------------------------------------------------------------------------
impl Ekf {
    /// Hard overwrite of velocity or position.
    ///
    /// The covariance block takes the measurement covariance and loses every
    /// cross term; both axis classes of the quantity count one reset.
    pub(crate) fn reset_to(&mut self, target: &ResetTarget, time_us: u64, cause: ResetCause) {
        let before = match target.quantity {
            ResetQuantity::Velocity => self.store.nominal.velocity,
            ResetQuantity::Position => self.store.nominal.position,
        };
        match target.quantity {
            ResetQuantity::Velocity => self.store.nominal.velocity = target.value,
            ResetQuantity::Position => self.store.nominal.position = target.value,
        }
        self.store
            .covariance
            .reset_block(target.quantity.state_index(), &target.covariance);
        self.store.covariance.constrain(self.store.active);

        let delta = target.value - before;
        self.resets.record_reset(target.quantity, &delta, time_us);
        if target.quantity == ResetQuantity::Position {
            self.last_known_position = target.value;
        }

        info!(
            quantity = ?target.quantity,
            cause = ?cause,
            time_us,
            delta_n = delta.x,
            delta_e = delta.y,
            delta_d = delta.z,
            "state reset"
        );
    }

    /// Channel and reset bookkeeping after a correction attempt.
    ///
    /// `fallback` is the overwrite used when rejections on the channel's axis
    /// classes reach the divergence limit.
    pub(crate) fn conclude_fusion<const D: usize>(
        &mut self,
        channel: Channel,
        outcome: &FusionOutcome<D>,
        time_us: u64,
        fallback: Option<&ResetTarget>,
    ) -> FilterStatus {
        let limit = self.config.divergence_rejection_limit;
        let status = &mut self.channels[channel.index()];
        status.test_ratio = outcome.test_ratio;

        match outcome.status {
            FilterStatus::Updated => {
                status.mark_fused(time_us);
                for &class in channel.axis_classes() {
                    self.resets.record_acceptance(class);
                }
                FilterStatus::Updated
            }
            FilterStatus::RejectedInnovation(ratio) => {
                status.rejected_total += 1;
                debug!(channel = channel.label(), ratio, "innovation rejected");

                let mut diverged = false;
                for &class in channel.axis_classes() {
                    diverged |= self.resets.record_rejection(class, limit);
                }
                match fallback {
                    Some(target) if diverged => {
                        warn!(channel = channel.label(), limit, "sustained rejection, resetting");
                        self.reset_to(target, time_us, ResetCause::Divergence);
                        self.channels[channel.index()].mark_fused(time_us);
                        FilterStatus::Reset
                    }
                    _ => FilterStatus::RejectedInnovation(ratio),
                }
            }
            FilterStatus::SingularMatrix => {
                status.numerically_healthy = false;
                warn!(channel = channel.label(), "innovation covariance is singular");
                FilterStatus::SingularMatrix
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_records_both_classes() {
        let mut log = ResetLog::new();
        log.record(ResetQuantity::Velocity, &Vector3r::new(0.3, -1.0, 0.4), 42);

        assert_eq!(log.counter(AxisClass::HorizontalVelocity), 1);
        assert_eq!(log.counter(AxisClass::VerticalVelocity), 1);
        assert_eq!(log.counter(AxisClass::HorizontalPosition), 0);
        assert_eq!(log.velocity_delta(), Vector3r::new(0.3, -1.0, 0.4));
        assert_eq!(log.vertical_velocity.time_us, 42);
    }

    #[test]
    fn test_rejection_counter() {
        let mut mgr = ResetManager::new();
        let class = AxisClass::HorizontalPosition;
        assert!(!mgr.record_rejection(class, 3));
        assert!(!mgr.record_rejection(class, 3));
        mgr.record_acceptance(class);
        assert_eq!(mgr.consecutive_rejections(class), 0);
        assert!(mgr.is_initialized(class));

        assert!(!mgr.record_rejection(class, 3));
        assert!(!mgr.record_rejection(class, 3));
        assert!(mgr.record_rejection(class, 3));
    }

    #[test]
    fn test_reset_clears_rejections() {
        let mut mgr = ResetManager::new();
        mgr.record_rejection(AxisClass::VerticalVelocity, 10);
        mgr.record_reset(ResetQuantity::Velocity, &Vector3r::zeros(), 0);

        assert_eq!(mgr.consecutive_rejections(AxisClass::VerticalVelocity), 0);
        assert!(mgr.is_initialized(AxisClass::HorizontalVelocity));
        assert!(!mgr.is_initialized(AxisClass::HorizontalPosition));
        assert_eq!(mgr.log().counter(AxisClass::VerticalVelocity), 1);
    }
}

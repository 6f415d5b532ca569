use kestrel_core::math::{Scalar, Vector3r};
use kestrel_core::{AxisClass, Ekf, ResetLog};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    log: ResetLog,
    velocity: Vector3r,
    position: Vector3r,
}

impl Snapshot {
    fn capture(ekf: &Ekf) -> Self {
        Self {
            log: *ekf.reset_log(),
            velocity: ekf.velocity(),
            position: ekf.position(),
        }
    }
}

/// Compares reset counters and logged deltas against the state change seen
/// across a window that contains a reset.
#[derive(Debug, Clone, Default)]
pub struct ResetLoggingChecker {
    before: Option<Snapshot>,
    after: Option<Snapshot>,
}

impl ResetLoggingChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_pre_reset_state(&mut self, ekf: &Ekf) {
        self.before = Some(Snapshot::capture(ekf));
        self.after = None;
    }

    pub fn capture_post_reset_state(&mut self, ekf: &Ekf) {
        self.after = Some(Snapshot::capture(ekf));
    }

    /// Counter difference for `class`, or None before both captures.
    pub fn counter_increase(&self, class: AxisClass) -> Option<u32> {
        let (before, after) = self.before.zip(self.after)?;
        Some(after.log.counter(class).saturating_sub(before.log.counter(class)))
    }

    pub fn counter_increased_by(&self, class: AxisClass, expected: u32) -> bool {
        self.counter_increase(class) == Some(expected)
    }

    pub fn velocity_reset_counters_increased_by(&self, expected: u32) -> bool {
        self.counter_increased_by(AxisClass::HorizontalVelocity, expected)
            && self.counter_increased_by(AxisClass::VerticalVelocity, expected)
    }

    pub fn position_reset_counters_increased_by(&self, expected: u32) -> bool {
        self.counter_increased_by(AxisClass::HorizontalPosition, expected)
            && self.counter_increased_by(AxisClass::VerticalPosition, expected)
    }

    pub fn is_velocity_delta_logged_correctly(&self, tolerance: Scalar) -> bool {
        match (self.before, self.after) {
            (Some(before), Some(after)) => {
                let observed = after.velocity - before.velocity;
                (after.log.velocity_delta() - observed).amax() <= tolerance
            }
            _ => false,
        }
    }

    pub fn is_position_delta_logged_correctly(&self, tolerance: Scalar) -> bool {
        match (self.before, self.after) {
            (Some(before), Some(after)) => {
                let observed = after.position - before.position;
                (after.log.position_delta() - observed).amax() <= tolerance
            }
            _ => false,
        }
    }
}

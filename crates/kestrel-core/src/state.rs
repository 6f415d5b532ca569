use bitflags::bitflags;
use nalgebra::{SMatrix, SVector};

use crate::math::{Matrix3r, Scalar, UnitQuaternionr, Vector3r};

// ---------------------------------------------------------------------------
// ERROR-STATE LAYOUT
// ---------------------------------------------------------------------------
pub const STATE_DIM: usize = 21;

/// Start index of each 3-element block of the error state.
pub mod idx {
    pub const THETA: usize = 0;
    pub const VEL: usize = 3;
    pub const POS: usize = 6;
    pub const GYRO_BIAS: usize = 9;
    pub const ACCEL_BIAS: usize = 12;
    pub const ALIGNMENT: usize = 15;
    pub const EV_POS_BIAS: usize = 18;
}

pub type ErrorVector = SVector<Scalar, STATE_DIM>;
pub type ErrorCovariance = SMatrix<Scalar, STATE_DIM, STATE_DIM>;

bitflags! {
    /// Which blocks of the fixed-size state take part in estimation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ActiveStates: u8 {
        const ATTITUDE = 1 << 0;
        const VELOCITY = 1 << 1;
        const POSITION = 1 << 2;
        const GYRO_BIAS = 1 << 3;
        const ACCEL_BIAS = 1 << 4;
        const ALIGNMENT = 1 << 5;
        const EV_POS_BIAS = 1 << 6;

        const INERTIAL = Self::ATTITUDE.bits()
            | Self::VELOCITY.bits()
            | Self::POSITION.bits()
            | Self::GYRO_BIAS.bits()
            | Self::ACCEL_BIAS.bits();
    }
}

const BLOCKS: [(ActiveStates, usize); 7] = [
    (ActiveStates::ATTITUDE, idx::THETA),
    (ActiveStates::VELOCITY, idx::VEL),
    (ActiveStates::POSITION, idx::POS),
    (ActiveStates::GYRO_BIAS, idx::GYRO_BIAS),
    (ActiveStates::ACCEL_BIAS, idx::ACCEL_BIAS),
    (ActiveStates::ALIGNMENT, idx::ALIGNMENT),
    (ActiveStates::EV_POS_BIAS, idx::EV_POS_BIAS),
];

impl ActiveStates {
    /// 1.0 for every error-state index belonging to an active block, else 0.0.
    pub fn mask(self) -> ErrorVector {
        let mut m = ErrorVector::zeros();
        for (flag, start) in BLOCKS {
            if self.contains(flag) {
                m.fixed_rows_mut::<3>(start).fill(1.0);
            }
        }
        m
    }
}

// ---------------------------------------------------------------------------
// NOMINAL STATE
// ---------------------------------------------------------------------------
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NominalState {
    /// Navigation-from-body rotation.
    pub orientation: UnitQuaternionr,
    pub velocity: Vector3r,
    pub position: Vector3r,
    pub gyro_bias: Vector3r,
    pub accel_bias: Vector3r,
    /// Vision-to-navigation rotation.
    pub ev_alignment: UnitQuaternionr,
    /// Offset of the vision position origin, navigation frame.
    pub ev_position_bias: Vector3r,
}

impl Default for NominalState {
    fn default() -> Self {
        Self::new()
    }
}

impl NominalState {
    pub fn new() -> Self {
        Self {
            orientation: UnitQuaternionr::identity(),
            velocity: Vector3r::zeros(),
            position: Vector3r::zeros(),
            gyro_bias: Vector3r::zeros(),
            accel_bias: Vector3r::zeros(),
            ev_alignment: UnitQuaternionr::identity(),
            ev_position_bias: Vector3r::zeros(),
        }
    }

    /// Injects an error-state correction.
    ///
    /// Body attitude errors live in the body frame (right-multiplied), the
    /// alignment error lives in the navigation frame (left-multiplied).
    pub fn inject(&mut self, dx: &ErrorVector) {
        let dtheta: Vector3r = dx.fixed_rows::<3>(idx::THETA).into_owned();
        self.orientation *= UnitQuaternionr::from_scaled_axis(dtheta);
        self.orientation.renormalize();

        self.velocity += dx.fixed_rows::<3>(idx::VEL);
        self.position += dx.fixed_rows::<3>(idx::POS);
        self.gyro_bias += dx.fixed_rows::<3>(idx::GYRO_BIAS);
        self.accel_bias += dx.fixed_rows::<3>(idx::ACCEL_BIAS);

        let dalign: Vector3r = dx.fixed_rows::<3>(idx::ALIGNMENT).into_owned();
        self.ev_alignment = UnitQuaternionr::from_scaled_axis(dalign) * self.ev_alignment;
        self.ev_alignment.renormalize();

        self.ev_position_bias += dx.fixed_rows::<3>(idx::EV_POS_BIAS);
    }
}

// ---------------------------------------------------------------------------
// COVARIANCE
// ---------------------------------------------------------------------------
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateCovariance {
    pub(crate) p: ErrorCovariance,
}

impl StateCovariance {
    pub fn zeros() -> Self {
        Self {
            p: ErrorCovariance::zeros(),
        }
    }

    pub fn matrix(&self) -> &ErrorCovariance {
        &self.p
    }

    pub fn variance(&self, i: usize) -> Scalar {
        self.p[(i, i)]
    }

    /// Diagonal of the 3x3 block starting at `start`.
    pub fn variance3(&self, start: usize) -> Vector3r {
        Vector3r::new(
            self.p[(start, start)],
            self.p[(start + 1, start + 1)],
            self.p[(start + 2, start + 2)],
        )
    }

    pub fn block3(&self, start: usize) -> Matrix3r {
        self.p.fixed_view::<3, 3>(start, start).into_owned()
    }

    /// Zeroes every row and column of the block, then writes `block` on its
    /// diagonal position. Cross-covariances with the rest of the state are
    /// dropped.
    pub fn reset_block(&mut self, start: usize, block: &Matrix3r) {
        self.clear_block(start);
        self.p.fixed_view_mut::<3, 3>(start, start).copy_from(block);
    }

    pub fn clear_block(&mut self, start: usize) {
        self.p.fixed_rows_mut::<3>(start).fill(0.0);
        self.p.fixed_columns_mut::<3>(start).fill(0.0);
    }

    /// Restores symmetry and positive semi-definiteness bounds.
    ///
    /// Rows and columns of inactive blocks are forced to zero, the diagonal is
    /// clamped non-negative and every correlation is bounded by one.
    pub fn constrain(&mut self, active: ActiveStates) {
        let mask = active.mask();
        let mut p = (self.p + self.p.transpose()) * 0.5;

        for i in 0..STATE_DIM {
            if mask[i] == 0.0 {
                p.row_mut(i).fill(0.0);
                p.column_mut(i).fill(0.0);
            }
            let d = p[(i, i)];
            p[(i, i)] = if d.is_finite() { d.max(0.0) } else { 0.0 };
        }

        for i in 0..STATE_DIM {
            for j in (i + 1)..STATE_DIM {
                let bound = (p[(i, i)] * p[(j, j)]).sqrt();
                let v = p[(i, j)];
                let clamped = if v > bound {
                    bound
                } else if v < -bound {
                    -bound
                } else if v.is_nan() {
                    0.0
                } else {
                    v
                };
                p[(i, j)] = clamped;
                p[(j, i)] = clamped;
            }
        }

        self.p = p;
    }
}

// ---------------------------------------------------------------------------
// STORE
// ---------------------------------------------------------------------------
/// Nominal state, error covariance and the active-state mask, mutated only
/// through prediction, correction and reset.
#[derive(Clone, Copy, Debug)]
pub struct StateStore {
    pub(crate) nominal: NominalState,
    pub(crate) covariance: StateCovariance,
    pub(crate) active: ActiveStates,
}

impl StateStore {
    pub fn new(nominal: NominalState, initial_variances: &ErrorVector, active: ActiveStates) -> Self {
        let mut covariance = StateCovariance {
            p: ErrorCovariance::from_diagonal(initial_variances),
        };
        covariance.constrain(active);
        Self {
            nominal,
            covariance,
            active,
        }
    }

    pub fn nominal(&self) -> &NominalState {
        &self.nominal
    }

    pub fn covariance(&self) -> &StateCovariance {
        &self.covariance
    }

    pub fn active(&self) -> ActiveStates {
        self.active
    }
}

use nalgebra::{SMatrix, SVector};
use tracing::warn;

use crate::gate;
use crate::math::{wrap_pi, Scalar};
use crate::state::{ErrorCovariance, NominalState, StateStore, STATE_DIM};
use crate::status::FilterStatus;

/// Innovation variances below this are treated as a degenerate observation.
const MIN_INNOVATION_VARIANCE: Scalar = 1e-12;

/// Predicted measurement and its Jacobian with respect to the error state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction<const D: usize> {
    pub value: SVector<Scalar, D>,
    pub jacobian: SMatrix<Scalar, D, STATE_DIM>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionOutcome<const D: usize> {
    pub status: FilterStatus,
    pub test_ratio: Scalar,
    pub innovation: SVector<Scalar, D>,
}

impl<const D: usize> FusionOutcome<D> {
    fn singular(innovation: SVector<Scalar, D>) -> Self {
        Self {
            status: FilterStatus::SingularMatrix,
            test_ratio: Scalar::NAN,
            innovation,
        }
    }
}

/// `D x STATE_DIM` Jacobian with identity blocks at each of `starts`.
pub fn block_jacobian<const D: usize>(starts: &[usize]) -> SMatrix<Scalar, D, STATE_DIM> {
    let mut h = SMatrix::<Scalar, D, STATE_DIM>::zeros();
    for &start in starts {
        for i in 0..D {
            h[(i, start + i)] = 1.0;
        }
    }
    h
}

impl StateStore {
    /// Sequential EKF correction with one observation.
    ///
    /// Nothing is mutated unless the innovation passes the gate and the
    /// innovation covariance is well conditioned. Jacobian columns and gain
    /// rows of inactive blocks are masked so frozen states stay frozen.
    pub fn fuse<const D: usize, F>(
        &mut self,
        measured: &SVector<Scalar, D>,
        predict: F,
        noise: &SMatrix<Scalar, D, D>,
        gate_size: Scalar,
        angular: bool,
    ) -> FusionOutcome<D>
    where
        F: FnOnce(&NominalState) -> Option<Prediction<D>>,
    {
        let Some(prediction) = predict(&self.nominal) else {
            warn!("measurement model undefined at the current state");
            return FusionOutcome::singular(SVector::zeros());
        };

        let mask = self.active.mask();
        let mut h = prediction.jacobian;
        for j in 0..STATE_DIM {
            if mask[j] == 0.0 {
                h.column_mut(j).fill(0.0);
            }
        }

        let mut innovation = measured - prediction.value;
        if angular {
            for v in innovation.iter_mut() {
                *v = wrap_pi(*v);
            }
        }

        let p = self.covariance.p;
        let s = h * p * h.transpose() + noise;
        if (0..D).any(|i| !(s[(i, i)] > MIN_INNOVATION_VARIANCE)) {
            return FusionOutcome::singular(innovation);
        }

        let gate_result = gate::check(&innovation, &s, gate_size);
        if !gate_result.accepted {
            return FusionOutcome {
                status: FilterStatus::RejectedInnovation(gate_result.test_ratio),
                test_ratio: gate_result.test_ratio,
                innovation,
            };
        }

        let Some(s_inv) = s.try_inverse() else {
            return FusionOutcome::singular(innovation);
        };

        let mut k_gain = p * h.transpose() * s_inv;
        for i in 0..STATE_DIM {
            if mask[i] == 0.0 {
                k_gain.row_mut(i).fill(0.0);
            }
        }

        let dx = k_gain * innovation;
        if dx.iter().any(|v| !v.is_finite()) {
            return FusionOutcome::singular(innovation);
        }
        self.nominal.inject(&dx);

        let i_minus_kh = ErrorCovariance::identity() - k_gain * h;
        self.covariance.p =
            i_minus_kh * p * i_minus_kh.transpose() + k_gain * noise * k_gain.transpose();
        self.covariance.constrain(self.active);

        FusionOutcome {
            status: FilterStatus::Updated,
            test_ratio: gate_result.test_ratio,
            innovation,
        }
    }
}

use nalgebra::{SMatrix, SVector};

use crate::math::Scalar;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateResult {
    pub accepted: bool,
    /// Largest per-axis `innovation^2 / S_ii`.
    pub test_ratio: Scalar,
}

/// Per-axis consistency test. Accepts iff every normalized squared innovation
/// is within `gate^2`.
///
/// Callers guarantee a strictly positive diagonal of `innovation_cov`.
pub fn check<const D: usize>(
    innovation: &SVector<Scalar, D>,
    innovation_cov: &SMatrix<Scalar, D, D>,
    gate: Scalar,
) -> GateResult {
    let mut test_ratio: Scalar = 0.0;
    for i in 0..D {
        let ratio = innovation[i] * innovation[i] / innovation_cov[(i, i)];
        if ratio.is_nan() || ratio > test_ratio {
            test_ratio = ratio;
        }
        if test_ratio.is_nan() {
            break;
        }
    }
    GateResult {
        accepted: test_ratio <= gate * gate,
        test_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix2, Vector2};

    #[test]
    fn test_gate_boundary() {
        let s = Matrix2::new(4.0, 0.0, 0.0, 1.0);
        // 6^2 / 4 = 9 -> exactly on a gate of 3
        let r = check(&Vector2::new(6.0, 0.0), &s, 3.0);
        assert!(r.accepted);
        assert_eq!(r.test_ratio, 9.0);

        let r = check(&Vector2::new(0.0, 3.1), &s, 3.0);
        assert!(!r.accepted);
    }

    #[test]
    fn test_ratio_is_max_over_axes() {
        let s = Matrix2::new(1.0, 0.5, 0.5, 0.25);
        let r = check(&Vector2::new(1.0, 1.0), &s, 5.0);
        assert_eq!(r.test_ratio, 4.0);
        assert!(r.accepted);
    }

    #[test]
    fn test_nan_is_rejected() {
        let s = Matrix2::identity();
        let r = check(&Vector2::new(Scalar::NAN, 0.0), &s, 5.0);
        assert!(!r.accepted);
    }
}

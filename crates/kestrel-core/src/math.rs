use core::f64::consts::PI;
use nalgebra::{Matrix3, RowVector3, UnitQuaternion, Vector2, Vector3};

// ---------------------------------------------------------------------------
// SCALAR & ALIASES
// ---------------------------------------------------------------------------
pub type Scalar = f64;

pub type Vector2r = Vector2<Scalar>;
pub type Vector3r = Vector3<Scalar>;
pub type Matrix3r = Matrix3<Scalar>;
pub type UnitQuaternionr = UnitQuaternion<Scalar>;

/// Standard gravity, NED down positive.
pub const GRAVITY: Scalar = 9.80665;

pub fn skew_symmetric(v: Vector3r) -> Matrix3r {
    Matrix3r::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Representative of the pair {q, -q} whose scalar part is non-negative.
///
/// Every quaternion comparison goes through this so that two estimates of the
/// same rotation compare equal regardless of sign.
pub fn canonical(q: &UnitQuaternionr) -> UnitQuaternionr {
    if q.quaternion().scalar() < 0.0 {
        UnitQuaternionr::new_unchecked(-q.into_inner())
    } else {
        *q
    }
}

/// Wraps an angle into [-pi, pi).
pub fn wrap_pi(angle: Scalar) -> Scalar {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

/// Heading (rotation about the down axis) of a body-to-frame rotation matrix.
pub fn heading_of(rot: &Matrix3r) -> Scalar {
    rot[(1, 0)].atan2(rot[(0, 0)])
}

/// Gradient of [`heading_of`] with respect to a small frame-side rotation
/// `phi`, where the perturbed matrix is `(I + [phi]x) * rot`.
///
/// Returns `None` near the +-90 deg pitch singularity where heading is
/// undefined.
pub fn heading_gradient(rot: &Matrix3r) -> Option<RowVector3<Scalar>> {
    let (m00, m10, m20) = (rot[(0, 0)], rot[(1, 0)], rot[(2, 0)]);
    let d = m00 * m00 + m10 * m10;
    if d < 1e-9 {
        return None;
    }
    Some(RowVector3::new(-m00 * m20 / d, -m10 * m20 / d, 1.0))
}

/// Roll and pitch of a body whose accelerometer reads `specific_force` while
/// at rest (NED, body z down).
pub fn tilt_from_specific_force(specific_force: &Vector3r) -> (Scalar, Scalar) {
    let f = specific_force;
    let roll = (-f.y).atan2(-f.z);
    let pitch = f.x.atan2((f.y * f.y + f.z * f.z).sqrt());
    (roll, pitch)
}

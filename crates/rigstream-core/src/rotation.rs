//! Unit quaternion helpers
//!
//! All joint rotations are `nalgebra::UnitQuaternion<f64>`. Values coming
//! off the wire are never trusted to be unit length: a slightly denormal
//! quaternion applied to a parent joint would drift every descendant for
//! the rest of the session.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Joint rotation
pub type Rotation = UnitQuaternion<f64>;

/// Joint or root position
pub type Position = Vector3<f64>;

/// Squared norms below this are treated as degenerate
const MIN_NORM_SQUARED: f64 = 1e-12;

/// Build a rotation from `[w, x, y, z]`, normalizing it.
///
/// Returns `None` for non-finite or zero-length input.
pub fn rotation_from_wxyz(wxyz: [f64; 4]) -> Option<Rotation> {
    if wxyz.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let q = Quaternion::new(wxyz[0], wxyz[1], wxyz[2], wxyz[3]);
    if q.norm_squared() < MIN_NORM_SQUARED {
        return None;
    }
    Some(UnitQuaternion::from_quaternion(q))
}

/// Angle between two rotations, in radians (sign-insensitive)
pub fn rotation_distance(a: &Rotation, b: &Rotation) -> f64 {
    a.angle_to(b)
}

/// Compare rotations up to the quaternion double cover
pub fn rotations_close(a: &Rotation, b: &Rotation, epsilon: f64) -> bool {
    rotation_distance(a, b) <= epsilon
}

// Re-export glam for convenience
pub use glam::*;

// EMBER math types
mod bounds;
mod float;
mod ray;

pub use bounds::{Bounds2i, Bounds3};
pub use float::{gamma, next_float_down, next_float_up, offset_ray_origin, ONE_MINUS_EPSILON};
pub use ray::Ray;

/// |a . b|, the workhorse of every transport equation.
#[inline]
pub fn abs_dot(a: Vec3, b: Vec3) -> f32 {
    a.dot(b).abs()
}

/// Build an orthonormal basis around a unit vector `n`.
///
/// Returns two tangent vectors so that `(t, b, n)` is right-handed.
pub fn coordinate_system(n: Vec3) -> (Vec3, Vec3) {
    let t = if n.x.abs() > n.y.abs() {
        Vec3::new(-n.z, 0.0, n.x) / (n.x * n.x + n.z * n.z).sqrt()
    } else {
        Vec3::new(0.0, n.z, -n.y) / (n.y * n.y + n.z * n.z).sqrt()
    };
    (t, n.cross(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abs_dot() {
        let a = Vec3::new(0.0, 1.0, 0.0);
        let b = Vec3::new(0.0, -1.0, 0.0);
        assert_eq!(abs_dot(a, b), 1.0);
    }

    #[test]
    fn test_coordinate_system_orthonormal() {
        for n in [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(0.3, -0.5, 0.8).normalize()] {
            let (t, b) = coordinate_system(n);
            assert!(t.dot(n).abs() < 1e-6);
            assert!(b.dot(n).abs() < 1e-6);
            assert!(t.dot(b).abs() < 1e-6);
            assert!((t.length() - 1.0).abs() < 1e-5);
        }
    }
}

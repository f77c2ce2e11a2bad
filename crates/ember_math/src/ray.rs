use glam::Vec3;

/// A ray in 3D space with a shrinking parametric upper bound.
///
/// `recip_direction` is precomputed for the slab test in [`crate::Bounds3`];
/// `t_max` shrinks monotonically as closer hits are found so later primitive
/// tests can reject early. The `media` stack tracks which participating media
/// the ray is currently inside (indices chosen by the caller); rays are
/// transient, created per query and never shared.
#[derive(Debug, Clone)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub recip_direction: Vec3,
    pub t_max: f32,
    pub media: Vec<usize>,
}

impl Ray {
    /// Create a new ray with an unbounded extent.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            recip_direction: direction.recip(),
            t_max: f32::INFINITY,
            media: Vec::new(),
        }
    }

    /// Get the point along the ray at parameter t.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Record entry into a participating medium.
    pub fn enter_medium(&mut self, medium: usize) {
        self.media.push(medium);
    }

    /// Record exit from a participating medium.
    pub fn exit_medium(&mut self, medium: usize) {
        if let Some(pos) = self.media.iter().rposition(|&m| m == medium) {
            self.media.remove(pos);
        }
    }

    /// The innermost medium the ray is travelling through, if any.
    pub fn current_medium(&self) -> Option<usize> {
        self.media.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert_eq!(ray.at(0.0), Vec3::ZERO);
        assert_eq!(ray.at(2.0), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_recip_direction() {
        let ray = Ray::new(Vec3::ZERO, Vec3::new(2.0, -4.0, 0.5));
        assert_eq!(ray.recip_direction.x, 0.5);
        assert_eq!(ray.recip_direction.y, -0.25);
        assert_eq!(ray.recip_direction.z, 2.0);
    }

    #[test]
    fn test_media_stack() {
        let mut ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert_eq!(ray.current_medium(), None);
        ray.enter_medium(3);
        ray.enter_medium(7);
        assert_eq!(ray.current_medium(), Some(7));
        ray.exit_medium(3);
        assert_eq!(ray.current_medium(), Some(7));
        ray.exit_medium(7);
        assert_eq!(ray.current_medium(), None);
    }
}

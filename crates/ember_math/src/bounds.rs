//! Axis-aligned bounding boxes for spatial acceleration structures.

use glam::{IVec2, Vec3};

use crate::Ray;

/// Axis-aligned 3D bounding box stored as min/max corners.
///
/// The empty box has inverted corners so that the union with any point or box
/// behaves as identity.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Bounds3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Bounds3 {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Bounds3 {
    /// A box that contains nothing.
    pub const EMPTY: Self = Self {
        min: Vec3::INFINITY,
        max: Vec3::NEG_INFINITY,
    };

    /// Create a box from two corner points (any order).
    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// The smallest box containing both operands.
    pub fn union(&self, other: &Bounds3) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grow the box to contain a point.
    pub fn union_point(&self, p: Vec3) -> Self {
        Self {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    /// Center of the box.
    pub fn centroid(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    /// Extent along each axis.
    pub fn diagonal(&self) -> Vec3 {
        self.max - self.min
    }

    /// Index of the axis with the largest extent (0=X, 1=Y, 2=Z).
    pub fn max_extent(&self) -> usize {
        let d = self.diagonal();
        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    /// Total surface area; zero for an empty box.
    pub fn surface_area(&self) -> f32 {
        if self.min.x > self.max.x {
            return 0.0;
        }
        let d = self.diagonal();
        2.0 * (d.x * d.y + d.x * d.z + d.y * d.z)
    }

    /// Position of `p` relative to the box corners, in [0, 1] per axis.
    pub fn offset(&self, p: Vec3) -> Vec3 {
        let mut o = p - self.min;
        let d = self.diagonal();
        for i in 0..3 {
            if d[i] > 0.0 {
                o[i] /= d[i];
            }
        }
        o
    }

    /// Squared distance from a point to the box (zero inside).
    pub fn distance_squared(&self, p: Vec3) -> f32 {
        let d = (self.min - p).max(p - self.max).max(Vec3::ZERO);
        d.length_squared()
    }

    /// Slab-method ray/box test with precomputed reciprocal direction.
    ///
    /// `dir_is_neg` holds the per-axis sign of the ray direction so the near
    /// slab is picked without branching on the reciprocal's sign.
    pub fn intersect_p(&self, ray: &Ray, recip_dir: Vec3, dir_is_neg: [bool; 3]) -> bool {
        let mut t_min = 0.0f32;
        let mut t_max = ray.t_max;
        for axis in 0..3 {
            let (near, far) = if dir_is_neg[axis] {
                (self.max[axis], self.min[axis])
            } else {
                (self.min[axis], self.max[axis])
            };
            let t_near = (near - ray.origin[axis]) * recip_dir[axis];
            let t_far = (far - ray.origin[axis]) * recip_dir[axis];
            t_min = t_min.max(t_near);
            t_max = t_max.min(t_far);
            if t_min > t_max {
                return false;
            }
        }
        true
    }
}

/// Integer 2D bounds, used for image tiles and pixel regions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Bounds2i {
    pub min: IVec2,
    pub max: IVec2,
}

impl Bounds2i {
    pub fn new(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    pub fn diagonal(&self) -> IVec2 {
        self.max - self.min
    }

    pub fn area(&self) -> i32 {
        let d = self.diagonal();
        (d.x.max(0)) * (d.y.max(0))
    }

    /// Clip to the overlap with `other`.
    pub fn intersect(&self, other: &Bounds2i) -> Self {
        Self {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }

    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }
}

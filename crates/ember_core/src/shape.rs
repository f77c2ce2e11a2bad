//! Geometric shapes and their intersection and sampling routines.

use std::sync::Arc;

use ember_math::gamma;
use ember_math::{Bounds3, Ray, Vec2, Vec3};

use crate::sampling::{uniform_sample_sphere, uniform_sample_triangle, Distribution1D};

/// Surface hit record returned by [`Shape::intersect`].
#[derive(Debug, Clone, Copy)]
pub struct ShapeHit {
    pub t: f32,
    pub p: Vec3,
    /// Geometric normal, always unit length, oriented by the surface (not
    /// flipped towards the ray).
    pub n: Vec3,
    /// Conservative bound on the floating point error in `p`, used to offset
    /// spawned rays off the surface.
    pub p_error: Vec3,
}

/// Point sampled on a shape's surface, with the area-measure pdf implied by
/// uniform sampling.
#[derive(Debug, Clone, Copy)]
pub struct ShapePoint {
    pub p: Vec3,
    pub n: Vec3,
    pub p_error: Vec3,
}

/// Triangle soup with shared vertex data. Triangles reference it by index so
/// the positions are stored once no matter how many primitives the mesh
/// expands into.
#[derive(Debug)]
pub struct TriangleMesh {
    pub positions: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
    area_distribution: Distribution1D,
    total_area: f32,
}

impl TriangleMesh {
    pub fn new(positions: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Self {
        let areas: Vec<f32> = indices
            .iter()
            .map(|idx| {
                let [a, b, c] = triangle_vertices(&positions, idx);
                0.5 * (b - a).cross(c - a).length()
            })
            .collect();
        let total_area = areas.iter().sum();
        Self {
            positions,
            indices,
            area_distribution: Distribution1D::new(&areas),
            total_area,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }
}

fn triangle_vertices(positions: &[Vec3], idx: &[u32; 3]) -> [Vec3; 3] {
    [
        positions[idx[0] as usize],
        positions[idx[1] as usize],
        positions[idx[2] as usize],
    ]
}

/// Closed set of supported shapes.
#[derive(Debug, Clone)]
pub enum Shape {
    Sphere(Sphere),
    Triangle(Triangle),
    /// Whole mesh, sampled proportionally to triangle area. Scenes expand
    /// meshes into one [`Shape::Triangle`] primitive per face for
    /// intersection; the mesh variant backs area lights.
    Mesh(Arc<TriangleMesh>),
}

#[derive(Debug, Clone, Copy)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

#[derive(Debug, Clone)]
pub struct Triangle {
    pub mesh: Arc<TriangleMesh>,
    pub tri_index: usize,
}

impl Triangle {
    fn vertices(&self) -> [Vec3; 3] {
        triangle_vertices(&self.mesh.positions, &self.mesh.indices[self.tri_index])
    }
}

impl Shape {
    pub fn intersect(&self, ray: &Ray) -> Option<ShapeHit> {
        match self {
            Shape::Sphere(s) => intersect_sphere(s, ray),
            Shape::Triangle(t) => intersect_triangle(&t.vertices(), ray),
            Shape::Mesh(m) => {
                let mut best: Option<ShapeHit> = None;
                let mut t_max = ray.t_max;
                for idx in &m.indices {
                    let mut clipped = ray.clone();
                    clipped.t_max = t_max;
                    if let Some(hit) = intersect_triangle(&triangle_vertices(&m.positions, idx), &clipped) {
                        t_max = hit.t;
                        best = Some(hit);
                    }
                }
                best
            }
        }
    }

    pub fn intersect_p(&self, ray: &Ray) -> bool {
        match self {
            Shape::Mesh(m) => m
                .indices
                .iter()
                .any(|idx| intersect_triangle(&triangle_vertices(&m.positions, idx), ray).is_some()),
            _ => self.intersect(ray).is_some(),
        }
    }

    pub fn bounds(&self) -> Bounds3 {
        match self {
            Shape::Sphere(s) => Bounds3 {
                min: s.center - Vec3::splat(s.radius),
                max: s.center + Vec3::splat(s.radius),
            },
            Shape::Triangle(t) => {
                let [a, b, c] = t.vertices();
                Bounds3::from_points(a, b).union_point(c)
            }
            Shape::Mesh(m) => m
                .positions
                .iter()
                .fold(Bounds3::EMPTY, |b, &p| b.union_point(p)),
        }
    }

    pub fn area(&self) -> f32 {
        match self {
            Shape::Sphere(s) => 4.0 * std::f32::consts::PI * s.radius * s.radius,
            Shape::Triangle(t) => {
                let [a, b, c] = t.vertices();
                0.5 * (b - a).cross(c - a).length()
            }
            Shape::Mesh(m) => m.total_area,
        }
    }

    /// Uniform-by-area sample of the surface. The implied pdf is
    /// `1 / area()`.
    pub fn sample(&self, u: Vec2) -> ShapePoint {
        match self {
            Shape::Sphere(s) => {
                let n = uniform_sample_sphere(u);
                let p = s.center + s.radius * n;
                ShapePoint {
                    p,
                    n,
                    p_error: gamma(5) * p.abs(),
                }
            }
            Shape::Triangle(t) => sample_triangle(&t.vertices(), u),
            Shape::Mesh(m) => {
                let (tri, _, remapped) = m.area_distribution.sample_discrete_remapped(u.x);
                sample_triangle(
                    &triangle_vertices(&m.positions, &m.indices[tri]),
                    Vec2::new(remapped, u.y),
                )
            }
        }
    }

    /// Area-measure pdf of [`Shape::sample`].
    pub fn pdf(&self) -> f32 {
        let a = self.area();
        if a > 0.0 {
            1.0 / a
        } else {
            0.0
        }
    }
}

fn sample_triangle(v: &[Vec3; 3], u: Vec2) -> ShapePoint {
    let b = uniform_sample_triangle(u);
    let p = b.x * v[0] + b.y * v[1] + (1.0 - b.x - b.y) * v[2];
    let n = (v[1] - v[0]).cross(v[2] - v[0]).normalize();
    let p_abs_sum = b.x * v[0].abs() + b.y * v[1].abs() + (1.0 - b.x - b.y) * v[2].abs();
    ShapePoint {
        p,
        n,
        p_error: gamma(6) * p_abs_sum,
    }
}

fn intersect_sphere(s: &Sphere, ray: &Ray) -> Option<ShapeHit> {
    let oc = ray.origin - s.center;
    let a = ray.direction.length_squared();
    let half_b = oc.dot(ray.direction);
    let c = oc.length_squared() - s.radius * s.radius;
    let discriminant = half_b * half_b - a * c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrt_d = discriminant.sqrt();
    let mut t = (-half_b - sqrt_d) / a;
    if t <= 1e-4 || t >= ray.t_max {
        t = (-half_b + sqrt_d) / a;
        if t <= 1e-4 || t >= ray.t_max {
            return None;
        }
    }
    // Refine the hit point by reprojecting onto the sphere
    let mut p = ray.at(t);
    p = s.center + (p - s.center) * (s.radius / (p - s.center).length());
    let n = (p - s.center) / s.radius;
    Some(ShapeHit {
        t,
        p,
        n,
        p_error: gamma(5) * p.abs(),
    })
}

fn intersect_triangle(v: &[Vec3; 3], ray: &Ray) -> Option<ShapeHit> {
    // Moeller-Trumbore
    let e1 = v[1] - v[0];
    let e2 = v[2] - v[0];
    let pvec = ray.direction.cross(e2);
    let det = e1.dot(pvec);
    if det.abs() < 1e-9 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin - v[0];
    let b1 = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&b1) {
        return None;
    }
    let qvec = tvec.cross(e1);
    let b2 = ray.direction.dot(qvec) * inv_det;
    if b2 < 0.0 || b1 + b2 > 1.0 {
        return None;
    }
    let t = e2.dot(qvec) * inv_det;
    if t <= 1e-4 || t >= ray.t_max {
        return None;
    }
    let b0 = 1.0 - b1 - b2;
    let p = b0 * v[0] + b1 * v[1] + b2 * v[2];
    let p_abs_sum = b0.abs() * v[0].abs() + b1.abs() * v[1].abs() + b2.abs() * v[2].abs();
    Some(ShapeHit {
        t,
        p,
        n: e1.cross(e2).normalize(),
        p_error: gamma(7) * p_abs_sum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_sphere() -> Shape {
        Shape::Sphere(Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        })
    }

    fn quad_mesh() -> Arc<TriangleMesh> {
        Arc::new(TriangleMesh::new(
            vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        ))
    }

    #[test]
    fn test_sphere_intersect_frontal() {
        let s = unit_sphere();
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let hit = s.intersect(&ray).unwrap();
        assert!((hit.t - 4.0).abs() < 1e-4);
        assert!((hit.n - Vec3::NEG_Z).length() < 1e-4);
    }

    #[test]
    fn test_sphere_miss() {
        let s = unit_sphere();
        let ray = Ray::new(Vec3::new(0.0, 2.0, -5.0), Vec3::Z);
        assert!(s.intersect(&ray).is_none());
    }

    #[test]
    fn test_sphere_inside_hits_far_side() {
        let s = unit_sphere();
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let hit = s.intersect(&ray).unwrap();
        assert!((hit.t - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_ray_tmax_rejects_hit() {
        let s = unit_sphere();
        let mut ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        ray.t_max = 3.0;
        assert!(s.intersect(&ray).is_none());
    }

    #[test]
    fn test_triangle_hit_and_barycentric_edges() {
        let mesh = quad_mesh();
        let tri = Shape::Triangle(Triangle {
            mesh,
            tri_index: 0,
        });
        let ray = Ray::new(Vec3::new(0.5, -0.5, -1.0), Vec3::Z);
        let hit = tri.intersect(&ray).unwrap();
        assert!((hit.t - 1.0).abs() < 1e-4);
        let miss = Ray::new(Vec3::new(-0.5, 0.5, -1.0), Vec3::Z);
        assert!(tri.intersect(&miss).is_none());
    }

    #[test]
    fn test_mesh_intersects_closest_face() {
        let mesh = Shape::Mesh(quad_mesh());
        let ray = Ray::new(Vec3::new(-0.5, 0.5, -2.0), Vec3::Z);
        let hit = mesh.intersect(&ray).unwrap();
        assert!((hit.t - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_area() {
        assert!((unit_sphere().area() - 4.0 * std::f32::consts::PI).abs() < 1e-4);
        assert!((Shape::Mesh(quad_mesh()).area() - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_sample_on_surface() {
        let s = unit_sphere();
        let pt = s.sample(Vec2::new(0.3, 0.8));
        assert!((pt.p.length() - 1.0).abs() < 1e-4);
        assert!((pt.n.length() - 1.0).abs() < 1e-4);

        let m = Shape::Mesh(quad_mesh());
        let pt = m.sample(Vec2::new(0.7, 0.2));
        assert!(pt.p.z.abs() < 1e-5);
        assert!(pt.p.x.abs() <= 1.0 + 1e-5 && pt.p.y.abs() <= 1.0 + 1e-5);
    }

    #[test]
    fn test_pdf_is_inverse_area() {
        let m = Shape::Mesh(quad_mesh());
        assert!((m.pdf() - 0.25).abs() < 1e-5);
    }
}

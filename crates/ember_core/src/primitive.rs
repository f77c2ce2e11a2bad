//! Renderable primitives and the intersection record carried by integrators.

use std::sync::Arc;

use ember_math::offset_ray_origin;
use ember_math::{Bounds3, Ray, Vec3};

use crate::light::AreaLight;
use crate::material::Material;
use crate::shape::{Shape, ShapeHit};
use crate::spectrum::Spectrum;

/// A shape bound to an optional material and an optional emitter.
///
/// Purely emissive geometry may omit the material; purely reflective
/// geometry omits the light.
#[derive(Debug, Clone)]
pub struct Primitive {
    pub shape: Arc<Shape>,
    pub material: Option<Arc<Material>>,
    pub area_light: Option<Arc<AreaLight>>,
}

impl Primitive {
    pub fn new(shape: Arc<Shape>, material: Arc<Material>) -> Self {
        Self {
            shape,
            material: Some(material),
            area_light: None,
        }
    }

    pub fn emissive(shape: Arc<Shape>, material: Option<Arc<Material>>, light: Arc<AreaLight>) -> Self {
        Self {
            shape,
            material,
            area_light: Some(light),
        }
    }

    pub fn bounds(&self) -> Bounds3 {
        self.shape.bounds()
    }

    pub fn intersect(&self, ray: &Ray) -> Option<ShapeHit> {
        self.shape.intersect(ray)
    }

    pub fn intersect_p(&self, ray: &Ray) -> bool {
        self.shape.intersect_p(ray)
    }
}

/// Full intersection record: the surface hit plus the primitive that was hit
/// and the direction the ray arrived from.
#[derive(Clone)]
pub struct Intersection<'a> {
    pub p: Vec3,
    pub n: Vec3,
    pub p_error: Vec3,
    /// Direction back towards the ray origin, unit length.
    pub wo: Vec3,
    pub primitive: &'a Primitive,
}

impl<'a> Intersection<'a> {
    pub fn new(hit: &ShapeHit, ray: &Ray, primitive: &'a Primitive) -> Self {
        Self {
            p: hit.p,
            n: hit.n,
            p_error: hit.p_error,
            wo: -ray.direction.normalize(),
            primitive,
        }
    }

    /// Emitted radiance towards `w`, zero if the primitive does not emit.
    pub fn le(&self, w: Vec3) -> Spectrum {
        match &self.primitive.area_light {
            Some(light) => light.l(self.n, w),
            None => Spectrum::ZERO,
        }
    }

    /// Spawn a ray leaving this surface in direction `d`, with its origin
    /// offset along the normal to avoid re-intersecting the surface.
    pub fn spawn_ray(&self, d: Vec3) -> Ray {
        let o = offset_ray_origin(self.p, self.p_error, self.n, d);
        Ray::new(o, d)
    }

    /// Spawn a shadow ray towards `p`, with t_max stopping just short of the
    /// target so the target surface itself is not reported as an occluder.
    pub fn spawn_ray_to(&self, p: Vec3) -> Ray {
        let d = p - self.p;
        let o = offset_ray_origin(self.p, self.p_error, self.n, d);
        let mut ray = Ray::new(o, d);
        ray.t_max = 1.0 - 1e-3;
        ray
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::shape::Sphere;

    fn sphere_primitive() -> Primitive {
        Primitive::new(
            Arc::new(Shape::Sphere(Sphere {
                center: Vec3::ZERO,
                radius: 1.0,
            })),
            Arc::new(Material::diffuse(Spectrum::splat(0.5))),
        )
    }

    #[test]
    fn test_le_zero_without_light() {
        let prim = sphere_primitive();
        let ray = Ray::new(Vec3::new(0.0, 0.0, -3.0), Vec3::Z);
        let hit = prim.intersect(&ray).unwrap();
        let isect = Intersection::new(&hit, &ray, &prim);
        assert_eq!(isect.le(Vec3::NEG_Z), Spectrum::ZERO);
    }

    #[test]
    fn test_spawn_ray_does_not_self_intersect() {
        let prim = sphere_primitive();
        let ray = Ray::new(Vec3::new(0.0, 0.0, -3.0), Vec3::Z);
        let hit = prim.intersect(&ray).unwrap();
        let isect = Intersection::new(&hit, &ray, &prim);
        let bounce = isect.spawn_ray(Vec3::NEG_Z);
        assert!(prim.intersect(&bounce).is_none());
    }

    #[test]
    fn test_spawn_ray_to_stops_before_target() {
        let prim = sphere_primitive();
        let ray = Ray::new(Vec3::new(0.0, 0.0, -3.0), Vec3::Z);
        let hit = prim.intersect(&ray).unwrap();
        let isect = Intersection::new(&hit, &ray, &prim);
        let shadow = isect.spawn_ray_to(Vec3::new(0.0, 0.0, -5.0));
        assert!(shadow.t_max < 1.0);
        assert!(shadow.at(1.0).distance(Vec3::new(0.0, 0.0, -5.0)) < 1e-3);
    }
}

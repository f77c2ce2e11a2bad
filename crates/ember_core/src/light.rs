//! Area lights attached to scene geometry.

use std::f32::consts::PI;

use ember_math::{offset_ray_origin, ONE_MINUS_EPSILON};
use ember_math::{abs_dot, coordinate_system, Ray, Vec2, Vec3};

use std::sync::Arc;

use crate::sampling::{cosine_hemisphere_pdf, cosine_sample_hemisphere};
use crate::shape::Shape;
use crate::spectrum::{Spectrum, SpectrumExt};

/// Direct-lighting sample towards a point on the light.
#[derive(Debug, Clone, Copy)]
pub struct LightLiSample {
    pub li: Spectrum,
    /// Unit direction from the receiving point towards the light sample.
    pub wi: Vec3,
    /// Solid-angle pdf at the receiving point.
    pub pdf: f32,
    pub p_light: Vec3,
    pub n_light: Vec3,
}

/// Emission sample leaving the light, used by light tracing and photon
/// shooting.
#[derive(Debug, Clone)]
pub struct LightLeSample {
    pub le: Spectrum,
    pub ray: Ray,
    pub n_light: Vec3,
    /// Area-measure pdf of the ray origin.
    pub pdf_pos: f32,
    /// Solid-angle pdf of the ray direction given the origin.
    pub pdf_dir: f32,
}

/// Diffuse area emitter over a shape's surface.
#[derive(Debug, Clone)]
pub struct AreaLight {
    pub shape: Arc<Shape>,
    l_emit: Spectrum,
    two_sided: bool,
    area: f32,
}

impl AreaLight {
    pub fn new(l_emit: Spectrum, shape: Arc<Shape>, two_sided: bool) -> Self {
        let area = shape.area();
        Self {
            shape,
            l_emit,
            two_sided,
            area,
        }
    }

    pub fn power(&self) -> Spectrum {
        self.l_emit * self.area * PI * if self.two_sided { 2.0 } else { 1.0 }
    }

    pub fn area(&self) -> f32 {
        self.area
    }

    /// Radiance leaving the surface point with normal `n` towards `w`.
    pub fn l(&self, n: Vec3, w: Vec3) -> Spectrum {
        if self.two_sided || n.dot(w) > 0.0 {
            self.l_emit
        } else {
            Spectrum::ZERO
        }
    }

    /// Sample a point on the light as seen from `ref_p`. Returns None when
    /// the sampled point is sideways-on or coincident with `ref_p`.
    pub fn sample_li(&self, ref_p: Vec3, u: Vec2) -> Option<LightLiSample> {
        let pt = self.shape.sample(u);
        let d = pt.p - ref_p;
        let dist2 = d.length_squared();
        if dist2 == 0.0 {
            return None;
        }
        let wi = d / dist2.sqrt();
        let cos_light = abs_dot(pt.n, wi);
        if cos_light == 0.0 {
            return None;
        }
        // Convert the 1/area pdf to solid angle at the receiver
        let pdf = dist2 / (cos_light * self.area);
        let li = self.l(pt.n, -wi);
        if li.is_black() {
            return None;
        }
        Some(LightLiSample {
            li,
            wi,
            pdf,
            p_light: pt.p,
            n_light: pt.n,
        })
    }

    /// Solid-angle pdf of `sample_li` choosing direction `wi` from `ref_p`.
    pub fn pdf_li(&self, ref_p: Vec3, wi: Vec3) -> f32 {
        let ray = Ray::new(ref_p, wi);
        match self.shape.intersect(&ray) {
            Some(hit) => {
                let cos_light = abs_dot(hit.n, wi);
                if cos_light == 0.0 {
                    return 0.0;
                }
                (hit.p - ref_p).length_squared() / (cos_light * self.area)
            }
            None => 0.0,
        }
    }

    /// Sample an emitted ray: uniform position over the surface, cosine
    /// distributed direction about the surface normal (both sides when the
    /// light is two sided).
    pub fn sample_le(&self, u1: Vec2, u2: Vec2) -> LightLeSample {
        let pt = self.shape.sample(u1);
        let (w_local, pdf_dir) = if self.two_sided {
            let mut u = u2;
            let mut w;
            if u.x < 0.5 {
                u.x = (u.x * 2.0).min(ONE_MINUS_EPSILON);
                w = cosine_sample_hemisphere(u);
            } else {
                u.x = ((u.x - 0.5) * 2.0).min(ONE_MINUS_EPSILON);
                w = cosine_sample_hemisphere(u);
                w.z = -w.z;
            }
            (w, 0.5 * cosine_hemisphere_pdf(w.z.abs()))
        } else {
            let w = cosine_sample_hemisphere(u2);
            (w, cosine_hemisphere_pdf(w.z))
        };
        let (v1, v2) = coordinate_system(pt.n);
        let w = w_local.x * v1 + w_local.y * v2 + w_local.z * pt.n;
        let origin = offset_ray_origin(pt.p, pt.p_error, pt.n, w);
        LightLeSample {
            le: self.l(pt.n, w),
            ray: Ray::new(origin, w),
            n_light: pt.n,
            pdf_pos: 1.0 / self.area,
            pdf_dir,
        }
    }

    /// Pdfs of `sample_le` producing a ray leaving in `dir` from a point with
    /// normal `n_light`.
    pub fn pdf_le(&self, dir: Vec3, n_light: Vec3) -> (f32, f32) {
        let cos_theta = n_light.dot(dir);
        let pdf_dir = if self.two_sided {
            0.5 * cosine_hemisphere_pdf(cos_theta.abs())
        } else if cos_theta > 0.0 {
            cosine_hemisphere_pdf(cos_theta)
        } else {
            0.0
        };
        (1.0 / self.area, pdf_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Sphere;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sphere_light(two_sided: bool) -> AreaLight {
        AreaLight::new(
            Spectrum::splat(4.0),
            Arc::new(Shape::Sphere(Sphere {
                center: Vec3::ZERO,
                radius: 0.5,
            })),
            two_sided,
        )
    }

    #[test]
    fn test_power() {
        let light = sphere_light(false);
        let expected = 4.0 * light.area() * PI;
        assert!((light.power().x - expected).abs() < 1e-3);
        assert!((sphere_light(true).power().x - 2.0 * expected).abs() < 1e-3);
    }

    #[test]
    fn test_one_sided_emission_gated_by_normal() {
        let light = sphere_light(false);
        let n = Vec3::Z;
        assert!(!light.l(n, Vec3::new(0.1, 0.0, 1.0)).is_black());
        assert!(light.l(n, Vec3::new(0.1, 0.0, -1.0)).is_black());
        assert!(!sphere_light(true).l(n, Vec3::new(0.1, 0.0, -1.0)).is_black());
    }

    #[test]
    fn test_sample_li_pdf_geometry() {
        let light = sphere_light(true);
        let ref_p = Vec3::new(0.0, 0.0, -5.0);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..64 {
            let u = Vec2::new(rng.gen(), rng.gen());
            if let Some(s) = light.sample_li(ref_p, u) {
                let d2 = (s.p_light - ref_p).length_squared();
                let expected = d2 / (abs_dot(s.n_light, s.wi) * light.area());
                assert!((s.pdf - expected).abs() / expected < 1e-4);
                assert!((s.wi.length() - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_pdf_li_zero_on_miss() {
        let light = sphere_light(false);
        assert_eq!(light.pdf_li(Vec3::new(0.0, 0.0, -5.0), Vec3::NEG_Z), 0.0);
        assert!(light.pdf_li(Vec3::new(0.0, 0.0, -5.0), Vec3::Z) > 0.0);
    }

    #[test]
    fn test_sample_le_leaves_surface() {
        let light = sphere_light(false);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..64 {
            let s = light.sample_le(
                Vec2::new(rng.gen(), rng.gen()),
                Vec2::new(rng.gen(), rng.gen()),
            );
            assert!(s.pdf_pos > 0.0);
            assert!(s.pdf_dir >= 0.0);
            // One-sided light emits away from the surface
            assert!(s.ray.direction.dot(s.n_light) >= 0.0);
            assert!(!s.le.is_black());
        }
    }

    #[test]
    fn test_pdf_le_matches_sample() {
        let light = sphere_light(false);
        let n = Vec3::Z;
        let dir = Vec3::new(0.0, 0.6, 0.8);
        let (pdf_pos, pdf_dir) = light.pdf_le(dir, n);
        assert!((pdf_pos - 1.0 / light.area()).abs() < 1e-5);
        assert!((pdf_dir - cosine_hemisphere_pdf(0.8)).abs() < 1e-5);
        let (_, pdf_back) = light.pdf_le(-dir, n);
        assert_eq!(pdf_back, 0.0);
    }
}

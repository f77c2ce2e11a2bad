//! Thin-lens perspective camera with an importance emission model.
//!
//! The camera is symmetric with area lights: `we`/`pdf_we`/`sample_wi`
//! mirror a light's `l`/`pdf_le`/`sample_li`, which is what lets the light
//! tracer and BDPT connect path vertices to the lens.

use std::f32::consts::PI;

use ember_math::{abs_dot, Ray, Vec2, Vec3};

use crate::sampling::concentric_sample_disk;
use crate::spectrum::Spectrum;

/// Result of sampling the lens as seen from a scene point.
#[derive(Debug, Clone, Copy)]
pub struct CameraWiSample {
    /// Importance carried along `wi`.
    pub we: Spectrum,
    /// Unit direction from the reference point towards the lens sample.
    pub wi: Vec3,
    /// Solid-angle pdf at the reference point.
    pub pdf: f32,
    pub p_lens: Vec3,
    pub n_lens: Vec3,
    /// Raster position the connection contributes to.
    pub p_raster: Vec2,
}

#[derive(Debug, Clone)]
pub struct Camera {
    eye: Vec3,
    right: Vec3,
    up: Vec3,
    forward: Vec3,
    resolution: (u32, u32),
    tan_half_fov: f32,
    aspect: f32,
    lens_radius: f32,
    focal_distance: f32,
    /// Area of the virtual film rectangle on the z = 1 camera plane.
    film_area: f32,
}

impl Camera {
    pub fn new(
        eye: Vec3,
        target: Vec3,
        up_hint: Vec3,
        fov_y_degrees: f32,
        resolution: (u32, u32),
        lens_radius: f32,
        focal_distance: f32,
    ) -> Self {
        let forward = (target - eye).normalize();
        let right = forward.cross(up_hint).normalize();
        let up = right.cross(forward);
        let tan_half_fov = (fov_y_degrees.to_radians() * 0.5).tan();
        let aspect = resolution.0 as f32 / resolution.1 as f32;
        let film_area = 4.0 * tan_half_fov * tan_half_fov * aspect;
        Self {
            eye,
            right,
            up,
            forward,
            resolution,
            tan_half_fov,
            aspect,
            lens_radius,
            focal_distance,
            film_area,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Lens centre in world space.
    pub fn position(&self) -> Vec3 {
        self.eye
    }

    /// Lens-plane normal, pointing into the scene.
    pub fn lens_normal(&self) -> Vec3 {
        self.forward
    }

    fn lens_area(&self) -> f32 {
        if self.lens_radius > 0.0 {
            PI * self.lens_radius * self.lens_radius
        } else {
            1.0
        }
    }

    fn to_world(&self, v: Vec3) -> Vec3 {
        v.x * self.right + v.y * self.up + v.z * self.forward
    }

    fn to_camera(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.right), v.dot(self.up), v.dot(self.forward))
    }

    /// Camera-space direction through the raster position, unnormalized
    /// (z component is 1).
    fn raster_to_camera(&self, p_raster: Vec2) -> Vec3 {
        let ndc_x = 2.0 * p_raster.x / self.resolution.0 as f32 - 1.0;
        let ndc_y = 1.0 - 2.0 * p_raster.y / self.resolution.1 as f32;
        Vec3::new(
            ndc_x * self.tan_half_fov * self.aspect,
            ndc_y * self.tan_half_fov,
            1.0,
        )
    }

    /// Generate the primary ray through `u_film` (raster coordinates);
    /// `u_lens` picks the aperture point when depth of field is enabled.
    pub fn generate_ray(&self, u_film: Vec2, u_lens: Vec2) -> Ray {
        let mut d = self.raster_to_camera(u_film).normalize();
        let mut o = Vec3::ZERO;
        if self.lens_radius > 0.0 {
            let p_lens = concentric_sample_disk(u_lens) * self.lens_radius;
            let ft = self.focal_distance / d.z;
            let p_focus = d * ft;
            o = Vec3::new(p_lens.x, p_lens.y, 0.0);
            d = (p_focus - o).normalize();
        }
        Ray::new(self.eye + self.to_world(o), self.to_world(d))
    }

    /// Importance emitted along `ray` (which must originate on the lens) and
    /// the raster position it corresponds to. None when the ray points away
    /// from the film or misses it.
    pub fn we(&self, ray: &Ray) -> Option<(Spectrum, Vec2)> {
        let cos_theta = ray.direction.dot(self.forward);
        if cos_theta <= 0.0 {
            return None;
        }
        let focus_t = if self.lens_radius > 0.0 {
            self.focal_distance
        } else {
            1.0
        } / cos_theta;
        let p_focus = self.to_camera(ray.at(focus_t) - self.eye);
        let on_plane = p_focus / p_focus.z;
        let ndc_x = on_plane.x / (self.tan_half_fov * self.aspect);
        let ndc_y = on_plane.y / self.tan_half_fov;
        let raster = Vec2::new(
            (ndc_x + 1.0) * 0.5 * self.resolution.0 as f32,
            (1.0 - ndc_y) * 0.5 * self.resolution.1 as f32,
        );
        if raster.x < 0.0
            || raster.x >= self.resolution.0 as f32
            || raster.y < 0.0
            || raster.y >= self.resolution.1 as f32
        {
            return None;
        }
        let cos2 = cos_theta * cos_theta;
        let w = 1.0 / (self.film_area * self.lens_area() * cos2 * cos2);
        Some((Spectrum::splat(w), raster))
    }

    /// Pdfs of `generate_ray` producing `ray`: area density on the lens and
    /// solid-angle density of the direction.
    pub fn pdf_we(&self, ray: &Ray) -> (f32, f32) {
        let cos_theta = ray.direction.dot(self.forward);
        if cos_theta <= 0.0 {
            return (0.0, 0.0);
        }
        (
            1.0 / self.lens_area(),
            1.0 / (self.film_area * cos_theta * cos_theta * cos_theta),
        )
    }

    /// Sample a lens point as seen from `ref_p`, for connecting path vertices
    /// to the camera.
    pub fn sample_wi(&self, ref_p: Vec3, u: Vec2) -> Option<CameraWiSample> {
        let p_lens = concentric_sample_disk(u) * self.lens_radius;
        let p_lens_world = self.eye + self.to_world(Vec3::new(p_lens.x, p_lens.y, 0.0));
        let d = p_lens_world - ref_p;
        let dist = d.length();
        if dist == 0.0 {
            return None;
        }
        let wi = d / dist;
        let n_lens = self.forward;
        let pdf = (dist * dist) / (abs_dot(n_lens, wi) * self.lens_area());
        let ray = Ray::new(p_lens_world, -wi);
        let (we, p_raster) = self.we(&ray)?;
        Some(CameraWiSample {
            we,
            wi,
            pdf,
            p_lens: p_lens_world,
            n_lens,
            p_raster,
        })
    }
}

//! The four light-transport integrators and their shared plumbing.
//!
//! Every integrator consumes the same immutable [`RenderContext`] (BVH, light
//! list, camera) and writes into a film behind a mutex. Tiles are handed out
//! by the driver through the worker pool; integrators only see one tile at a
//! time.

mod bdpt;
mod lighttrace;
mod path;
mod sppm;

use std::sync::Arc;
use std::sync::Mutex;

use ember_core::{
    abs_dot, AreaLight, Camera, Film, Intersection, Ray, Sampler, Spectrum, SpectrumExt,
};
use ember_math::Bounds2i;

use crate::accel::Bvh;
use crate::parallel::Scheduler;

pub use bdpt::BdptIntegrator;
pub use lighttrace::LightTraceIntegrator;
pub use path::PathIntegrator;
pub use sppm::SppmIntegrator;

/// Everything an integrator reads while tracing. Borrowed from the driver
/// for the duration of one render.
pub struct RenderContext<'a> {
    pub bvh: &'a Bvh,
    pub lights: &'a [Arc<AreaLight>],
    pub camera: &'a Camera,
}

impl<'a> RenderContext<'a> {
    pub fn intersect(&self, ray: &mut Ray) -> Option<Intersection<'a>> {
        self.bvh.intersect(ray)
    }

    pub fn intersect_p(&self, ray: &Ray) -> bool {
        self.bvh.intersect_p(ray)
    }

    /// Next-event estimation: pick one light uniformly, sample a point on it
    /// and return the BSDF-weighted contribution if the point is visible.
    pub fn uniform_sample_one_light(
        &self,
        isect: &Intersection<'_>,
        sampler: &mut dyn Sampler,
    ) -> Spectrum {
        let num_lights = self.lights.len();
        if num_lights == 0 {
            return Spectrum::ZERO;
        }
        let idx = ((sampler.get_1d() * num_lights as f32) as usize).min(num_lights - 1);
        let pdf_choice = 1.0 / num_lights as f32;
        let ls = match self.lights[idx].sample_li(isect.p, sampler.get_2d()) {
            Some(ls) if ls.pdf > 0.0 && !ls.li.is_black() => ls,
            _ => return Spectrum::ZERO,
        };
        let material = match &isect.primitive.material {
            Some(m) => m,
            None => return Spectrum::ZERO,
        };
        let f = material.f(isect.wo, ls.wi, isect.n);
        if f.is_black() {
            return Spectrum::ZERO;
        }
        if self.intersect_p(&isect.spawn_ray_to(ls.p_light)) {
            return Spectrum::ZERO;
        }
        f * abs_dot(ls.wi, isect.n) * ls.li / (ls.pdf * pdf_choice)
    }
}

/// One light-transport algorithm. The driver runs `passes()` sweeps over the
/// image; each sweep calls `begin_pass` once and then `render_tile` for every
/// film tile, and `finish` resolves integrator-owned state after the last
/// sweep.
pub trait Integrator: Send + Sync {
    fn passes(&self) -> u32 {
        1
    }

    fn begin_pass(&self, _ctx: &RenderContext<'_>, _scheduler: &Scheduler, _pass: u32) {}

    fn render_tile(&self, ctx: &RenderContext<'_>, film: &Mutex<Film>, tile: Bounds2i, pass: u32);

    fn finish(&self, _ctx: &RenderContext<'_>, _film: &Mutex<Film>) {}
}

/// Deterministic per-tile sampler seed; distinct across tiles and passes.
pub(crate) fn tile_seed(tile: Bounds2i, pass: u32) -> u64 {
    let x = tile.min.x as u32 as u64;
    let y = tile.min.y as u32 as u64;
    (x << 40) ^ (y << 16) ^ pass as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{Material, Scene, Shape, StratifiedSampler, TriangleMesh, Vec3};

    use crate::accel::SplitMethod;

    fn quad_mesh(corners: [Vec3; 4]) -> Shape {
        Shape::Mesh(Arc::new(TriangleMesh::new(
            corners.to_vec(),
            vec![[0, 1, 2], [0, 2, 3]],
        )))
    }

    /// Diffuse floor at y = 0 lit by a small emitter square overhead.
    fn floor_and_light(le: f32, half: f32, height: f32) -> Scene {
        let mut scene = Scene::new();
        scene.add(
            quad_mesh([
                Vec3::new(-100.0, 0.0, -100.0),
                Vec3::new(-100.0, 0.0, 100.0),
                Vec3::new(100.0, 0.0, 100.0),
                Vec3::new(100.0, 0.0, -100.0),
            ]),
            Material::diffuse(Spectrum::splat(1.0)),
        );
        scene.add_light(
            quad_mesh([
                Vec3::new(-half, height, -half),
                Vec3::new(half, height, -half),
                Vec3::new(half, height, half),
                Vec3::new(-half, height, half),
            ]),
            Spectrum::splat(le),
            true,
            None,
        );
        scene
    }

    fn context<'a>(bvh: &'a Bvh, scene: &'a Scene, camera: &'a Camera) -> RenderContext<'a> {
        RenderContext {
            bvh,
            lights: scene.lights(),
            camera,
        }
    }

    fn test_camera() -> Camera {
        Camera::new(
            Vec3::new(0.0, 5.0, -10.0),
            Vec3::ZERO,
            Vec3::Y,
            45.0,
            (32, 32),
            0.0,
            1.0,
        )
    }

    #[test]
    fn test_direct_lighting_matches_analytic() {
        // A tiny light overhead behaves like a point source, so the direct
        // lighting estimate at the origin tends to
        // (rho/pi) * Le * A * cos^2 / d^2 with both cosines equal to 1.
        let le = 40.0;
        let half = 0.05;
        let height = 10.0;
        let scene = floor_and_light(le, half, height);
        let bvh = Bvh::build(scene.primitives().to_vec(), 4, SplitMethod::Sah);
        let camera = test_camera();
        let ctx = context(&bvh, &scene, &camera);

        // hit the floor right below the light
        let mut ray = Ray::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, -1.0, 0.0));
        let isect = ctx.intersect(&mut ray).expect("floor hit");
        assert!(isect.primitive.area_light.is_none());

        let mut sampler = StratifiedSampler::new(1, 42);
        sampler.start_pixel(0, 0);
        let trials = 2000;
        let mut sum = Spectrum::ZERO;
        for _ in 0..trials {
            sum += ctx.uniform_sample_one_light(&isect, &mut sampler);
        }
        let mean = sum / trials as f32;

        let area = (2.0 * half) * (2.0 * half);
        let expected = le * area / (std::f32::consts::PI * height * height);
        assert!(
            (mean.x - expected).abs() < 0.05 * expected,
            "mean {} expected {}",
            mean.x,
            expected
        );
    }

    #[test]
    fn test_direct_lighting_no_lights() {
        let mut scene = Scene::new();
        scene.add(
            quad_mesh([
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, -1.0),
            ]),
            Material::diffuse(Spectrum::splat(0.5)),
        );
        let bvh = Bvh::build(scene.primitives().to_vec(), 4, SplitMethod::Middle);
        let camera = test_camera();
        let ctx = context(&bvh, &scene, &camera);

        let mut ray = Ray::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, -1.0, 0.0));
        let isect = ctx.intersect(&mut ray).unwrap();
        let mut sampler = StratifiedSampler::new(1, 1);
        sampler.start_pixel(0, 0);
        assert!(ctx
            .uniform_sample_one_light(&isect, &mut sampler)
            .is_black());
    }

    #[test]
    fn test_direct_lighting_occluded() {
        let mut scene = floor_and_light(10.0, 1.0, 10.0);
        // blocker between floor and light
        scene.add(
            quad_mesh([
                Vec3::new(-5.0, 5.0, -5.0),
                Vec3::new(-5.0, 5.0, 5.0),
                Vec3::new(5.0, 5.0, 5.0),
                Vec3::new(5.0, 5.0, -5.0),
            ]),
            Material::diffuse(Spectrum::splat(0.5)),
        );
        let bvh = Bvh::build(scene.primitives().to_vec(), 4, SplitMethod::Sah);
        let camera = test_camera();
        let ctx = context(&bvh, &scene, &camera);

        let mut ray = Ray::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, -1.0, 0.0));
        let isect = ctx.intersect(&mut ray).unwrap();
        let mut sampler = StratifiedSampler::new(1, 9);
        sampler.start_pixel(0, 0);
        for _ in 0..32 {
            assert!(ctx
                .uniform_sample_one_light(&isect, &mut sampler)
                .is_black());
        }
    }

    #[test]
    fn test_tile_seed_distinct() {
        use ember_math::IVec2;
        let a = Bounds2i::new(IVec2::new(0, 0), IVec2::new(16, 16));
        let b = Bounds2i::new(IVec2::new(16, 0), IVec2::new(32, 16));
        let c = Bounds2i::new(IVec2::new(0, 16), IVec2::new(16, 32));
        assert_ne!(tile_seed(a, 0), tile_seed(b, 0));
        assert_ne!(tile_seed(a, 0), tile_seed(c, 0));
        assert_ne!(tile_seed(a, 0), tile_seed(a, 1));
    }
}

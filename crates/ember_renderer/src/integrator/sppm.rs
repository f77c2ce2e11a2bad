//! Stochastic progressive photon mapping.
//!
//! Each pass shoots a fixed photon budget from the lights into a global map
//! (and, optionally, a caustic map fed only by photons that crossed a
//! specular or glossy surface), then walks one eye path per pixel. Diffuse
//! hits gather from the maps and update a per-pixel statistic whose search
//! radius shrinks across passes; `finish` resolves the accumulated flux into
//! the film.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use ember_core::{
    abs_dot, lowdiscrepancy::radical_inverse, lowdiscrepancy::PRIMES, Film, Material, Sampler,
    Spectrum, SpectrumExt, StratifiedSampler, TransportMode, Vec2,
};
use ember_math::Bounds2i;

use super::{tile_seed, Integrator, RenderContext};
use crate::parallel::Scheduler;
use crate::photon::PhotonMap;

/// Bounce cap for caustic photons, which only store after crossing a
/// non-diffuse surface and may travel far before doing so.
const CAUSTIC_MAX_BOUNCES: u32 = 64;

/// Flux statistic of one pixel for one photon map, updated with the
/// progressive radius-shrinking recurrence.
#[derive(Clone, Copy)]
struct GatherStats {
    radius2: f32,
    n: f32,
    tau: Spectrum,
}

impl GatherStats {
    fn new(initial_radius2: f32) -> Self {
        Self {
            radius2: initial_radius2,
            n: 0.0,
            tau: Spectrum::ZERO,
        }
    }

    /// Fold `m` gathered photons with unnormalised flux `phi` into the
    /// statistic. The first gather adopts the search radius outright; later
    /// gathers keep a 0.7 fraction of the new photons and shrink the radius
    /// to match.
    fn update(&mut self, found_radius2: f32, m: usize, phi: Spectrum) {
        if m == 0 {
            return;
        }
        let m = m as f32;
        if self.n == 0.0 {
            self.radius2 = found_radius2;
            self.n = m;
            self.tau = phi;
        } else {
            let n_new = self.n + 0.7 * m;
            let radius2_new = self.radius2 * n_new / (self.n + m);
            self.tau = (self.tau + phi) * radius2_new / self.radius2;
            self.radius2 = radius2_new;
            self.n = n_new;
        }
    }

    fn flux_estimate(&self, photons_shot: u64) -> Spectrum {
        if photons_shot == 0 || self.radius2 <= 0.0 {
            return Spectrum::ZERO;
        }
        self.tau / (std::f32::consts::PI * self.radius2 * photons_shot as f32)
    }
}

struct SppmPixel {
    ld: Spectrum,
    global: GatherStats,
    caustic: GatherStats,
}

pub struct SppmIntegrator {
    iterations: u32,
    photon_budget: u32,
    caustics: bool,
    max_depth: u32,
    russian_roulette: f32,
    width: u32,
    height: u32,
    pixels: Vec<Mutex<SppmPixel>>,
    global_map: RwLock<PhotonMap>,
    caustic_map: RwLock<PhotonMap>,
    shot_global: AtomicU64,
    shot_caustic: AtomicU64,
}

impl SppmIntegrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: u32,
        height: u32,
        iterations: u32,
        photon_budget: u32,
        gather_count: usize,
        initial_radius2: f32,
        caustics: bool,
        max_depth: u32,
        russian_roulette: f32,
    ) -> Self {
        let pixels = (0..width as usize * height as usize)
            .map(|_| {
                Mutex::new(SppmPixel {
                    ld: Spectrum::ZERO,
                    global: GatherStats::new(initial_radius2),
                    caustic: GatherStats::new(initial_radius2),
                })
            })
            .collect();
        // every bounce of every photon can store at most once
        let global_capacity = photon_budget as usize * max_depth as usize;
        Self {
            iterations: iterations.max(1),
            photon_budget,
            caustics,
            max_depth,
            russian_roulette,
            width,
            height,
            pixels,
            global_map: RwLock::new(PhotonMap::new(global_capacity, gather_count)),
            caustic_map: RwLock::new(PhotonMap::new(photon_budget as usize, gather_count)),
            shot_global: AtomicU64::new(0),
            shot_caustic: AtomicU64::new(0),
        }
    }

    fn pixel(&self, x: i32, y: i32) -> &Mutex<SppmPixel> {
        &self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Emit one photon from the Halton sequence at `index` and store a hit
    /// at every diffuse surface it scatters off.
    fn trace_global_photon(&self, ctx: &RenderContext<'_>, index: u64) {
        let mut dim = 0usize;
        let mut sample = move || {
            let u = radical_inverse(dim % PRIMES.len(), index);
            dim += 1;
            u
        };
        let num_lights = ctx.lights.len();
        if num_lights == 0 {
            return;
        }
        let light_idx = ((sample() * num_lights as f32) as usize).min(num_lights - 1);
        let pdf_choice = 1.0 / num_lights as f32;
        let u1 = Vec2::new(sample(), sample());
        let u2 = Vec2::new(sample(), sample());
        let les = ctx.lights[light_idx].sample_le(u1, u2);
        if les.pdf_pos == 0.0 || les.pdf_dir == 0.0 || les.le.is_black() {
            return;
        }
        let mut power = les.le * abs_dot(les.n_light, les.ray.direction)
            / (les.pdf_pos * les.pdf_dir * pdf_choice);
        let mut ray = les.ray;
        for _ in 0..self.max_depth {
            let isect = match ctx.intersect(&mut ray) {
                Some(isect) => isect,
                None => break,
            };
            let material = match &isect.primitive.material {
                Some(m) => m,
                None => break,
            };
            if matches!(material.as_ref(), Material::Diffuse { .. }) {
                let mut map = self.global_map.write().unwrap();
                map.store(isect.p, power, isect.wo);
            }
            if sample() > self.russian_roulette {
                break;
            }
            let u = Vec2::new(sample(), sample());
            let bs = match material.sample(isect.wo, isect.n, u, TransportMode::Importance) {
                Some(bs) if bs.pdf > 0.0 && !bs.f.is_black() => bs,
                _ => break,
            };
            power *= bs.f * abs_dot(bs.wi, isect.n) / (bs.pdf * self.russian_roulette);
            ray = isect.spawn_ray(bs.wi);
        }
    }

    /// Like [`Self::trace_global_photon`], but a photon only stores if it
    /// crossed at least one non-diffuse surface first, and at most once.
    fn trace_caustic_photon(&self, ctx: &RenderContext<'_>, index: u64) {
        let mut dim = 0usize;
        let mut sample = move || {
            let u = radical_inverse(dim % PRIMES.len(), index);
            dim += 1;
            u
        };
        let num_lights = ctx.lights.len();
        if num_lights == 0 {
            return;
        }
        let light_idx = ((sample() * num_lights as f32) as usize).min(num_lights - 1);
        let pdf_choice = 1.0 / num_lights as f32;
        let u1 = Vec2::new(sample(), sample());
        let u2 = Vec2::new(sample(), sample());
        let les = ctx.lights[light_idx].sample_le(u1, u2);
        if les.pdf_pos == 0.0 || les.pdf_dir == 0.0 || les.le.is_black() {
            return;
        }
        let mut power = les.le * abs_dot(les.n_light, les.ray.direction)
            / (les.pdf_pos * les.pdf_dir * pdf_choice);
        let mut ray = les.ray;
        let mut has_glossy = false;
        for _ in 0..CAUSTIC_MAX_BOUNCES {
            let isect = match ctx.intersect(&mut ray) {
                Some(isect) => isect,
                None => break,
            };
            let material = match &isect.primitive.material {
                Some(m) => m,
                None => break,
            };
            let is_diffuse = matches!(material.as_ref(), Material::Diffuse { .. });
            if is_diffuse && has_glossy {
                let mut map = self.caustic_map.write().unwrap();
                map.store(isect.p, power, isect.wo);
                break;
            }
            has_glossy |= !is_diffuse;
            if sample() > self.russian_roulette {
                break;
            }
            let u = Vec2::new(sample(), sample());
            let bs = match material.sample(isect.wo, isect.n, u, TransportMode::Importance) {
                Some(bs) if bs.pdf > 0.0 && !bs.f.is_black() => bs,
                _ => break,
            };
            power *= bs.f * abs_dot(bs.wi, isect.n) / (bs.pdf * self.russian_roulette);
            ray = isect.spawn_ray(bs.wi);
        }
    }
}

impl Integrator for SppmIntegrator {
    fn passes(&self) -> u32 {
        self.iterations
    }

    /// Refill both photon maps for this pass. Shot counters accumulate
    /// across passes so the flux normalisation stays consistent with the
    /// total emitted so far.
    fn begin_pass(&self, ctx: &RenderContext<'_>, scheduler: &Scheduler, pass: u32) {
        let budget = self.photon_budget as u64;
        let stream_base = pass as u64 * 2 * budget;

        {
            let mut map = self.global_map.write().unwrap();
            map.reset();
        }
        scheduler.parallel_for(0, self.photon_budget as i32, |start, end| {
            for i in start..end {
                self.trace_global_photon(ctx, stream_base + i as u64);
            }
        });
        self.global_map.write().unwrap().build();
        self.shot_global.fetch_add(budget, Ordering::Relaxed);

        if self.caustics {
            {
                let mut map = self.caustic_map.write().unwrap();
                map.reset();
            }
            scheduler.parallel_for(0, self.photon_budget as i32, |start, end| {
                for i in start..end {
                    self.trace_caustic_photon(ctx, stream_base + budget + i as u64);
                }
            });
            self.caustic_map.write().unwrap().build();
            self.shot_caustic.fetch_add(budget, Ordering::Relaxed);
        }

        log::debug!(
            "sppm pass {}: {} global / {} caustic photons stored",
            pass,
            self.global_map.read().unwrap().len(),
            self.caustic_map.read().unwrap().len(),
        );
    }

    /// One eye path per pixel. Direct lighting is sampled until the first
    /// diffuse bounce; flux is gathered from the caustic map at the first
    /// diffuse hit and from the global map at the one after it.
    fn render_tile(&self, ctx: &RenderContext<'_>, _film: &Mutex<Film>, tile: Bounds2i, pass: u32) {
        let mut sampler = StratifiedSampler::new(1, tile_seed(tile, pass));
        let global_map = self.global_map.read().unwrap();
        let caustic_map = self.caustic_map.read().unwrap();
        for y in tile.min.y..tile.max.y {
            for x in tile.min.x..tile.max.x {
                sampler.start_pixel(x, y);
                let p_film = sampler.get_2d() + Vec2::new(x as f32, y as f32);
                let mut ray = ctx.camera.generate_ray(p_film, sampler.get_2d());

                let mut ld = Spectrum::ZERO;
                let mut coef = Spectrum::ONE;
                let mut has_glossy = true;
                for _ in 0..self.max_depth {
                    let isect = match ctx.intersect(&mut ray) {
                        Some(isect) => isect,
                        None => break,
                    };
                    if has_glossy {
                        ld += coef * isect.le(isect.wo);
                    }
                    let material = match &isect.primitive.material {
                        Some(m) => m,
                        None => break,
                    };
                    let is_diffuse = matches!(material.as_ref(), Material::Diffuse { .. });
                    if has_glossy || !is_diffuse {
                        ld += coef * ctx.uniform_sample_one_light(&isect, &mut sampler);
                    }
                    if is_diffuse {
                        if has_glossy && self.caustics && !caustic_map.is_empty() {
                            let pixel = self.pixel(x, y);
                            let mut stats = pixel.lock().unwrap();
                            let mut radius2 = stats.caustic.radius2;
                            let (phi, m) = caustic_map.radiance_estimate(&isect, &mut radius2);
                            stats.caustic.update(radius2, m, coef * phi);
                        }
                        if !has_glossy {
                            if !global_map.is_empty() {
                                let pixel = self.pixel(x, y);
                                let mut stats = pixel.lock().unwrap();
                                let mut radius2 = stats.global.radius2;
                                let (phi, m) = global_map.radiance_estimate(&isect, &mut radius2);
                                stats.global.update(radius2, m, coef * phi);
                            }
                            break;
                        }
                    }
                    has_glossy &= !is_diffuse;
                    let bs = match material.sample(
                        isect.wo,
                        isect.n,
                        sampler.get_2d(),
                        TransportMode::Radiance,
                    ) {
                        Some(bs) if bs.pdf > 0.0 && !bs.f.is_black() => bs,
                        _ => break,
                    };
                    coef *= bs.f * abs_dot(bs.wi, isect.n) / bs.pdf;
                    ray = isect.spawn_ray(bs.wi);
                }
                self.pixel(x, y).lock().unwrap().ld += ld;
            }
        }
    }

    /// Resolve direct lighting and both flux statistics into the film.
    fn finish(&self, _ctx: &RenderContext<'_>, film: &Mutex<Film>) {
        let shot_global = self.shot_global.load(Ordering::Relaxed);
        let shot_caustic = self.shot_caustic.load(Ordering::Relaxed);
        let inv_passes = 1.0 / self.iterations as f32;
        let mut film = film.lock().unwrap();
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let stats = self.pixel(x, y).lock().unwrap();
                let l = stats.ld * inv_passes
                    + stats.caustic.flux_estimate(shot_caustic)
                    + stats.global.flux_estimate(shot_global);
                film.add_sample(Vec2::new(x as f32 + 0.5, y as f32 + 0.5), l);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_core::{Camera, Scene, Shape, TriangleMesh, Vec3};
    use ember_math::IVec2;

    use super::*;
    use crate::accel::{Bvh, SplitMethod};

    fn quad_mesh(corners: [Vec3; 4]) -> Shape {
        Shape::Mesh(Arc::new(TriangleMesh::new(
            corners.to_vec(),
            vec![[0, 1, 2], [0, 2, 3]],
        )))
    }

    /// Diffuse floor lit from above. Direct lighting alone must make the
    /// resolved image non-black.
    fn lit_floor_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add(
            quad_mesh([
                Vec3::new(-20.0, 0.0, -20.0),
                Vec3::new(20.0, 0.0, -20.0),
                Vec3::new(20.0, 0.0, 20.0),
                Vec3::new(-20.0, 0.0, 20.0),
            ]),
            Material::diffuse(Spectrum::splat(0.7)),
        );
        scene.add_light(
            quad_mesh([
                Vec3::new(-1.0, 5.0, -1.0),
                Vec3::new(1.0, 5.0, -1.0),
                Vec3::new(1.0, 5.0, 1.0),
                Vec3::new(-1.0, 5.0, 1.0),
            ]),
            Spectrum::splat(30.0),
            true,
            None,
        );
        scene
    }

    #[test]
    fn test_radius_never_grows() {
        let mut stats = GatherStats::new(0.5);
        let mut prev = stats.radius2;
        stats.update(0.3, 20, Spectrum::splat(1.0));
        assert!(stats.radius2 <= prev);
        prev = stats.radius2;
        for _ in 0..10 {
            let r2 = stats.radius2;
            stats.update(r2, 15, Spectrum::splat(0.5));
            assert!(stats.radius2 <= prev);
            prev = stats.radius2;
        }
    }

    #[test]
    fn test_update_ignores_empty_gather() {
        let mut stats = GatherStats::new(0.25);
        stats.update(0.1, 0, Spectrum::splat(9.0));
        assert_eq!(stats.radius2, 0.25);
        assert_eq!(stats.n, 0.0);
        assert!(stats.tau.is_black());
    }

    #[test]
    fn test_flux_estimate_without_photons_is_black() {
        let stats = GatherStats::new(0.25);
        assert!(stats.flux_estimate(0).is_black());
    }

    #[test]
    fn test_lit_scene_resolves_non_black() {
        let scene = lit_floor_scene();
        let bvh = Bvh::build(scene.primitives().to_vec(), 4, SplitMethod::Sah);
        let camera = Camera::new(
            Vec3::new(0.0, 2.0, -8.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::Y,
            45.0,
            (8, 8),
            0.0,
            1.0,
        );
        let ctx = RenderContext {
            bvh: &bvh,
            lights: scene.lights(),
            camera: &camera,
        };
        let integrator = SppmIntegrator::new(8, 8, 2, 2000, 32, 0.05, true, 4, 0.7);
        let scheduler = Scheduler::new(Some(2));
        let film = Mutex::new(Film::new(8, 8));
        let whole = Bounds2i::new(IVec2::new(0, 0), IVec2::new(8, 8));
        for pass in 0..integrator.passes() {
            integrator.begin_pass(&ctx, &scheduler, pass);
            integrator.render_tile(&ctx, &film, whole, pass);
        }
        integrator.finish(&ctx, &film);
        let film = film.lock().unwrap();
        let mut total = Spectrum::ZERO;
        for y in 0..8 {
            for x in 0..8 {
                total += film.pixel_radiance(x, y, 1.0);
            }
        }
        assert!(total.x > 0.0);
    }

    #[test]
    fn test_photon_maps_filled_by_begin_pass() {
        let scene = lit_floor_scene();
        let bvh = Bvh::build(scene.primitives().to_vec(), 4, SplitMethod::Sah);
        let camera = Camera::new(Vec3::new(0.0, 2.0, -8.0), Vec3::ZERO, Vec3::Y, 45.0, (4, 4), 0.0, 1.0);
        let ctx = RenderContext {
            bvh: &bvh,
            lights: scene.lights(),
            camera: &camera,
        };
        let integrator = SppmIntegrator::new(4, 4, 1, 1000, 16, 0.05, false, 4, 0.7);
        let scheduler = Scheduler::new(Some(2));
        integrator.begin_pass(&ctx, &scheduler, 0);
        // a floor under an emitter catches most of the budget
        assert!(integrator.global_map.read().unwrap().len() > 100);
        assert!(integrator.caustic_map.read().unwrap().is_empty());
    }
}

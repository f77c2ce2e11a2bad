//! Particle tracing from the lights.
//!
//! Walks a subpath out of a light for every film sample and connects each of
//! its vertices to a sampled lens point, splatting the contribution at the
//! raster position the camera reports. Pixels the light paths never reach
//! stay black; there is no eye-side walk.

use std::sync::Mutex;

use ember_core::{abs_dot, Film, Sampler, Spectrum, SpectrumExt, StratifiedSampler};
use ember_math::Bounds2i;

use super::bdpt::{generate_light_subpath, Vertex, VertexKind};
use super::{tile_seed, Integrator, RenderContext};

pub struct LightTraceIntegrator {
    samples_per_pixel: u32,
    max_depth: u32,
    russian_roulette: f32,
}

impl LightTraceIntegrator {
    pub fn new(samples_per_pixel: u32, max_depth: u32, russian_roulette: f32) -> Self {
        Self {
            samples_per_pixel,
            max_depth,
            russian_roulette,
        }
    }

    /// Connect every vertex of one light subpath to a sampled lens point.
    fn splat_subpath(
        &self,
        ctx: &RenderContext<'_>,
        film: &Mutex<Film>,
        path: &[Vertex<'_>],
        splat_scale: f32,
        sampler: &mut dyn Sampler,
    ) {
        for pv in path {
            let cws = match ctx.camera.sample_wi(pv.p, sampler.get_2d()) {
                Some(c) => c,
                None => continue,
            };
            if cws.pdf == 0.0 || cws.we.is_black() {
                continue;
            }
            // emission towards the camera, or scattering at an interior
            // vertex whose throughput already folds the emitted radiance
            let fs = match pv.kind {
                VertexKind::Light => match pv.light {
                    Some(light) => light.l(pv.n, cws.wi),
                    None => continue,
                },
                _ => pv.f(&Vertex::camera(cws.p_lens, cws.n_lens, Spectrum::ONE, 0.0)),
            };
            if fs.is_black() {
                continue;
            }
            if ctx.intersect_p(&pv.spawn_ray_to(cws.p_lens)) {
                continue;
            }
            let c = fs * cws.we / cws.pdf * abs_dot(pv.n, cws.wi) * pv.beta;
            if !c.is_black() {
                film.lock().unwrap().add_splat(cws.p_raster, c * splat_scale);
            }
        }
    }
}

impl Integrator for LightTraceIntegrator {
    fn render_tile(&self, ctx: &RenderContext<'_>, film: &Mutex<Film>, tile: Bounds2i, pass: u32) {
        let mut sampler = StratifiedSampler::new(self.samples_per_pixel, tile_seed(tile, pass));
        let splat_scale = 1.0 / self.samples_per_pixel as f32;
        let mut path = Vec::with_capacity(self.max_depth as usize + 1);
        for y in tile.min.y..tile.max.y {
            for x in tile.min.x..tile.max.x {
                sampler.start_pixel(x, y);
                loop {
                    generate_light_subpath(
                        ctx,
                        self.max_depth,
                        0,
                        self.russian_roulette,
                        &mut path,
                        &mut sampler,
                    );
                    self.splat_subpath(ctx, film, &path, splat_scale, &mut sampler);
                    if !sampler.start_next_sample() {
                        break;
                    }
                }
            }
        }
    }
}

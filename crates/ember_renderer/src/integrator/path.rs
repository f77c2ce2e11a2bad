//! Unidirectional path tracer with next-event estimation.

use std::sync::Mutex;

use ember_core::{
    abs_dot, Film, Ray, Sampler, Spectrum, SpectrumExt, StratifiedSampler, TransportMode, Vec2,
};
use ember_math::Bounds2i;

use super::{tile_seed, Integrator, RenderContext};

pub struct PathIntegrator {
    samples_per_pixel: u32,
    max_depth: u32,
    /// Russian-roulette survival probability, applied from the first bounce.
    russian_roulette: f32,
}

impl PathIntegrator {
    pub fn new(samples_per_pixel: u32, max_depth: u32, russian_roulette: f32) -> Self {
        Self {
            samples_per_pixel,
            max_depth,
            russian_roulette,
        }
    }

    fn li(&self, ctx: &RenderContext<'_>, mut ray: Ray, sampler: &mut dyn Sampler) -> Spectrum {
        let mut l = Spectrum::ZERO;
        let mut beta = Spectrum::ONE;
        // whether every bounce so far was specular; gates double-counting of
        // emission against next-event estimation
        let mut specular = true;
        for _ in 0..self.max_depth {
            let isect = match ctx.intersect(&mut ray) {
                Some(isect) => isect,
                None => break,
            };
            if specular {
                l += beta * isect.le(isect.wo);
            }
            l += beta * ctx.uniform_sample_one_light(&isect, sampler);

            if sampler.get_1d() > self.russian_roulette {
                break;
            }
            let material = match &isect.primitive.material {
                Some(m) => m,
                None => break,
            };
            let bs = match material.sample(isect.wo, isect.n, sampler.get_2d(), TransportMode::Radiance)
            {
                Some(bs) if bs.pdf > 0.0 && !bs.f.is_black() => bs,
                _ => break,
            };
            specular = bs.specular;
            beta *= bs.f * abs_dot(bs.wi, isect.n) / (bs.pdf * self.russian_roulette);
            ray = isect.spawn_ray(bs.wi);
        }
        l
    }
}

impl Integrator for PathIntegrator {
    fn render_tile(&self, ctx: &RenderContext<'_>, film: &Mutex<Film>, tile: Bounds2i, pass: u32) {
        let mut film_tile = film.lock().unwrap().tile(tile);
        let mut sampler = StratifiedSampler::new(self.samples_per_pixel, tile_seed(tile, pass));
        for y in tile.min.y..tile.max.y {
            for x in tile.min.x..tile.max.x {
                sampler.start_pixel(x, y);
                loop {
                    let p_film = sampler.get_2d() + Vec2::new(x as f32, y as f32);
                    let ray = ctx.camera.generate_ray(p_film, sampler.get_2d());
                    let l = self.li(ctx, ray, &mut sampler);
                    film_tile.add_sample(p_film, l);
                    if !sampler.start_next_sample() {
                        break;
                    }
                }
            }
        }
        film.lock().unwrap().merge_tile(film_tile);
    }
}

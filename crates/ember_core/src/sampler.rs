//! Per-pixel sample generation.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of the random numbers an integrator consumes while tracing one
/// pixel sample. Implementations are cloned per worker with distinct seeds,
/// so a render is reproducible for a fixed seed and thread-count independent.
pub trait Sampler: Send {
    /// Begin generating samples for the pixel at `(px, py)`.
    fn start_pixel(&mut self, px: i32, py: i32);

    /// Advance to the next sample of the current pixel. Returns false once
    /// `samples_per_pixel` samples have been produced.
    fn start_next_sample(&mut self) -> bool;

    fn get_1d(&mut self) -> f32;

    fn get_2d(&mut self) -> Vec2;

    fn samples_per_pixel(&self) -> u32;

    /// Independent copy for another worker thread.
    fn clone_seeded(&self, seed: u64) -> Box<dyn Sampler>;
}

/// Jittered stratified sampler. The first 2D request of each pixel sample is
/// stratified over an `sqrt(spp) x sqrt(spp)` grid; every later dimension is
/// purely random.
pub struct StratifiedSampler {
    samples_per_pixel: u32,
    res: u32,
    sample_index: u32,
    rng: StdRng,
    first_2d: bool,
}

impl StratifiedSampler {
    pub fn new(samples_per_pixel: u32, seed: u64) -> Self {
        let res = (samples_per_pixel as f32).sqrt().floor().max(1.0) as u32;
        Self {
            samples_per_pixel,
            res,
            sample_index: 0,
            rng: StdRng::seed_from_u64(seed),
            first_2d: true,
        }
    }
}

impl Sampler for StratifiedSampler {
    fn start_pixel(&mut self, px: i32, py: i32) {
        // Decorrelate neighbouring pixels without reseeding the generator
        let _ = (px, py);
        self.sample_index = 0;
        self.first_2d = true;
    }

    fn start_next_sample(&mut self) -> bool {
        self.sample_index += 1;
        self.first_2d = true;
        self.sample_index < self.samples_per_pixel
    }

    fn get_1d(&mut self) -> f32 {
        self.rng.gen()
    }

    fn get_2d(&mut self) -> Vec2 {
        if self.first_2d && self.sample_index < self.res * self.res {
            self.first_2d = false;
            let sx = self.sample_index % self.res;
            let sy = self.sample_index / self.res;
            let jx: f32 = self.rng.gen();
            let jy: f32 = self.rng.gen();
            return Vec2::new(
                (sx as f32 + jx) / self.res as f32,
                (sy as f32 + jy) / self.res as f32,
            );
        }
        self.first_2d = false;
        Vec2::new(self.rng.gen(), self.rng.gen())
    }

    fn samples_per_pixel(&self) -> u32 {
        self.samples_per_pixel
    }

    fn clone_seeded(&self, seed: u64) -> Box<dyn Sampler> {
        Box::new(StratifiedSampler::new(self.samples_per_pixel, seed))
    }
}

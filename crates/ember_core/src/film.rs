//! Film: sample accumulation, splatting and image output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ember_math::{Bounds2i, IVec2, Vec2};

use crate::error::EmberError;
use crate::spectrum::{Spectrum, SpectrumExt};

const FILTER_RADIUS: f32 = 0.5;

/// One pixel of filtered sample accumulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pixel {
    pub contrib_sum: Spectrum,
    pub filter_weight_sum: f32,
}

/// Image-space accumulation buffer.
///
/// Regular camera samples go through `add_sample` (or a [`FilmTile`] merged
/// back later); light-traced contributions that land at arbitrary raster
/// positions go through `add_splat` into a parallel buffer that is scaled
/// separately at output time.
pub struct Film {
    resolution: (u32, u32),
    pixels: Vec<Pixel>,
    splats: Vec<Spectrum>,
}

impl Film {
    pub fn new(width: u32, height: u32) -> Self {
        let n = (width * height) as usize;
        Self {
            resolution: (width, height),
            pixels: vec![Pixel::default(); n],
            splats: vec![Spectrum::ZERO; n],
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn whole_bounds(&self) -> Bounds2i {
        Bounds2i {
            min: IVec2::ZERO,
            max: IVec2::new(self.resolution.0 as i32, self.resolution.1 as i32),
        }
    }

    /// Add a filtered camera sample at continuous raster position `p_film`.
    pub fn add_sample(&mut self, p_film: Vec2, l: Spectrum) {
        let res = self.resolution;
        for (x, y) in filter_support(p_film, self.whole_bounds()) {
            let px = &mut self.pixels[(y as u32 * res.0 + x as u32) as usize];
            px.contrib_sum += l;
            px.filter_weight_sum += 1.0;
        }
    }

    /// Add an unweighted splat at `p`. Splats are averaged by the caller's
    /// `splat_scale` at output time rather than by filter weights.
    pub fn add_splat(&mut self, p: Vec2, v: Spectrum) {
        let x = p.x.floor() as i32;
        let y = p.y.floor() as i32;
        if x < 0 || y < 0 || x >= self.resolution.0 as i32 || y >= self.resolution.1 as i32 {
            return;
        }
        self.splats[(y as u32 * self.resolution.0 + x as u32) as usize] += v;
    }

    /// A private accumulation tile for the given pixel bounds.
    pub fn tile(&self, bounds: Bounds2i) -> FilmTile {
        let clipped = bounds.intersect(&self.whole_bounds());
        FilmTile {
            bounds: clipped,
            pixels: vec![Pixel::default(); clipped.area() as usize],
        }
    }

    pub fn merge_tile(&mut self, tile: FilmTile) {
        let res = self.resolution;
        let w = (tile.bounds.max.x - tile.bounds.min.x) as usize;
        for (i, px) in tile.pixels.iter().enumerate() {
            let x = tile.bounds.min.x as usize + i % w.max(1);
            let y = tile.bounds.min.y as usize + i / w.max(1);
            let dst = &mut self.pixels[y * res.0 as usize + x];
            dst.contrib_sum += px.contrib_sum;
            dst.filter_weight_sum += px.filter_weight_sum;
        }
    }

    /// Resolved radiance of one pixel, splats scaled by `splat_scale`.
    pub fn pixel_radiance(&self, x: u32, y: u32, splat_scale: f32) -> Spectrum {
        let i = (y * self.resolution.0 + x) as usize;
        let px = &self.pixels[i];
        let mut l = if px.filter_weight_sum > 0.0 {
            px.contrib_sum / px.filter_weight_sum
        } else {
            Spectrum::ZERO
        };
        l += self.splats[i] * splat_scale;
        l
    }

    /// 8-bit RGBA frame for display, gamma corrected.
    pub fn to_rgba(&self, splat_scale: f32) -> Vec<u8> {
        let (w, h) = self.resolution;
        let mut out = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let [r, g, b] = self.pixel_radiance(x, y, splat_scale).to_srgb_bytes();
                out.extend_from_slice(&[r, g, b, 255]);
            }
        }
        out
    }

    /// Write a binary `P6` PPM image.
    pub fn write_ppm(&self, path: &Path, splat_scale: f32) -> Result<(), EmberError> {
        let (w, h) = self.resolution;
        log::info!("writing {}x{} PPM to {}", w, h, path.display());
        let mut out = BufWriter::new(File::create(path)?);
        write!(out, "P6\n{} {}\n255\n", w, h)?;
        for y in 0..h {
            for x in 0..w {
                out.write_all(&self.pixel_radiance(x, y, splat_scale).to_srgb_bytes())?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Write a PNG image via the `image` crate.
    pub fn write_png(&self, path: &Path, splat_scale: f32) -> Result<(), EmberError> {
        let (w, h) = self.resolution;
        log::info!("writing {}x{} PNG to {}", w, h, path.display());
        let mut img = image::RgbImage::new(w, h);
        for (x, y, dst) in img.enumerate_pixels_mut() {
            *dst = image::Rgb(self.pixel_radiance(x, y, splat_scale).to_srgb_bytes());
        }
        img.save(path)?;
        Ok(())
    }
}

/// Worker-private film region, merged back under the film lock.
pub struct FilmTile {
    bounds: Bounds2i,
    pixels: Vec<Pixel>,
}

impl FilmTile {
    pub fn bounds(&self) -> Bounds2i {
        self.bounds
    }

    pub fn add_sample(&mut self, p_film: Vec2, l: Spectrum) {
        let w = (self.bounds.max.x - self.bounds.min.x) as usize;
        for (x, y) in filter_support(p_film, self.bounds) {
            let i = (y - self.bounds.min.y) as usize * w + (x - self.bounds.min.x) as usize;
            self.pixels[i].contrib_sum += l;
            self.pixels[i].filter_weight_sum += 1.0;
        }
    }
}

/// Pixels whose box-filter support contains the sample, clipped to `bounds`.
fn filter_support(p_film: Vec2, bounds: Bounds2i) -> impl Iterator<Item = (i32, i32)> {
    // Continuous-to-discrete shift of 0.5
    let dx = p_film.x - 0.5;
    let dy = p_film.y - 0.5;
    let x0 = ((dx - FILTER_RADIUS).ceil() as i32).max(bounds.min.x);
    let x1 = ((dx + FILTER_RADIUS).floor() as i32).min(bounds.max.x - 1);
    let y0 = ((dy - FILTER_RADIUS).ceil() as i32).max(bounds.min.y);
    let y1 = ((dy + FILTER_RADIUS).floor() as i32).min(bounds.max.y - 1);
    (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| (x, y)))
}

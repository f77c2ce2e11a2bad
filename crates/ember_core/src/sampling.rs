//! Sampling routines and distributions shared by all integrators.

use std::f32::consts::{FRAC_1_PI, PI};

use glam::{Vec2, Vec3};

/// Uniform direction on the +z hemisphere.
pub fn uniform_sample_hemisphere(u: Vec2) -> Vec3 {
    let z = u.x;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

pub fn uniform_hemisphere_pdf() -> f32 {
    0.5 * FRAC_1_PI
}

/// Uniform direction on the full sphere.
pub fn uniform_sample_sphere(u: Vec2) -> Vec3 {
    let z = 1.0 - 2.0 * u.x;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

pub fn uniform_sphere_pdf() -> f32 {
    0.25 * FRAC_1_PI
}

/// Uniform barycentric coordinates on a triangle.
pub fn uniform_sample_triangle(u: Vec2) -> Vec2 {
    let su0 = u.x.sqrt();
    Vec2::new(1.0 - su0, u.y * su0)
}

/// Concentric (Shirley) mapping of the unit square onto the unit disk.
pub fn concentric_sample_disk(u: Vec2) -> Vec2 {
    let u_offset = 2.0 * u - Vec2::ONE;
    if u_offset.x == 0.0 && u_offset.y == 0.0 {
        return u_offset;
    }
    let (r, theta) = if u_offset.x.abs() > u_offset.y.abs() {
        (u_offset.x, (PI / 4.0) * (u_offset.y / u_offset.x))
    } else {
        (u_offset.y, (PI / 2.0) - (PI / 4.0) * (u_offset.x / u_offset.y))
    };
    Vec2::new(r * theta.cos(), r * theta.sin())
}

/// Cosine-weighted direction on the +z hemisphere.
pub fn cosine_sample_hemisphere(u: Vec2) -> Vec3 {
    let d = concentric_sample_disk(u);
    let z = (1.0 - d.x * d.x - d.y * d.y).max(0.0).sqrt();
    Vec3::new(d.x, d.y, z)
}

#[inline]
pub fn cosine_hemisphere_pdf(cos_theta: f32) -> f32 {
    cos_theta * FRAC_1_PI
}

#[inline]
pub fn balance_heuristic(nf: i32, f_pdf: f32, ng: i32, g_pdf: f32) -> f32 {
    let f = nf as f32 * f_pdf;
    f / (f + ng as f32 * g_pdf)
}

#[inline]
pub fn power_heuristic(nf: i32, f_pdf: f32, ng: i32, g_pdf: f32) -> f32 {
    let f = nf as f32 * f_pdf;
    let g = ng as f32 * g_pdf;
    (f * f) / (f * f + g * g)
}

/// Distribution of a piecewise-constant 1D function.
///
/// Used to importance-sample a triangle of a mesh light proportionally to its
/// area: an inverse-CDF binary search picks the index, uniform sampling
/// within the element follows.
#[derive(Debug, Clone, Default)]
pub struct Distribution1D {
    func: Vec<f32>,
    cdf: Vec<f32>,
    func_int: f32,
}

impl Distribution1D {
    pub fn new(f: &[f32]) -> Self {
        let n = f.len();
        let mut cdf = vec![0.0; n + 1];
        for i in 1..=n {
            cdf[i] = cdf[i - 1] + f[i - 1] / n as f32;
        }
        let func_int = cdf[n];
        if func_int == 0.0 {
            // Degenerate input: fall back to a uniform distribution
            for (i, c) in cdf.iter_mut().enumerate() {
                *c = i as f32 / n as f32;
            }
        } else {
            for c in cdf.iter_mut() {
                *c /= func_int;
            }
        }
        Self {
            func: f.to_vec(),
            cdf,
            func_int,
        }
    }

    pub fn len(&self) -> usize {
        self.func.len()
    }

    pub fn is_empty(&self) -> bool {
        self.func.is_empty()
    }

    pub fn integral(&self) -> f32 {
        self.func_int
    }

    /// Pick an index with probability proportional to `func[index]`.
    ///
    /// Returns the index and its discrete probability.
    pub fn sample_discrete(&self, u: f32) -> (usize, f32) {
        let offset = find_interval(self.cdf.len(), |idx| self.cdf[idx] <= u);
        (offset, self.cdf[offset + 1] - self.cdf[offset])
    }

    /// Like [`Self::sample_discrete`], but also returns `u` remapped to
    /// `[0, 1)` within the chosen element's stratum so it can be reused.
    pub fn sample_discrete_remapped(&self, u: f32) -> (usize, f32, f32) {
        let (offset, pdf) = self.sample_discrete(u);
        let remapped = if pdf > 0.0 {
            ((u - self.cdf[offset]) / pdf).clamp(0.0, 1.0 - f32::EPSILON)
        } else {
            u
        };
        (offset, pdf, remapped)
    }
}

/// Largest index `i` in `[0, size-2]` such that `pred(i)` holds, assuming
/// `pred` is monotone (true then false). Binary search.
fn find_interval(size: usize, pred: impl Fn(usize) -> bool) -> usize {
    let (mut first, mut len) = (0usize, size);
    while len > 0 {
        let half = len >> 1;
        let middle = first + half;
        if pred(middle) {
            first = middle + 1;
            len -= half + 1;
        } else {
            len = half;
        }
    }
    (first.max(1) - 1).min(size.saturating_sub(2))
}

//! Surface scattering models.

use std::f32::consts::{FRAC_1_PI, PI};

use ember_math::{abs_dot, coordinate_system, Vec2, Vec3};

use crate::sampling::{cosine_hemisphere_pdf, cosine_sample_hemisphere};
use crate::spectrum::{Spectrum, SpectrumExt};

/// Which quantity a path carries. Radiance transport (paths from the camera)
/// and importance transport (paths from a light) scale refracted throughput
/// differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Radiance,
    Importance,
}

/// Result of importance-sampling a material's BSDF.
///
/// `f` is the BSDF value itself (not premultiplied by the cosine); for delta
/// distributions it already folds in the discrete selection probability so
/// that `f * |cos| / pdf` is the correct throughput weight.
#[derive(Debug, Clone, Copy)]
pub struct BsdfSample {
    pub wi: Vec3,
    pub f: Spectrum,
    pub pdf: f32,
    pub specular: bool,
}

/// Closed set of surface materials.
#[derive(Debug, Clone)]
pub enum Material {
    Diffuse {
        reflectance: Spectrum,
    },
    Mirror {
        reflectance: Spectrum,
    },
    Glass {
        reflectance: Spectrum,
        transmittance: Spectrum,
        eta_a: f32,
        eta_b: f32,
    },
    /// Rough conductor coating with a Beckmann microfacet distribution.
    Plastic {
        reflectance: Spectrum,
        eta_a: f32,
        eta_b: f32,
        alpha: f32,
    },
}

impl Material {
    pub fn diffuse(reflectance: Spectrum) -> Self {
        Material::Diffuse { reflectance }
    }

    pub fn mirror(reflectance: Spectrum) -> Self {
        Material::Mirror { reflectance }
    }

    pub fn glass(reflectance: Spectrum, transmittance: Spectrum, eta_a: f32, eta_b: f32) -> Self {
        Material::Glass {
            reflectance,
            transmittance,
            eta_a,
            eta_b,
        }
    }

    pub fn plastic(reflectance: Spectrum, eta_a: f32, eta_b: f32, alpha: f32) -> Self {
        Material::Plastic {
            reflectance,
            eta_a,
            eta_b,
            alpha,
        }
    }

    /// True for materials whose scattering is a delta distribution; their
    /// `f` and `pdf` are identically zero and only `sample` is meaningful.
    pub fn is_delta(&self) -> bool {
        matches!(self, Material::Mirror { .. } | Material::Glass { .. })
    }

    /// BSDF value for the given pair of world-space directions.
    pub fn f(&self, wo: Vec3, wi: Vec3, n: Vec3) -> Spectrum {
        match self {
            Material::Diffuse { reflectance } => {
                if wo.dot(n) * wi.dot(n) > 0.0 {
                    *reflectance * FRAC_1_PI
                } else {
                    Spectrum::ZERO
                }
            }
            Material::Mirror { .. } | Material::Glass { .. } => Spectrum::ZERO,
            Material::Plastic {
                reflectance,
                alpha,
                ..
            } => plastic_f(*reflectance, *alpha, wo, wi, n),
        }
    }

    /// Solid-angle pdf of `sample` producing `wi` given `wo`.
    pub fn pdf(&self, wo: Vec3, wi: Vec3, n: Vec3) -> f32 {
        match self {
            Material::Diffuse { .. } => {
                if wo.dot(n) * wi.dot(n) > 0.0 {
                    cosine_hemisphere_pdf(abs_dot(wi, n))
                } else {
                    0.0
                }
            }
            Material::Mirror { .. } | Material::Glass { .. } => 0.0,
            Material::Plastic { alpha, .. } => plastic_pdf(*alpha, wo, wi, n),
        }
    }

    /// Importance-sample an outgoing direction.
    pub fn sample(&self, wo: Vec3, n: Vec3, u: Vec2, mode: TransportMode) -> Option<BsdfSample> {
        match self {
            Material::Diffuse { .. } => {
                // Sample on wo's side of the surface
                let ns = if wo.dot(n) < 0.0 { -n } else { n };
                let wi = to_world(cosine_sample_hemisphere(u), ns);
                let pdf = self.pdf(wo, wi, n);
                if pdf == 0.0 {
                    return None;
                }
                Some(BsdfSample {
                    wi,
                    f: self.f(wo, wi, n),
                    pdf,
                    specular: false,
                })
            }
            Material::Mirror { reflectance } => {
                let wi = reflect(wo, n);
                Some(BsdfSample {
                    wi,
                    f: *reflectance / abs_dot(wi, n),
                    pdf: 1.0,
                    specular: true,
                })
            }
            Material::Glass {
                reflectance,
                transmittance,
                eta_a,
                eta_b,
            } => {
                let pr = fr_dielectric(wo.dot(n), *eta_a, *eta_b);
                if u.x < pr {
                    let wi = reflect(wo, n);
                    Some(BsdfSample {
                        wi,
                        f: *reflectance * pr / abs_dot(wi, n),
                        pdf: pr,
                        specular: true,
                    })
                } else {
                    let entering = wo.dot(n) > 0.0;
                    let (eta_i, eta_t) = if entering {
                        (*eta_a, *eta_b)
                    } else {
                        (*eta_b, *eta_a)
                    };
                    let nf = if entering { n } else { -n };
                    let wi = refract(wo, nf, eta_i / eta_t)?;
                    let mut ft = *transmittance * (1.0 - pr);
                    // Radiance compresses when entering a denser medium
                    if mode == TransportMode::Radiance {
                        ft *= (eta_i * eta_i) / (eta_t * eta_t);
                    }
                    Some(BsdfSample {
                        wi,
                        f: ft / abs_dot(wi, n),
                        pdf: 1.0 - pr,
                        specular: true,
                    })
                }
            }
            Material::Plastic { alpha, .. } => {
                let (wi, pdf) = plastic_sample_wh(*alpha, wo, n, u)?;
                if pdf == 0.0 {
                    return None;
                }
                let f = self.f(wo, wi, n);
                if f.is_black() {
                    return None;
                }
                Some(BsdfSample {
                    wi,
                    f,
                    pdf,
                    specular: false,
                })
            }
        }
    }
}

#[inline]
fn reflect(wo: Vec3, n: Vec3) -> Vec3 {
    2.0 * wo.dot(n) * n - wo
}

fn refract(wi: Vec3, n: Vec3, eta: f32) -> Option<Vec3> {
    let cos_theta_i = wi.dot(n);
    let sin2_theta_i = (1.0 - cos_theta_i * cos_theta_i).max(0.0);
    let sin2_theta_t = eta * eta * sin2_theta_i;
    if sin2_theta_t >= 1.0 {
        return None;
    }
    let cos_theta_t = (1.0 - sin2_theta_t).sqrt();
    Some(-wi * eta + n * (eta * cos_theta_i - cos_theta_t))
}

fn to_world(a: Vec3, n: Vec3) -> Vec3 {
    let (b, c) = coordinate_system(n);
    a.x * b + a.y * c + a.z * n
}

/// Unpolarized Fresnel reflectance at a dielectric boundary.
pub fn fr_dielectric(cos_theta_i: f32, eta_i: f32, eta_t: f32) -> f32 {
    let mut cos_theta_i = cos_theta_i.clamp(-1.0, 1.0);
    let (eta_i, eta_t) = if cos_theta_i > 0.0 {
        (eta_i, eta_t)
    } else {
        cos_theta_i = cos_theta_i.abs();
        (eta_t, eta_i)
    };
    let sin_theta_i = (1.0 - cos_theta_i * cos_theta_i).max(0.0).sqrt();
    let sin_theta_t = eta_i / eta_t * sin_theta_i;
    if sin_theta_t >= 1.0 {
        return 1.0;
    }
    let cos_theta_t = (1.0 - sin_theta_t * sin_theta_t).max(0.0).sqrt();
    let r_parl = (eta_t * cos_theta_i - eta_i * cos_theta_t) / (eta_t * cos_theta_i + eta_i * cos_theta_t);
    let r_perp = (eta_i * cos_theta_i - eta_t * cos_theta_t) / (eta_i * cos_theta_i + eta_t * cos_theta_t);
    0.5 * (r_parl * r_parl + r_perp * r_perp)
}

/// Abramowitz and Stegun 7.1.26, max absolute error 1.5e-7.
fn erf(x: f32) -> f32 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let y = 1.0
        - (((((1.061405429 * t - 1.453152027) * t) + 1.421413741) * t - 0.284496736) * t
            + 0.254829592)
            * t
            * (-x * x).exp();
    sign * y
}

fn beckmann_lambda(alpha: f32, w: Vec3, n: Vec3) -> f32 {
    let cos_theta = w.dot(n).clamp(-1.0 + 1e-5, 1.0 - 1e-5);
    let theta = cos_theta.acos();
    let a = 1.0 / (alpha * theta.tan());
    0.5 * (erf(a) - 1.0 + (-a * a).exp() / (a * PI))
}

fn beckmann_g(alpha: f32, wo: Vec3, wi: Vec3, n: Vec3) -> f32 {
    1.0 / (1.0 + beckmann_lambda(alpha, wi, n) + beckmann_lambda(alpha, wo, n))
}

fn beckmann_d(alpha: f32, wh: Vec3, n: Vec3) -> f32 {
    let cos_h = wh.dot(n);
    let cos2_h = cos_h * cos_h;
    let tan2_h = (1.0 - cos2_h) / cos2_h;
    let a2 = alpha * alpha;
    (-tan2_h / a2).exp() / (PI * a2 * cos2_h * cos2_h)
}

// Spectral conductor constants for the coating's Fresnel term
const PLASTIC_ETA: Vec3 = Vec3::new(0.21646, 0.42833, 1.3284);
const PLASTIC_K: Vec3 = Vec3::new(3.2390, 2.4599, 1.8661);

fn plastic_f(reflectance: Spectrum, alpha: f32, wo: Vec3, wi: Vec3, n: Vec3) -> Spectrum {
    let cos_o = wo.dot(n);
    let cos_i = wi.dot(n);
    if cos_o <= 0.0 || cos_i <= 0.0 {
        return Spectrum::ZERO;
    }
    let eta_k = PLASTIC_ETA * PLASTIC_ETA + PLASTIC_K * PLASTIC_K;
    let cos2_i = cos_i * cos_i;
    let two_eta_cos = 2.0 * PLASTIC_ETA * cos_i;
    let rs = (eta_k - two_eta_cos + Vec3::splat(cos2_i)) / (eta_k + two_eta_cos + Vec3::splat(cos2_i));
    let rp = (eta_k * cos2_i - two_eta_cos + Vec3::ONE) / (eta_k * cos2_i + two_eta_cos + Vec3::ONE);
    let fresnel = 0.5 * (rs + rp);
    let wh = (wo + wi).normalize();
    reflectance * fresnel * beckmann_g(alpha, wo, wi, n) * beckmann_d(alpha, wh, n)
        / (4.0 * cos_o * cos_i)
}

fn plastic_pdf(alpha: f32, wo: Vec3, wi: Vec3, n: Vec3) -> f32 {
    if wo.dot(n) <= 0.0 || wi.dot(n) <= 0.0 {
        return 0.0;
    }
    let wh = (wo + wi).normalize();
    let cos_h = wh.dot(n);
    if cos_h <= 0.0 || wi.dot(wh) <= 0.0 {
        return 0.0;
    }
    let cos2_h = cos_h * cos_h;
    let tan2_h = (1.0 - cos2_h) / cos2_h;
    let a2 = alpha * alpha;
    let p_h = (-tan2_h / a2).exp() / (a2 * cos2_h * cos_h) * FRAC_1_PI;
    p_h / (4.0 * wi.dot(wh))
}

/// Sample a Beckmann half vector and reflect `wo` about it.
fn plastic_sample_wh(alpha: f32, wo: Vec3, n: Vec3, u: Vec2) -> Option<(Vec3, f32)> {
    let a2 = alpha * alpha;
    let theta = (-a2 * (1.0 - u.x).ln()).max(0.0).sqrt().atan();
    let phi = 2.0 * PI * u.y;
    let cos_h = theta.cos();
    let cos2_h = cos_h * cos_h;
    let sin_h = (1.0 - cos2_h).max(0.0).sqrt();
    let tan2_h = (1.0 - cos2_h) / cos2_h;
    let h = Vec3::new(sin_h * phi.cos(), sin_h * phi.sin(), cos_h);
    let wh = to_world(h, n).normalize();
    if wo.dot(wh) <= 0.0 {
        return None;
    }
    let wi = reflect(wo, wh);
    if wi.dot(wh) <= 0.0 {
        return None;
    }
    let p_h = (-tan2_h / a2).exp() / (a2 * cos2_h * cos_h) * FRAC_1_PI;
    Some((wi, p_h / (4.0 * wi.dot(wh))))
}

//! Bidirectional path tracing with multiple importance sampling.
//!
//! Subpaths are walked from both endpoints with per-vertex area-measure
//! densities (`pdf_fwd` towards the walk, `pdf_rev` backfilled one vertex
//! behind it). Every `(s, t)` pairing of light and eye prefixes is connected
//! and weighted by the power heuristic over the alternative strategies that
//! could have produced the same path. The weight is computed from snapshot
//! arrays assembled per connection; the stored vertices are never mutated.

use std::sync::Mutex;

use ember_core::{
    abs_dot, AreaLight, Film, Intersection, Primitive, Ray, Sampler, Spectrum, SpectrumExt,
    StratifiedSampler, TransportMode, Vec2, Vec3,
};
use ember_math::{offset_ray_origin, Bounds2i};

use super::{tile_seed, Integrator, RenderContext};

/// Bounces before Russian roulette starts on either subpath.
const MIN_RR_DEPTH: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum VertexKind {
    Camera,
    Light,
    Surface,
}

/// One subpath vertex: an endpoint (lens or light surface) or a scattering
/// surface hit, with the throughput accumulated up to it.
#[derive(Clone)]
pub(super) struct Vertex<'a> {
    pub kind: VertexKind,
    pub p: Vec3,
    pub n: Vec3,
    pub p_error: Vec3,
    /// Direction back towards the previous vertex of the walk.
    pub wo: Vec3,
    pub primitive: Option<&'a Primitive>,
    pub light: Option<&'a AreaLight>,
    pub beta: Spectrum,
    /// Area-measure density of the walk reaching this vertex.
    pub pdf_fwd: f32,
    /// Area-measure density of the reverse walk, backfilled.
    pub pdf_rev: f32,
    pub delta: bool,
}

impl<'a> Vertex<'a> {
    pub fn camera(p: Vec3, n: Vec3, beta: Spectrum, pdf_fwd: f32) -> Self {
        Self {
            kind: VertexKind::Camera,
            p,
            n,
            p_error: Vec3::ZERO,
            wo: Vec3::ZERO,
            primitive: None,
            light: None,
            beta,
            pdf_fwd,
            pdf_rev: 0.0,
            delta: false,
        }
    }

    pub fn light(light: &'a AreaLight, p: Vec3, n: Vec3, beta: Spectrum, pdf_fwd: f32) -> Self {
        Self {
            kind: VertexKind::Light,
            p,
            n,
            p_error: Vec3::ZERO,
            wo: Vec3::ZERO,
            primitive: None,
            light: Some(light),
            beta,
            pdf_fwd,
            pdf_rev: 0.0,
            delta: false,
        }
    }

    pub fn surface(isect: &Intersection<'a>, beta: Spectrum) -> Self {
        Self {
            kind: VertexKind::Surface,
            p: isect.p,
            n: isect.n,
            p_error: isect.p_error,
            wo: isect.wo,
            primitive: Some(isect.primitive),
            light: None,
            beta,
            pdf_fwd: 0.0,
            pdf_rev: 0.0,
            delta: false,
        }
    }

    /// Camera vertices sit on the lens, not on scene geometry; density
    /// conversion towards them has no cosine term.
    pub fn is_on_surface(&self) -> bool {
        self.kind != VertexKind::Camera
    }

    /// BSDF towards another vertex. Endpoints scatter nothing.
    pub fn f(&self, to: &Vertex<'_>) -> Spectrum {
        let material = match self.primitive.and_then(|pr| pr.material.as_ref()) {
            Some(m) => m,
            None => return Spectrum::ZERO,
        };
        let wi = (to.p - self.p).normalize();
        material.f(self.wo, wi, self.n)
    }

    /// Emitted radiance towards the previous eye vertex.
    pub fn le(&self) -> Spectrum {
        match self.primitive.and_then(|pr| pr.area_light.as_ref()) {
            Some(light) => light.l(self.n, self.wo),
            None => Spectrum::ZERO,
        }
    }

    /// Turn a solid-angle density at this vertex into an area density at
    /// `to`.
    pub fn convert_density(&self, to: &Vertex<'_>, pdf: f32) -> f32 {
        density_to(self.p, to, pdf)
    }

    /// Shadow ray towards `p`, stopping just short of it.
    pub fn spawn_ray_to(&self, p: Vec3) -> Ray {
        let d = p - self.p;
        let o = if self.p_error == Vec3::ZERO {
            // endpoint vertices carry no reconstructed error bound
            self.p + self.n * 1e-4 * d.dot(self.n).signum()
        } else {
            offset_ray_origin(self.p, self.p_error, self.n, d)
        };
        let mut ray = Ray::new(o, d);
        ray.t_max = 1.0 - 1e-3;
        ray
    }
}

fn density_to(from: Vec3, to: &Vertex<'_>, pdf: f32) -> f32 {
    let d = to.p - from;
    let dist2 = d.length_squared();
    if dist2 == 0.0 {
        return 0.0;
    }
    let inv = 1.0 / dist2;
    let mut pdf = pdf * inv;
    if to.is_on_surface() {
        pdf *= abs_dot(d * inv.sqrt(), to.n);
    }
    pdf
}

/// Extend a subpath by sampling the BSDF at each hit. `path` must already
/// hold the endpoint vertex; returns the number of vertices appended.
#[allow(clippy::too_many_arguments)]
pub(super) fn path_walk<'a>(
    ctx: &RenderContext<'a>,
    mut ray: Ray,
    mut throughput: Spectrum,
    mut pdf_fwd: f32,
    mode: TransportMode,
    max_depth: u32,
    min_rr_depth: u32,
    rr: f32,
    path: &mut Vec<Vertex<'a>>,
    sampler: &mut dyn Sampler,
) -> usize {
    let mut bounces = 0usize;
    while (bounces as u32) < max_depth {
        let isect = match ctx.intersect(&mut ray) {
            Some(isect) => isect,
            None => break,
        };
        let mut v = Vertex::surface(&isect, throughput);
        v.pdf_fwd = path[bounces].convert_density(&v, pdf_fwd);
        path.push(v);
        bounces += 1;

        let rr_p = if (bounces as u32) < min_rr_depth { 1.0 } else { rr };
        if sampler.get_1d() > rr_p {
            break;
        }
        let material = match &isect.primitive.material {
            Some(m) => m,
            None => break,
        };
        let bs = match material.sample(isect.wo, isect.n, sampler.get_2d(), mode) {
            Some(bs) if bs.pdf > 0.0 && !bs.f.is_black() => bs,
            _ => break,
        };
        throughput *= bs.f * abs_dot(bs.wi, isect.n) / (bs.pdf * rr_p);
        let pdf_rev;
        if bs.specular {
            path[bounces].delta = true;
            pdf_fwd = 0.0;
            pdf_rev = 0.0;
        } else {
            pdf_fwd = bs.pdf;
            pdf_rev = material.pdf(bs.wi, isect.wo, isect.n);
        }
        path[bounces - 1].pdf_rev = path[bounces].convert_density(&path[bounces - 1], pdf_rev);
        ray = isect.spawn_ray(bs.wi);
    }
    bounces
}

/// Walk a subpath from the lens. Returns the vertex count (camera vertex
/// included).
pub(super) fn generate_camera_subpath<'a>(
    ctx: &RenderContext<'a>,
    ray: &Ray,
    max_depth: u32,
    min_rr_depth: u32,
    rr: f32,
    path: &mut Vec<Vertex<'a>>,
    sampler: &mut dyn Sampler,
) -> usize {
    path.clear();
    let (pdf_pos, pdf_dir) = ctx.camera.pdf_we(ray);
    if pdf_pos == 0.0 || pdf_dir == 0.0 {
        return 0;
    }
    let n_cam = ctx.camera.lens_normal();
    let beta = Spectrum::splat(1.0 / pdf_pos);
    path.push(Vertex::camera(ray.origin, n_cam, beta, pdf_pos));
    let throughput = match ctx.camera.we(ray) {
        // for this camera model the product collapses to one exactly
        Some((we, _)) => beta * we * abs_dot(n_cam, ray.direction) / pdf_dir,
        None => return 1,
    };
    path_walk(
        ctx,
        ray.clone(),
        throughput,
        pdf_dir,
        TransportMode::Radiance,
        max_depth,
        min_rr_depth,
        rr,
        path,
        sampler,
    ) + 1
}

/// Walk a subpath from a uniformly chosen light. Returns the vertex count
/// (light vertex included), zero when the scene has no lights.
pub(super) fn generate_light_subpath<'a>(
    ctx: &RenderContext<'a>,
    max_depth: u32,
    min_rr_depth: u32,
    rr: f32,
    path: &mut Vec<Vertex<'a>>,
    sampler: &mut dyn Sampler,
) -> usize {
    path.clear();
    let num_lights = ctx.lights.len();
    if num_lights == 0 {
        return 0;
    }
    let idx = ((sampler.get_1d() * num_lights as f32) as usize).min(num_lights - 1);
    let pdf_choice = 1.0 / num_lights as f32;
    let les = ctx.lights[idx].sample_le(sampler.get_2d(), sampler.get_2d());
    if les.pdf_pos == 0.0 || les.pdf_dir == 0.0 || les.le.is_black() {
        return 0;
    }
    let beta = Spectrum::splat(1.0 / (les.pdf_pos * pdf_choice));
    path.push(Vertex::light(
        ctx.lights[idx].as_ref(),
        les.ray.origin,
        les.n_light,
        beta,
        les.pdf_pos * pdf_choice,
    ));
    let throughput = beta * les.le * abs_dot(les.n_light, les.ray.direction) / les.pdf_dir;
    path_walk(
        ctx,
        les.ray.clone(),
        throughput,
        les.pdf_dir,
        TransportMode::Importance,
        max_depth,
        min_rr_depth,
        rr,
        path,
        sampler,
    ) + 1
}

/// Join a light prefix of length `s` with an eye prefix of length `t`.
/// Returns the weighted contribution, and the raster position when the
/// strategy resampled the lens (`t == 1`).
pub(super) fn connect<'a>(
    ctx: &RenderContext<'a>,
    eye: &[Vertex<'a>],
    light: &[Vertex<'a>],
    s: usize,
    t: usize,
    sampler: &mut dyn Sampler,
) -> Option<(Spectrum, Option<Vec2>)> {
    let mut sampled: Option<Vertex<'a>> = None;
    let mut raster = None;

    let l = if s == 0 {
        // the eye path found the light on its own
        let vt = &eye[t - 1];
        vt.beta * vt.le()
    } else if t == 1 {
        // connect a light vertex straight to a sampled lens point
        let vs = &light[s - 1];
        let cws = ctx.camera.sample_wi(vs.p, sampler.get_2d())?;
        if cws.pdf == 0.0 || cws.we.is_black() {
            return None;
        }
        if ctx.intersect_p(&vs.spawn_ray_to(cws.p_lens)) {
            return None;
        }
        raster = Some(cws.p_raster);
        let f = vs.f(&Vertex::camera(cws.p_lens, cws.n_lens, Spectrum::ONE, 0.0));
        if f.is_black() {
            return None;
        }
        let mut c = vs.beta * f * cws.we / cws.pdf;
        if vs.is_on_surface() {
            c *= abs_dot(cws.wi, vs.n);
        }
        sampled = Some(Vertex::camera(cws.p_lens, cws.n_lens, cws.we / cws.pdf, 0.0));
        c
    } else if s == 1 {
        // resample a light point for the eye vertex
        let vt = &eye[t - 1];
        let num_lights = ctx.lights.len();
        if num_lights == 0 {
            return None;
        }
        let idx = ((sampler.get_1d() * num_lights as f32) as usize).min(num_lights - 1);
        let pdf_choice = 1.0 / num_lights as f32;
        let ls = ctx.lights[idx].sample_li(vt.p, sampler.get_2d())?;
        if ls.pdf == 0.0 || ls.li.is_black() {
            return None;
        }
        if ctx.intersect_p(&vt.spawn_ray_to(ls.p_light)) {
            return None;
        }
        let (pdf_pos, _) = ctx.lights[idx].pdf_le(-ls.wi, ls.n_light);
        let lv = Vertex::light(
            ctx.lights[idx].as_ref(),
            ls.p_light,
            ls.n_light,
            ls.li / (ls.pdf * pdf_choice),
            pdf_pos * pdf_choice,
        );
        let f = vt.f(&lv);
        if f.is_black() {
            return None;
        }
        let mut c = vt.beta * f * ls.li / (ls.pdf * pdf_choice);
        if vt.is_on_surface() {
            c *= abs_dot(ls.wi, vt.n);
        }
        sampled = Some(lv);
        c
    } else {
        let vs = &light[s - 1];
        let vt = &eye[t - 1];
        let fs = vs.f(vt);
        let ft = vt.f(vs);
        if fs.is_black() || ft.is_black() {
            return None;
        }
        let g = geometry_term(ctx, vs, vt);
        if g == 0.0 {
            return None;
        }
        vs.beta * fs * g * ft * vt.beta
    };

    if l.is_black() {
        return None;
    }
    let weight = mis_weight(ctx, eye, light, sampled.as_ref(), s, t);
    Some((l * weight, raster))
}

/// Shadow-tested geometry factor between two surface vertices.
fn geometry_term(ctx: &RenderContext<'_>, a: &Vertex<'_>, b: &Vertex<'_>) -> f32 {
    if ctx.intersect_p(&a.spawn_ray_to(b.p)) {
        return 0.0;
    }
    let d = b.p - a.p;
    let dist2 = d.length_squared();
    if dist2 == 0.0 {
        return 0.0;
    }
    let inv = 1.0 / dist2;
    let d = d * inv.sqrt();
    inv * abs_dot(d, a.n) * abs_dot(d, b.n)
}

/// Power-heuristic weight of strategy `(s, t)` among every way the combined
/// path could have been generated.
///
/// Works on snapshot arrays of the forward/reverse densities and delta flags:
/// endpoint substitutions (`s == 1`, `t == 1`) and the reverse densities
/// implied by the connection edge are applied to the copies only.
pub(super) fn mis_weight<'a>(
    ctx: &RenderContext<'a>,
    eye: &[Vertex<'a>],
    light: &[Vertex<'a>],
    sampled: Option<&Vertex<'a>>,
    s: usize,
    t: usize,
) -> f32 {
    if s + t == 2 {
        return 1.0;
    }

    let mut eye_fwd: Vec<f32> = eye[..t].iter().map(|v| v.pdf_fwd).collect();
    let mut eye_rev: Vec<f32> = eye[..t].iter().map(|v| v.pdf_rev).collect();
    let mut eye_delta: Vec<bool> = eye[..t].iter().map(|v| v.delta).collect();
    let mut light_fwd: Vec<f32> = light[..s].iter().map(|v| v.pdf_fwd).collect();
    let mut light_rev: Vec<f32> = light[..s].iter().map(|v| v.pdf_rev).collect();
    let mut light_delta: Vec<bool> = light[..s].iter().map(|v| v.delta).collect();

    // effective endpoints, after any lens/light resampling
    let vt = if t == 1 {
        sampled.expect("t == 1 substitutes the sampled camera vertex")
    } else {
        &eye[t - 1]
    };
    if t == 1 {
        eye_fwd[0] = vt.pdf_fwd;
        eye_rev[0] = 0.0;
    }
    if s == 1 {
        let sampled = sampled.expect("s == 1 substitutes the sampled light vertex");
        light_fwd[0] = sampled.pdf_fwd;
        light_rev[0] = 0.0;
    }
    eye_delta[t - 1] = false;
    if s > 0 {
        light_delta[s - 1] = false;
    }

    if s == 0 {
        // the connection vertex doubles as the light; its reverse densities
        // come from the emission pdfs
        let vt = &eye[t - 1];
        let light_ref = match vt.primitive.and_then(|pr| pr.area_light.as_ref()) {
            Some(l) => l,
            None => return 1.0,
        };
        let pdf_choice = 1.0 / ctx.lights.len().max(1) as f32;
        let (pdf_pos, pdf_dir) = light_ref.pdf_le(vt.wo, vt.n);
        eye_rev[t - 1] = pdf_choice * pdf_pos;
        eye_rev[t - 2] = vt.convert_density(&eye[t - 2], pdf_dir);
    } else {
        let vs = if s == 1 {
            sampled.expect("s == 1 substitutes the sampled light vertex")
        } else {
            &light[s - 1]
        };
        let d = vt.p - vs.p;
        let dist2 = d.length_squared();
        if dist2 == 0.0 {
            return 0.0;
        }
        let g = 1.0 / dist2;
        let s2t = d * g.sqrt();

        if s == 1 {
            let light_ref = vs.light.expect("sampled light vertex carries its light");
            let (_, mut pdf_dir) = light_ref.pdf_le(s2t, vs.n);
            if vt.is_on_surface() {
                pdf_dir *= abs_dot(vt.n, s2t);
            }
            eye_rev[t - 1] = pdf_dir * g;
        } else {
            let vs_minus = &light[s - 2];
            let material = match vs.primitive.and_then(|pr| pr.material.as_ref()) {
                Some(m) => m,
                None => return 0.0,
            };
            let s2s_minus = (vs_minus.p - vs.p).normalize();
            let mut pdf_rev = material.pdf(s2s_minus, s2t, vs.n);
            if vt.is_on_surface() {
                pdf_rev *= abs_dot(vt.n, s2t);
            }
            eye_rev[t - 1] = pdf_rev * g;
            light_rev[s - 2] =
                vs.convert_density(vs_minus, material.pdf(s2t, s2s_minus, vs.n));
        }

        if t == 1 {
            let (_, mut pdf_dir) = ctx.camera.pdf_we(&Ray::new(vt.p, -s2t));
            if vs.is_on_surface() {
                pdf_dir *= abs_dot(vs.n, s2t);
            }
            light_rev[s - 1] = pdf_dir * g;
        } else {
            let vt_minus = &eye[t - 2];
            let material = match vt.primitive.and_then(|pr| pr.material.as_ref()) {
                Some(m) => m,
                None => return 0.0,
            };
            let t2t_minus = (vt_minus.p - vt.p).normalize();
            let mut pdf_rev = material.pdf(t2t_minus, -s2t, vt.n);
            if vs.is_on_surface() {
                pdf_rev *= abs_dot(vs.n, s2t);
            }
            light_rev[s - 1] = pdf_rev * g;
            eye_rev[t - 2] = vt.convert_density(vt_minus, material.pdf(-s2t, t2t_minus, vt.n));
        }
    }

    // zero densities stand in for strategies that cannot happen; mapping them
    // to one keeps the running products finite without affecting the ratio of
    // realizable strategies
    let remap = |f: f32| if f != 0.0 { f } else { 1.0 };

    let mut sum = 1.0f32;
    let mut r = 1.0f32;
    for i in (1..t).rev() {
        r *= remap(eye_rev[i]) / remap(eye_fwd[i]);
        if !eye_delta[i] && !eye_delta[i - 1] {
            sum += r * r;
        }
    }
    r = 1.0;
    for i in (0..s).rev() {
        r *= remap(light_rev[i]) / remap(light_fwd[i]);
        let prev_delta = if i > 0 { light_delta[i - 1] } else { false };
        if !light_delta[i] && !prev_delta {
            sum += r * r;
        }
    }
    1.0 / sum
}

pub struct BdptIntegrator {
    samples_per_pixel: u32,
    max_depth: u32,
    russian_roulette: f32,
}

impl BdptIntegrator {
    pub fn new(samples_per_pixel: u32, max_depth: u32, russian_roulette: f32) -> Self {
        Self {
            samples_per_pixel,
            max_depth,
            russian_roulette,
        }
    }
}

impl Integrator for BdptIntegrator {
    fn render_tile(&self, ctx: &RenderContext<'_>, film: &Mutex<Film>, tile: Bounds2i, pass: u32) {
        let mut film_tile = film.lock().unwrap().tile(tile);
        let mut sampler = StratifiedSampler::new(self.samples_per_pixel, tile_seed(tile, pass));
        let splat_scale = 1.0 / self.samples_per_pixel as f32;
        let mut eye_path = Vec::with_capacity(self.max_depth as usize + 1);
        let mut light_path = Vec::with_capacity(self.max_depth as usize + 1);
        for y in tile.min.y..tile.max.y {
            for x in tile.min.x..tile.max.x {
                sampler.start_pixel(x, y);
                loop {
                    let p_film = sampler.get_2d() + Vec2::new(x as f32, y as f32);
                    let ray = ctx.camera.generate_ray(p_film, sampler.get_2d());
                    let ne = generate_camera_subpath(
                        ctx,
                        &ray,
                        self.max_depth,
                        MIN_RR_DEPTH,
                        self.russian_roulette,
                        &mut eye_path,
                        &mut sampler,
                    );
                    let nl = generate_light_subpath(
                        ctx,
                        self.max_depth,
                        MIN_RR_DEPTH,
                        self.russian_roulette,
                        &mut light_path,
                        &mut sampler,
                    );

                    let mut l = Spectrum::ZERO;
                    for t in 1..=ne {
                        for s in 0..=nl {
                            let depth = s as i32 + t as i32 - 2;
                            if (s == 1 && t == 1) || depth < 0 || depth > self.max_depth as i32 {
                                continue;
                            }
                            match connect(ctx, &eye_path, &light_path, s, t, &mut sampler) {
                                Some((lp, Some(raster))) => {
                                    film.lock().unwrap().add_splat(raster, lp * splat_scale);
                                }
                                Some((lp, None)) => l += lp,
                                None => {}
                            }
                        }
                    }
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_core::{Camera, Material, Scene, Shape, TriangleMesh};
    use ember_math::IVec2;

    use super::*;
    use crate::accel::{Bvh, SplitMethod};

    fn quad_mesh(corners: [Vec3; 4]) -> Shape {
        Shape::Mesh(Arc::new(TriangleMesh::new(
            corners.to_vec(),
            vec![[0, 1, 2], [0, 2, 3]],
        )))
    }

    #[test]
    fn test_direct_hit_strategy_weight_is_one() {
        // s + t == 2 has no alternative decomposition
        let scene = Scene::new();
        let bvh = Bvh::build(vec![], 4, SplitMethod::Middle);
        let camera = Camera::new(Vec3::ZERO, Vec3::Z, Vec3::Y, 45.0, (8, 8), 0.0, 1.0);
        let ctx = RenderContext {
            bvh: &bvh,
            lights: scene.lights(),
            camera: &camera,
        };
        let eye = vec![
            Vertex::camera(Vec3::ZERO, Vec3::Z, Spectrum::ONE, 1.0),
            Vertex::camera(Vec3::Z, Vec3::Z, Spectrum::ONE, 1.0),
        ];
        assert_eq!(mis_weight(&ctx, &eye, &[], None, 0, 2), 1.0);
    }

    /// Builds the three-vertex path camera -> diffuse surface -> light by
    /// hand, with forward densities filled exactly as the subpath generators
    /// would, and checks that the weights of all three viable strategies sum
    /// to one.
    #[test]
    fn test_strategy_weights_sum_to_one() {
        let x0 = Vec3::ZERO;
        let x1 = Vec3::new(0.0, 0.0, 5.0);
        let n1 = Vec3::new(0.0, 0.0, -1.0);
        let x2 = Vec3::new(0.0, 2.0, 3.0);
        let n2 = (x1 - x2).normalize();

        let camera = Camera::new(x0, Vec3::Z, Vec3::Y, 45.0, (8, 8), 0.0, 1.0);
        let light_shape = quad_mesh([
            Vec3::new(-1.0, 2.0, 3.0),
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(1.0, 4.0, 3.0),
            Vec3::new(-1.0, 4.0, 3.0),
        ]);
        let mut scene = Scene::new();
        scene.add_light(light_shape, Spectrum::splat(5.0), true, None);
        let light = scene.lights()[0].clone();
        let bvh = Bvh::build(vec![], 4, SplitMethod::Middle);
        let ctx = RenderContext {
            bvh: &bvh,
            lights: scene.lights(),
            camera: &camera,
        };

        let diffuse = Arc::new(Material::diffuse(Spectrum::splat(0.6)));
        let surf_prim = Primitive::new(
            Arc::new(quad_mesh([
                Vec3::new(-10.0, -10.0, 5.0),
                Vec3::new(10.0, -10.0, 5.0),
                Vec3::new(10.0, 10.0, 5.0),
                Vec3::new(-10.0, 10.0, 5.0),
            ])),
            diffuse.clone(),
        );
        let light_prim = Primitive::emissive(light.shape.clone(), None, light.clone());

        let d01 = (x1 - x0).normalize();
        let d12 = (x2 - x1).normalize();
        let d10 = -d01;
        let d21 = -d12;

        fn surface_vertex<'a>(p: Vec3, n: Vec3, wo: Vec3, prim: &'a Primitive) -> Vertex<'a> {
            Vertex {
                kind: VertexKind::Surface,
                p,
                n,
                p_error: Vec3::ZERO,
                wo,
                primitive: Some(prim),
                light: None,
                beta: Spectrum::ONE,
                pdf_fwd: 0.0,
                pdf_rev: 0.0,
                delta: false,
            }
        }

        // forward densities along the eye walk
        let (cam_pdf_pos, cam_pdf_dir) = camera.pdf_we(&Ray::new(x0, d01));
        let e0 = Vertex::camera(x0, camera.lens_normal(), Spectrum::ONE, cam_pdf_pos);
        let mut e1 = surface_vertex(x1, n1, d10, &surf_prim);
        e1.pdf_fwd = e0.convert_density(&e1, cam_pdf_dir);
        let mut e2 = surface_vertex(x2, n2, d21, &light_prim);
        e2.pdf_fwd = e1.convert_density(&e2, diffuse.pdf(d10, d12, n1));

        // forward densities along the light walk
        let (le_pdf_pos, le_pdf_dir) = light.pdf_le(d21, n2);
        let l0 = Vertex::light(light.as_ref(), x2, n2, Spectrum::ONE, le_pdf_pos);
        let mut l1 = surface_vertex(x1, n1, d12, &surf_prim);
        l1.pdf_fwd = l0.convert_density(&l1, le_pdf_dir);

        // strategy (s = 0, t = 3): the eye path reached the light itself
        let w_s0 = mis_weight(
            &ctx,
            &[e0.clone(), e1.clone(), e2.clone()],
            &[],
            None,
            0,
            3,
        );

        // strategy (s = 1, t = 2): resampled light point
        let sampled_light = Vertex::light(light.as_ref(), x2, n2, Spectrum::ONE, le_pdf_pos);
        let w_s1 = mis_weight(
            &ctx,
            &[e0.clone(), e1.clone()],
            &[sampled_light.clone()],
            Some(&sampled_light),
            1,
            2,
        );

        // strategy (s = 2, t = 1): light subpath connected to a sampled lens
        let sampled_cam = Vertex::camera(x0, camera.lens_normal(), Spectrum::ONE, cam_pdf_pos);
        let w_t1 = mis_weight(
            &ctx,
            &[e0.clone()],
            &[l0.clone(), l1.clone()],
            Some(&sampled_cam),
            2,
            1,
        );

        let total = w_s0 + w_s1 + w_t1;
        assert!(w_s0 > 0.0 && w_s0 < 1.0);
        assert!(w_s1 > 0.0 && w_s1 < 1.0);
        assert!(w_t1 > 0.0 && w_t1 < 1.0);
        assert!((total - 1.0).abs() < 1e-3, "weights sum to {}", total);
    }

    #[test]
    fn test_camera_facing_emitter() {
        let mut scene = Scene::new();
        scene.add_light(
            quad_mesh([
                Vec3::new(-50.0, -50.0, 5.0),
                Vec3::new(50.0, -50.0, 5.0),
                Vec3::new(50.0, 50.0, 5.0),
                Vec3::new(-50.0, 50.0, 5.0),
            ]),
            Spectrum::splat(3.0),
            true,
            None,
        );
        let bvh = Bvh::build(scene.primitives().to_vec(), 4, SplitMethod::Sah);
        let camera = Camera::new(Vec3::ZERO, Vec3::Z, Vec3::Y, 60.0, (4, 4), 0.0, 1.0);
        let ctx = RenderContext {
            bvh: &bvh,
            lights: scene.lights(),
            camera: &camera,
        };
        let integrator = BdptIntegrator::new(8, 4, 0.7);
        let film = Mutex::new(Film::new(4, 4));
        integrator.render_tile(
            &ctx,
            &film,
            Bounds2i::new(IVec2::new(0, 0), IVec2::new(4, 4)),
            0,
        );
        // every primary ray sees the emitter through the weight-one (0, 2)
        // strategy; splats only ever add on top of that
        let film = film.lock().unwrap();
        for y in 0..4 {
            for x in 0..4 {
                let l = film.pixel_radiance(x, y, 1.0);
                assert!(l.x >= 3.0 - 1e-2, "pixel ({}, {}) = {:?}", x, y, l);
            }
        }
    }
}

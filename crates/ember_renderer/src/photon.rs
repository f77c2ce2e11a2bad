//! Photon map: flat photon storage plus a balanced kd-tree for bounded
//! k-nearest-neighbour density estimates.
//!
//! Photon directions are quantized to a byte pair (theta, phi) and decoded
//! through 256-entry trig tables, so a photon is 28 bytes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::f64::consts::PI;

use ember_core::{abs_dot, Bounds3, Intersection, Spectrum, Vec3};

const INVALID: u32 = u32::MAX;

/// A stored photon hit: position, incident power and the quantized incident
/// direction (pointing away from the surface).
#[derive(Debug, Clone, Copy)]
pub struct Photon {
    pub pos: Vec3,
    pub power: Spectrum,
    theta: u8,
    phi: u8,
}

impl Photon {
    fn new(pos: Vec3, power: Spectrum, wi: Vec3) -> Self {
        let theta = (255.0 * wi.z.clamp(-1.0, 1.0).acos() as f64 / PI) as i32;
        let mut phi = (255.0 * wi.y.atan2(wi.x) as f64 / (2.0 * PI)) as i32;
        if phi < 0 {
            phi += 255;
        }
        Self {
            pos,
            power,
            theta: theta.clamp(0, 255) as u8,
            phi: phi.clamp(0, 255) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct KdNode {
    photon: u32,
    left: u32,
    right: u32,
    axis: u8,
}

/// Heap entry for the gather search; ordered by squared distance so the
/// farthest kept photon sits at the root.
struct Gathered {
    dist2: f32,
    photon: u32,
}

impl PartialEq for Gathered {
    fn eq(&self, other: &Self) -> bool {
        self.dist2 == other.dist2
    }
}

impl Eq for Gathered {}

impl PartialOrd for Gathered {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Gathered {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist2.total_cmp(&other.dist2)
    }
}

/// Fixed-capacity photon map, rebuilt from scratch each SPPM iteration.
pub struct PhotonMap {
    photons: Vec<Photon>,
    nodes: Vec<KdNode>,
    capacity: usize,
    gather_count: usize,
    bounds: Bounds3,
    cos_theta: Box<[f32; 256]>,
    sin_theta: Box<[f32; 256]>,
    cos_phi: Box<[f32; 256]>,
    sin_phi: Box<[f32; 256]>,
}

impl PhotonMap {
    pub fn new(capacity: usize, gather_count: usize) -> Self {
        let mut cos_theta = Box::new([0.0f32; 256]);
        let mut sin_theta = Box::new([0.0f32; 256]);
        let mut cos_phi = Box::new([0.0f32; 256]);
        let mut sin_phi = Box::new([0.0f32; 256]);
        for i in 0..256 {
            let radians = i as f64 * PI / 255.0;
            cos_theta[i] = radians.cos() as f32;
            sin_theta[i] = radians.sin() as f32;
            cos_phi[i] = (2.0 * radians).cos() as f32;
            sin_phi[i] = (2.0 * radians).sin() as f32;
        }
        Self {
            photons: Vec::with_capacity(capacity),
            nodes: Vec::new(),
            capacity,
            gather_count,
            bounds: Bounds3::EMPTY,
            cos_theta,
            sin_theta,
            cos_phi,
            sin_phi,
        }
    }

    pub fn len(&self) -> usize {
        self.photons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photons.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store a photon; returns false once the map is full.
    pub fn store(&mut self, pos: Vec3, power: Spectrum, wi: Vec3) -> bool {
        if self.photons.len() >= self.capacity {
            return false;
        }
        self.photons.push(Photon::new(pos, power, wi));
        self.bounds = self.bounds.union_point(pos);
        true
    }

    /// Discard all photons and the tree.
    pub fn reset(&mut self) {
        self.photons.clear();
        self.nodes.clear();
        self.bounds = Bounds3::EMPTY;
    }

    /// Balance the kd-tree over the stored photons. Splits on the longest
    /// axis of the (shrinking) bounding box, median-partitioned in place.
    pub fn build(&mut self) {
        self.nodes.clear();
        if self.photons.is_empty() {
            return;
        }
        self.nodes.reserve(self.photons.len());
        let mut order: Vec<u32> = (0..self.photons.len() as u32).collect();
        let bounds = self.bounds;
        self.balance(&mut order, bounds);
    }

    fn balance(&mut self, order: &mut [u32], bounds: Bounds3) -> u32 {
        let axis = bounds.max_extent();
        let mid = order.len() / 2;
        let photons = &self.photons;
        order.select_nth_unstable_by(mid, |&a, &b| {
            photons[a as usize].pos[axis].total_cmp(&photons[b as usize].pos[axis])
        });
        let median = order[mid];
        let split_pos = self.photons[median as usize].pos[axis];

        let node_idx = self.nodes.len() as u32;
        self.nodes.push(KdNode {
            photon: median,
            left: INVALID,
            right: INVALID,
            axis: axis as u8,
        });

        let (lower, upper) = order.split_at_mut(mid);
        let upper = &mut upper[1..];
        if !lower.is_empty() {
            let mut b = bounds;
            b.max[axis] = split_pos;
            let left = self.balance(lower, b);
            self.nodes[node_idx as usize].left = left;
        }
        if !upper.is_empty() {
            let mut b = bounds;
            b.min[axis] = split_pos;
            let right = self.balance(upper, b);
            self.nodes[node_idx as usize].right = right;
        }
        node_idx
    }

    fn direction(&self, photon: &Photon) -> Vec3 {
        let st = self.sin_theta[photon.theta as usize];
        Vec3::new(
            st * self.cos_phi[photon.phi as usize],
            st * self.sin_phi[photon.phi as usize],
            self.cos_theta[photon.theta as usize],
        )
    }

    fn gather(&self, node: u32, p: Vec3, max_radius2: &mut f32, heap: &mut BinaryHeap<Gathered>) {
        if node == INVALID {
            return;
        }
        let n = self.nodes[node as usize];
        let photon = &self.photons[n.photon as usize];
        let plane_dist = p[n.axis as usize] - photon.pos[n.axis as usize];
        if plane_dist > 0.0 {
            self.gather(n.right, p, max_radius2, heap);
            if plane_dist * plane_dist < *max_radius2 {
                self.gather(n.left, p, max_radius2, heap);
            }
        } else {
            self.gather(n.left, p, max_radius2, heap);
            if plane_dist * plane_dist < *max_radius2 {
                self.gather(n.right, p, max_radius2, heap);
            }
        }

        let dist2 = (photon.pos - p).length_squared();
        if dist2 < *max_radius2 {
            heap.push(Gathered {
                dist2,
                photon: n.photon,
            });
            if heap.len() > self.gather_count {
                heap.pop();
            }
            if heap.len() == self.gather_count {
                *max_radius2 = heap.peek().map(|g| g.dist2).unwrap_or(*max_radius2);
            }
        }
    }

    /// Sum the reflected contribution of the photons nearest to `isect`
    /// within `radius2`. Shrinks `radius2` to the distance of the farthest
    /// kept photon once `gather_count` have been found, and reports how many
    /// photons contributed. The returned value is raw gathered flux times
    /// BSDF; the caller normalizes by the kernel area and shot count.
    pub fn radiance_estimate(&self, isect: &Intersection<'_>, radius2: &mut f32) -> (Spectrum, usize) {
        if self.nodes.is_empty() {
            return (Spectrum::ZERO, 0);
        }
        let material = match &isect.primitive.material {
            Some(m) => m,
            None => return (Spectrum::ZERO, 0),
        };

        let mut heap = BinaryHeap::with_capacity(self.gather_count + 1);
        self.gather(0, isect.p, radius2, &mut heap);

        let mut sum = Spectrum::ZERO;
        let found = heap.len();
        for g in heap.into_iter() {
            let photon = &self.photons[g.photon as usize];
            let wi = self.direction(photon);
            let f = material.f(isect.wo, wi, isect.n);
            sum += photon.power * abs_dot(wi, isect.n) * f;
        }
        (sum, found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn filled_map(count: usize, gather: usize, seed: u64) -> PhotonMap {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut map = PhotonMap::new(count, gather);
        for _ in 0..count {
            let pos = Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
            map.store(pos, Spectrum::splat(1.0), Vec3::Z);
        }
        map.build();
        map
    }

    fn brute_force_knn(map: &PhotonMap, p: Vec3, k: usize, radius2: f32) -> Vec<f32> {
        let mut dists: Vec<f32> = map
            .photons
            .iter()
            .map(|ph| (ph.pos - p).length_squared())
            .filter(|&d| d < radius2)
            .collect();
        dists.sort_by(f32::total_cmp);
        dists.truncate(k);
        dists
    }

    fn tree_knn(map: &PhotonMap, p: Vec3, radius2: f32) -> Vec<f32> {
        let mut r2 = radius2;
        let mut heap = BinaryHeap::new();
        map.gather(0, p, &mut r2, &mut heap);
        let mut dists: Vec<f32> = heap.into_iter().map(|g| g.dist2).collect();
        dists.sort_by(f32::total_cmp);
        dists
    }

    #[test]
    fn test_knn_matches_brute_force() {
        let map = filled_map(500, 16, 7);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let p = Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
            let expected = brute_force_knn(&map, p, 16, 0.25);
            let got = tree_knn(&map, p, 0.25);
            assert_eq!(got.len(), expected.len());
            for (a, b) in got.iter().zip(expected.iter()) {
                assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_gather_respects_radius() {
        let map = filled_map(200, 200, 3);
        let dists = tree_knn(&map, Vec3::splat(0.5), 0.01);
        for d in dists {
            assert!(d < 0.01);
        }
    }

    #[test]
    fn test_radius_shrinks_when_full() {
        let map = filled_map(1000, 8, 5);
        let mut r2 = 10.0;
        let mut heap = BinaryHeap::new();
        map.gather(0, Vec3::splat(0.5), &mut r2, &mut heap);
        assert_eq!(heap.len(), 8);
        assert!(r2 < 10.0);
        // the final radius is the distance of the farthest kept photon
        let max = heap.into_iter().map(|g| g.dist2).fold(0.0f32, f32::max);
        assert!((r2 - max).abs() < 1e-6);
    }

    #[test]
    fn test_capacity_limit() {
        let mut map = PhotonMap::new(2, 4);
        assert!(map.store(Vec3::ZERO, Spectrum::ONE, Vec3::Z));
        assert!(map.store(Vec3::X, Spectrum::ONE, Vec3::Z));
        assert!(!map.store(Vec3::Y, Spectrum::ONE, Vec3::Z));
        assert_eq!(map.len(), 2);
        map.reset();
        assert!(map.is_empty());
        assert!(map.store(Vec3::Y, Spectrum::ONE, Vec3::Z));
    }

    #[test]
    fn test_direction_quantization() {
        let map = PhotonMap::new(1, 1);
        for wi in [
            Vec3::Z,
            Vec3::X,
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 1.0).normalize(),
            Vec3::new(-0.3, 0.4, -0.866).normalize(),
        ] {
            let photon = Photon::new(Vec3::ZERO, Spectrum::ONE, wi);
            let decoded = map.direction(&photon);
            assert!(decoded.dot(wi) > 0.98, "decode drifted for {:?}", wi);
        }
    }

    #[test]
    fn test_empty_map_estimate() {
        use std::sync::Arc;

        use ember_core::{Intersection, Material, Primitive, Ray, Shape, Sphere};

        let prim = Primitive::new(
            Arc::new(Shape::Sphere(Sphere {
                center: Vec3::ZERO,
                radius: 1.0,
            })),
            Arc::new(Material::diffuse(Spectrum::splat(0.5))),
        );
        let ray = Ray::new(Vec3::new(0.0, 0.0, -3.0), Vec3::Z);
        let hit = prim.intersect(&ray).unwrap();
        let isect = Intersection::new(&hit, &ray, &prim);

        let map = PhotonMap::new(10, 4);
        let mut r2 = 1.0;
        let (flux, found) = map.radiance_estimate(&isect, &mut r2);
        assert_eq!(found, 0);
        assert_eq!(flux, Spectrum::ZERO);
        assert_eq!(r2, 1.0);
    }
}

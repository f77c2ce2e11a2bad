//! Bounding volume hierarchy over scene primitives.
//!
//! Built once, immutable afterwards. The tree is flattened into a pre-order
//! array: a node's first child sits at `index + 1` and only the second
//! child's offset is stored, so traversal is an index walk over contiguous
//! memory with an explicit stack.

use std::sync::Arc;

use ember_core::{Intersection, Primitive};
use ember_math::{Bounds3, Ray, Vec3};

const N_BUCKETS: usize = 12;
const TRAVERSAL_STACK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMethod {
    /// Median split on the widest centroid axis.
    Middle,
    /// Surface-area heuristic over centroid buckets.
    Sah,
}

/// Flattened node. `count == 0` marks an interior node whose second child is
/// at `offset`; a leaf covers `count` primitives starting at `offset` in the
/// reordered primitive array.
#[derive(Debug, Clone, Copy)]
struct LinearNode {
    bounds: Bounds3,
    offset: u32,
    count: u16,
    axis: u8,
}

struct BuildPrim {
    prim_index: usize,
    bounds: Bounds3,
    centroid: Vec3,
}

enum BuildNode {
    Leaf {
        bounds: Bounds3,
        first_prim: usize,
        count: usize,
    },
    Interior {
        bounds: Bounds3,
        axis: usize,
        children: [Box<BuildNode>; 2],
    },
}

impl BuildNode {
    fn bounds(&self) -> Bounds3 {
        match self {
            BuildNode::Leaf { bounds, .. } | BuildNode::Interior { bounds, .. } => *bounds,
        }
    }
}

pub struct Bvh {
    nodes: Vec<LinearNode>,
    /// Primitives physically reordered into contiguous leaf ranges.
    primitives: Vec<Arc<Primitive>>,
}

impl Bvh {
    pub fn build(
        primitives: Vec<Arc<Primitive>>,
        max_leaf_size: usize,
        split_method: SplitMethod,
    ) -> Self {
        if primitives.is_empty() {
            return Self {
                nodes: Vec::new(),
                primitives,
            };
        }
        let mut build_prims: Vec<BuildPrim> = primitives
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let bounds = p.bounds();
                BuildPrim {
                    prim_index: i,
                    bounds,
                    centroid: bounds.centroid(),
                }
            })
            .collect();

        let mut ordered: Vec<Arc<Primitive>> = Vec::with_capacity(primitives.len());
        let n = build_prims.len();
        let root = recursive_build(
            &primitives,
            &mut build_prims,
            0,
            n,
            max_leaf_size.max(1),
            split_method,
            &mut ordered,
        );

        let mut nodes = Vec::with_capacity(2 * primitives.len());
        flatten(&root, &mut nodes);
        log::debug!(
            "built BVH: {} primitives, {} nodes",
            ordered.len(),
            nodes.len()
        );
        Self {
            nodes,
            primitives: ordered,
        }
    }

    /// Union of all leaf bounds.
    pub fn bounds(&self) -> Bounds3 {
        self.nodes.first().map_or(Bounds3::EMPTY, |n| n.bounds)
    }

    pub fn primitives(&self) -> &[Arc<Primitive>] {
        &self.primitives
    }

    /// Closest intersection along `ray`; `ray.t_max` shrinks to the hit
    /// distance.
    pub fn intersect(&self, ray: &mut Ray) -> Option<Intersection<'_>> {
        if self.nodes.is_empty() {
            return None;
        }
        let dir_is_neg = [
            ray.recip_direction.x < 0.0,
            ray.recip_direction.y < 0.0,
            ray.recip_direction.z < 0.0,
        ];
        let mut best: Option<(ember_core::ShapeHit, &Primitive)> = None;
        let mut stack = [0usize; TRAVERSAL_STACK];
        let mut stack_top = 0usize;
        let mut node_index = 0usize;
        loop {
            let node = &self.nodes[node_index];
            if node.bounds.intersect_p(ray, ray.recip_direction, dir_is_neg) {
                if node.count > 0 {
                    for prim in
                        &self.primitives[node.offset as usize..node.offset as usize + node.count as usize]
                    {
                        if let Some(hit) = prim.intersect(ray) {
                            ray.t_max = hit.t;
                            best = Some((hit, prim.as_ref()));
                        }
                    }
                    if stack_top == 0 {
                        break;
                    }
                    stack_top -= 1;
                    node_index = stack[stack_top];
                } else if dir_is_neg[node.axis as usize] {
                    // Far child is the first one for a negative direction
                    stack[stack_top] = node_index + 1;
                    stack_top += 1;
                    node_index = node.offset as usize;
                } else {
                    stack[stack_top] = node.offset as usize;
                    stack_top += 1;
                    node_index += 1;
                }
            } else {
                if stack_top == 0 {
                    break;
                }
                stack_top -= 1;
                node_index = stack[stack_top];
            }
        }
        best.map(|(hit, prim)| Intersection::new(&hit, ray, prim))
    }

    /// Any-hit visibility query with early out.
    pub fn intersect_p(&self, ray: &Ray) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        let dir_is_neg = [
            ray.recip_direction.x < 0.0,
            ray.recip_direction.y < 0.0,
            ray.recip_direction.z < 0.0,
        ];
        let mut stack = [0usize; TRAVERSAL_STACK];
        let mut stack_top = 0usize;
        let mut node_index = 0usize;
        loop {
            let node = &self.nodes[node_index];
            if node.bounds.intersect_p(ray, ray.recip_direction, dir_is_neg) {
                if node.count > 0 {
                    for prim in
                        &self.primitives[node.offset as usize..node.offset as usize + node.count as usize]
                    {
                        if prim.intersect_p(ray) {
                            return true;
                        }
                    }
                    if stack_top == 0 {
                        return false;
                    }
                    stack_top -= 1;
                    node_index = stack[stack_top];
                } else if dir_is_neg[node.axis as usize] {
                    stack[stack_top] = node_index + 1;
                    stack_top += 1;
                    node_index = node.offset as usize;
                } else {
                    stack[stack_top] = node.offset as usize;
                    stack_top += 1;
                    node_index += 1;
                }
            } else {
                if stack_top == 0 {
                    return false;
                }
                stack_top -= 1;
                node_index = stack[stack_top];
            }
        }
    }
}

fn make_leaf(
    primitives: &[Arc<Primitive>],
    build_prims: &[BuildPrim],
    start: usize,
    end: usize,
    bounds: Bounds3,
    ordered: &mut Vec<Arc<Primitive>>,
) -> BuildNode {
    let first_prim = ordered.len();
    for bp in &build_prims[start..end] {
        ordered.push(Arc::clone(&primitives[bp.prim_index]));
    }
    BuildNode::Leaf {
        bounds,
        first_prim,
        count: end - start,
    }
}

fn recursive_build(
    primitives: &[Arc<Primitive>],
    build_prims: &mut [BuildPrim],
    start: usize,
    end: usize,
    max_leaf_size: usize,
    split_method: SplitMethod,
    ordered: &mut Vec<Arc<Primitive>>,
) -> BuildNode {
    let bounds = build_prims[start..end]
        .iter()
        .fold(Bounds3::EMPTY, |b, p| b.union(&p.bounds));
    let n = end - start;
    if n == 1 {
        return make_leaf(primitives, build_prims, start, end, bounds, ordered);
    }

    let centroid_bounds = build_prims[start..end]
        .iter()
        .fold(Bounds3::EMPTY, |b, p| b.union_point(p.centroid));
    let axis = centroid_bounds.max_extent();
    let extent = centroid_bounds.diagonal()[axis];
    // All centroids coincide: no split axis exists
    if extent == 0.0 {
        return make_leaf(primitives, build_prims, start, end, bounds, ordered);
    }

    let mid = match split_method {
        SplitMethod::Middle => {
            let mid = start + n / 2;
            build_prims[start..end].select_nth_unstable_by(n / 2, |a, b| {
                a.centroid[axis].total_cmp(&b.centroid[axis])
            });
            mid
        }
        SplitMethod::Sah => {
            if n <= 2 {
                let mid = start + n / 2;
                build_prims[start..end].select_nth_unstable_by(n / 2, |a, b| {
                    a.centroid[axis].total_cmp(&b.centroid[axis])
                });
                mid
            } else {
                let bucket_of = |p: &BuildPrim| -> usize {
                    let b = (N_BUCKETS as f32 * centroid_bounds.offset(p.centroid)[axis]) as usize;
                    b.min(N_BUCKETS - 1)
                };
                let mut bucket_bounds = [Bounds3::EMPTY; N_BUCKETS];
                let mut bucket_counts = [0usize; N_BUCKETS];
                for p in &build_prims[start..end] {
                    let b = bucket_of(p);
                    bucket_counts[b] += 1;
                    bucket_bounds[b] = bucket_bounds[b].union(&p.bounds);
                }

                let mut min_cost = f32::INFINITY;
                let mut min_split = 0;
                for split in 0..N_BUCKETS - 1 {
                    let (mut b0, mut b1) = (Bounds3::EMPTY, Bounds3::EMPTY);
                    let (mut c0, mut c1) = (0usize, 0usize);
                    for b in 0..=split {
                        b0 = b0.union(&bucket_bounds[b]);
                        c0 += bucket_counts[b];
                    }
                    for b in split + 1..N_BUCKETS {
                        b1 = b1.union(&bucket_bounds[b]);
                        c1 += bucket_counts[b];
                    }
                    if c0 == 0 || c1 == 0 {
                        continue;
                    }
                    let cost = 0.125
                        + (c0 as f32 * b0.surface_area() + c1 as f32 * b1.surface_area())
                            / bounds.surface_area();
                    if cost < min_cost {
                        min_cost = cost;
                        min_split = split;
                    }
                }

                let leaf_cost = n as f32;
                if n <= max_leaf_size && min_cost >= leaf_cost {
                    return make_leaf(primitives, build_prims, start, end, bounds, ordered);
                }
                start + partition(&mut build_prims[start..end], |p| bucket_of(p) <= min_split)
            }
        }
    };

    // A degenerate partition still has to recurse on non-empty halves
    let mid = mid.clamp(start + 1, end - 1);
    let left = recursive_build(
        primitives,
        build_prims,
        start,
        mid,
        max_leaf_size,
        split_method,
        ordered,
    );
    let right = recursive_build(
        primitives,
        build_prims,
        mid,
        end,
        max_leaf_size,
        split_method,
        ordered,
    );
    BuildNode::Interior {
        bounds: left.bounds().union(&right.bounds()),
        axis,
        children: [Box::new(left), Box::new(right)],
    }
}

/// In-place partition; returns the index of the first element for which
/// `pred` is false.
fn partition<T>(slice: &mut [T], pred: impl Fn(&T) -> bool) -> usize {
    let mut first = 0;
    for i in 0..slice.len() {
        if pred(&slice[i]) {
            slice.swap(first, i);
            first += 1;
        }
    }
    first
}

fn flatten(node: &BuildNode, nodes: &mut Vec<LinearNode>) -> usize {
    let index = nodes.len();
    match node {
        BuildNode::Leaf {
            bounds,
            first_prim,
            count,
        } => {
            nodes.push(LinearNode {
                bounds: *bounds,
                offset: *first_prim as u32,
                count: *count as u16,
                axis: 0,
            });
        }
        BuildNode::Interior {
            bounds,
            axis,
            children,
        } => {
            nodes.push(LinearNode {
                bounds: *bounds,
                offset: 0,
                count: 0,
                axis: *axis as u8,
            });
            flatten(&children[0], nodes);
            let second = flatten(&children[1], nodes);
            nodes[index].offset = second as u32;
        }
    }
    index
}

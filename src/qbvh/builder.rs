//! Recursive binned SAH builder producing the transient binary tree.

use glam::Vec3A;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    aabb::Aabb,
    arena::{Arena, Handle},
    Boundable, BuildError, BvhBuildParams, MAX_SAH_BUCKETS,
};

/// One record per primitive, gathered once before the build and reordered by it.
#[derive(Clone, Copy, Debug)]
pub struct BuildInfo {
    /// Index of the primitive in the caller's list.
    pub index: u32,
    pub aabb: Aabb,
    pub centroid: Vec3A,
}

/// Gathers the build records of `primitives`, checking that every bounding box is finite.
pub fn build_infos<T: Boundable>(primitives: &[T]) -> Result<Vec<BuildInfo>, BuildError> {
    crate::scope!("build_infos");
    if primitives.is_empty() {
        return Err(BuildError::EmptyInput);
    }

    #[cfg(feature = "parallel")]
    let iter = primitives.par_iter().enumerate();
    #[cfg(not(feature = "parallel"))]
    let iter = primitives.iter().enumerate();

    let infos: Vec<BuildInfo> = iter
        .map(|(index, prim)| BuildInfo {
            index: index as u32,
            aabb: prim.aabb(),
            centroid: prim.centroid(),
        })
        .collect();

    if let Some(index) = infos
        .iter()
        .position(|info| !info.aabb.is_finite() || !info.centroid.is_finite())
    {
        return Err(BuildError::NonFiniteBounds { index });
    }
    Ok(infos)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BuildNodeKind {
    /// `first`/`count` index the ordered primitive list during the build and are rewritten by the packer
    /// to index packed groups.
    Leaf { first: u32, count: u32 },
    Interior {
        children: [Handle<BuildNode>; 2],
        axis: u8,
    },
}

/// Binary build node, lives in an [`Arena`] for the duration of one build.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(align(16))]
pub struct BuildNode {
    pub aabb: Aabb,
    pub kind: BuildNodeKind,
}

impl BuildNode {
    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, BuildNodeKind::Leaf { .. })
    }
}

#[derive(Clone, Copy)]
struct Bucket {
    count: u32,
    aabb: Aabb,
}

impl Default for Bucket {
    fn default() -> Self {
        Self {
            count: 0,
            aabb: Aabb::EMPTY,
        }
    }
}

/// Builds the binary tree. Leaf primitives are appended to `ordered` so that every leaf covers a
/// contiguous range of it.
pub struct SahBuilder<'a> {
    pub params: &'a BvhBuildParams,
    pub nodes: &'a mut Arena<BuildNode>,
    pub ordered: &'a mut Vec<u32>,
    /// Deepest binary level reached, the root is depth 0.
    pub max_depth: u32,
}

impl<'a> SahBuilder<'a> {
    pub fn new(
        params: &'a BvhBuildParams,
        nodes: &'a mut Arena<BuildNode>,
        ordered: &'a mut Vec<u32>,
    ) -> Self {
        Self {
            params,
            nodes,
            ordered,
            max_depth: 0,
        }
    }

    /// # Panics
    /// If `infos` is empty.
    pub fn build(&mut self, infos: &mut [BuildInfo]) -> Handle<BuildNode> {
        crate::scope!("sah_build");
        assert!(!infos.is_empty(), "cannot build over zero primitives");
        self.ordered.reserve(infos.len());
        self.build_range(infos, 0)
    }

    fn build_range(&mut self, infos: &mut [BuildInfo], depth: u32) -> Handle<BuildNode> {
        self.max_depth = self.max_depth.max(depth);
        let aabb = infos
            .iter()
            .fold(Aabb::EMPTY, |acc, info| acc.union(&info.aabb));

        let count = infos.len();
        if count <= self.params.max_prims_per_leaf as usize {
            let first = self.ordered.len() as u32;
            self.ordered.extend(infos.iter().map(|info| info.index));
            return self.nodes.alloc(BuildNode {
                aabb,
                kind: BuildNodeKind::Leaf {
                    first,
                    count: count as u32,
                },
            });
        }

        let centroid_bounds = infos
            .iter()
            .fold(Aabb::EMPTY, |acc, info| acc.union(&Aabb::from_point(info.centroid)));
        let axis = centroid_bounds.largest_axis();

        let equal_counts =
            count <= (self.params.equal_counts_multiple * self.params.max_prims_per_leaf) as usize;
        let mid = if centroid_bounds.max[axis] <= centroid_bounds.min[axis] {
            log::trace!("coincident centroids, median split of {count} primitives");
            median_split(infos, axis)
        } else if equal_counts || depth >= self.params.max_build_depth {
            median_split(infos, axis)
        } else {
            self.sah_split(infos, axis, &aabb, &centroid_bounds)
                .unwrap_or_else(|| median_split(infos, axis))
        };

        let (left, right) = infos.split_at_mut(mid);
        let left = self.build_range(left, depth + 1);
        let right = self.build_range(right, depth + 1);
        let aabb = self.nodes[left].aabb.union(&self.nodes[right].aabb);
        self.nodes.alloc(BuildNode {
            aabb,
            kind: BuildNodeKind::Interior {
                children: [left, right],
                axis: axis as u8,
            },
        })
    }

    /// Bins centroids into equal width buckets along `axis`, picks the cheapest split between buckets and
    /// partitions `infos` around it. Returns the index of the first record of the right half.
    fn sah_split(
        &self,
        infos: &mut [BuildInfo],
        axis: usize,
        aabb: &Aabb,
        centroid_bounds: &Aabb,
    ) -> Option<usize> {
        let bucket_count = self.params.sah_buckets as usize;
        let bucket_of = |info: &BuildInfo| -> usize {
            let b = (centroid_bounds.offset(info.centroid)[axis] * bucket_count as f32) as usize;
            b.min(bucket_count - 1)
        };

        let mut buckets = [Bucket::default(); MAX_SAH_BUCKETS];
        for info in infos.iter() {
            let bucket = &mut buckets[bucket_of(info)];
            bucket.count += 1;
            bucket.aabb = bucket.aabb.union(&info.aabb);
        }

        // Sweep from the right to get the cost contribution of every right half.
        let mut right_cost = [0.0f32; MAX_SAH_BUCKETS];
        let mut acc = Bucket::default();
        for i in (1..bucket_count).rev() {
            acc.count += buckets[i].count;
            acc.aabb = acc.aabb.union(&buckets[i].aabb);
            right_cost[i - 1] = weighted_area(&acc);
        }

        // A node with flat bounds has no area to normalize by, costs then stay comparable unscaled.
        let total_area = aabb.half_area();
        let inv_total_area = if total_area > 0.0 {
            1.0 / total_area
        } else {
            1.0
        };

        let mut best_split = None;
        let mut best_cost = f32::INFINITY;
        let mut acc = Bucket::default();
        for split in 0..bucket_count - 1 {
            acc.count += buckets[split].count;
            acc.aabb = acc.aabb.union(&buckets[split].aabb);
            let cost = self.params.traversal_cost
                + (weighted_area(&acc) + right_cost[split]) * inv_total_area;
            if cost < best_cost {
                best_cost = cost;
                best_split = Some(split);
            }
        }

        let split = best_split?;
        let mid = partition(infos, |info| bucket_of(info) <= split);
        (mid > 0 && mid < infos.len()).then_some(mid)
    }
}

#[inline(always)]
fn weighted_area(bucket: &Bucket) -> f32 {
    if bucket.count == 0 {
        0.0
    } else {
        bucket.count as f32 * bucket.aabb.half_area()
    }
}

/// Splits at the middle element along `axis`, leaving the smaller centroids in the first half.
fn median_split(infos: &mut [BuildInfo], axis: usize) -> usize {
    let mid = infos.len() / 2;
    infos.select_nth_unstable_by(mid, |a, b| a.centroid[axis].total_cmp(&b.centroid[axis]));
    mid
}

/// Moves the records matching `pred` to the front. Returns how many matched.
fn partition<T>(items: &mut [T], pred: impl Fn(&T) -> bool) -> usize {
    let mut first = 0;
    for i in 0..items.len() {
        if pred(&items[i]) {
            items.swap(first, i);
            first += 1;
        }
    }
    first
}

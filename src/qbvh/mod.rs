//! The four-wide BVH shared by the mesh and instance structures.
//!
//! Building runs four stages over [`builder::BuildInfo`] records:
//! 1. [`builder::SahBuilder`] builds a binary tree in an arena.
//! 2. [`collapse::collapse`] folds every two binary levels into one four-wide node.
//! 3. [`pack::pack_leaves`] regroups the primitives of each leaf into groups of four.
//! 4. [`flatten::flatten`] writes the four-wide tree into a single `Vec<QbvhNode>`.
//!
//! Both arenas are dropped at the end of the build, only the node array and the packed groups remain.

pub mod builder;
pub mod collapse;
pub mod flatten;
pub mod node;
pub mod pack;

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use bytemuck::{Pod, Zeroable};
use glam::Vec3A;

use crate::{
    aabb::Aabb,
    arena::Arena,
    faststack::FastStack,
    ray::{Ray, WideRay},
    timeit, BvhBuildParams,
};

use builder::{BuildInfo, SahBuilder};
use collapse::collapse;
use flatten::flatten;
pub use node::{QbvhNode, LEAF_FLAG};
use pack::pack_leaves;

/// Node index and the distance at which the ray enters it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TraversalEntry {
    pub node: u32,
    pub t: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraversalMode {
    /// Visit everything that could still hold a closer hit, children front to back.
    Closest,
    /// Stop at the first leaf callback reporting a hit.
    Any,
}

#[derive(Clone, Debug, Default)]
pub struct Qbvh {
    /// Root at index 0. Empty if nothing has been built.
    pub nodes: Vec<QbvhNode>,
    /// Bounds of everything in the tree.
    pub aabb: Aabb,
    /// Number of node levels, used to size the traversal stack.
    pub depth: u32,
}

impl Qbvh {
    /// Builds the tree over `infos` (which get reordered), replacing any previous content while keeping the
    /// node allocation.
    ///
    /// `ordered` receives the source index of every primitive in leaf order. `groups` receives the packed
    /// groups made by `pack_group`, see [`pack_leaves`]. Leaf slots of the nodes index into `groups`.
    ///
    /// # Panics
    /// If `infos` is empty.
    pub fn build_into<G>(
        &mut self,
        infos: &mut [BuildInfo],
        params: &BvhBuildParams,
        ordered: &mut Vec<u32>,
        groups: &mut Vec<G>,
        pack_group: impl FnMut(u32, &[u32]) -> G,
    ) {
        crate::scope!("qbvh_build");
        ordered.clear();
        let leaf_size = params.max_prims_per_leaf.max(1) as usize;
        let mut build_nodes = Arena::with_capacity(2 * infos.len().div_ceil(leaf_size));
        let mut collapsed = Arena::with_capacity(infos.len().div_ceil(leaf_size));

        timeit!["sah build",
            let root = SahBuilder::new(params, &mut build_nodes, ordered).build(infos);
        ];
        timeit!["collapse",
            let (collapsed_root, depth) = collapse(&build_nodes, &mut collapsed, root);
        ];
        timeit!["pack",
            pack_leaves(&mut build_nodes, ordered, groups, pack_group);
        ];
        timeit!["flatten",
            flatten(&build_nodes, &collapsed, collapsed_root, &mut self.nodes);
        ];

        self.aabb = build_nodes[root].aabb;
        self.depth = depth;
    }

    /// Drops the nodes, keeping the allocation.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.aabb = Aabb::EMPTY;
        self.depth = 0;
    }

    /// Upper bound on the entries the traversal stack can hold at once.
    #[inline(always)]
    pub fn stack_size(&self) -> usize {
        3 * self.depth as usize + 1
    }

    /// Walks the tree with `ray`, calling `leaf_fn(ray, first_group, group_count)` for every leaf the ray
    /// reaches. `leaf_fn` returns true if it found a hit, and in [`TraversalMode::Closest`] it is expected to
    /// have shrunk `ray.tmax` to that hit, which prunes everything further away.
    ///
    /// Returns true if any `leaf_fn` call did.
    #[inline(always)]
    pub fn traverse<F>(&self, ray: &mut Ray, mode: TraversalMode, mut leaf_fn: F) -> bool
    where
        F: FnMut(&mut Ray, u32, u32) -> bool,
    {
        crate::scope!("traverse");
        if self.nodes.is_empty() {
            return false;
        }
        let wide = WideRay::new(ray);
        let mut hit = false;

        crate::fast_stack!(TraversalEntry, (16, 32, 64, 128), self.stack_size(), stack, {
            stack.push(TraversalEntry {
                node: 0,
                t: ray.tmin,
            });
            while let Some(entry) = stack.pop() {
                if entry.t > ray.tmax {
                    continue;
                }
                let node = &self.nodes[entry.node as usize];
                let (mask, tnear) = node.bounds.intersect(&wide, ray.tmin, ray.tmax);
                if mask == 0 {
                    continue;
                }
                let order = match mode {
                    TraversalMode::Closest => node.visit_order(wide.dir_is_neg),
                    TraversalMode::Any => [0, 1, 2, 3],
                };

                // Leaves front to back.
                for &slot in &order {
                    if mask & (1 << slot) == 0 || !node.is_leaf(slot) || tnear[slot] > ray.tmax {
                        continue;
                    }
                    let (first, count) = node.leaf_range(slot);
                    if leaf_fn(ray, first, count) {
                        hit = true;
                        if mode == TraversalMode::Any {
                            return true;
                        }
                    }
                }

                // Inner children back to front so the nearest is popped first.
                for &slot in order.iter().rev() {
                    if mask & (1 << slot) != 0 && node.is_inner(slot) && tnear[slot] <= ray.tmax {
                        stack.push(TraversalEntry {
                            node: node.children[slot],
                            t: tnear[slot],
                        });
                    }
                }
            }
        });

        hit
    }

    /// Indices of the nodes `depth` levels below the root. For visualization.
    pub fn nodes_at_depth(&self, depth: u32) -> Vec<u32> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let mut level = vec![0u32];
        for _ in 0..depth {
            level = level
                .iter()
                .flat_map(|&index| {
                    let node = &self.nodes[index as usize];
                    (0..4)
                        .filter(|&slot| node.is_inner(slot))
                        .map(|slot| node.children[slot])
                        .collect::<Vec<_>>()
                })
                .collect();
        }
        level
    }

    /// Bounds of every non-empty slot of the nodes `depth` levels below the root. For visualization.
    pub fn slot_bounds_at_depth(&self, depth: u32) -> Vec<Aabb> {
        self.nodes_at_depth(depth)
            .iter()
            .flat_map(|&index| {
                let node = &self.nodes[index as usize];
                (0..4)
                    .filter(|&slot| !node.is_empty(slot))
                    .map(|slot| node.bounds.get(slot))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// The node array as raw bytes, ready for upload or serialization.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    /// Checks the structural invariants, panicking on the first violation:
    /// - every slot's bounds contain everything below it (`group_bounds(i)` gives the bounds of group `i`),
    /// - child nodes are stored after their parent and reached exactly once,
    /// - every one of the `group_count` packed groups belongs to exactly one leaf.
    pub fn validate(
        &self,
        group_count: usize,
        group_bounds: impl Fn(u32) -> Aabb,
    ) -> QbvhValidationResult {
        let mut result = QbvhValidationResult::default();
        if self.nodes.is_empty() {
            assert_eq!(group_count, 0);
            return result;
        }
        let everything = Aabb::new(Vec3A::NEG_INFINITY, Vec3A::INFINITY);
        self.validate_impl(0, &everything, 0, &mut result, &group_bounds);

        assert!(self.aabb.contains_aabb(&self.nodes[0].bounds.union_all()));
        assert_eq!(result.discovered_nodes.len(), self.nodes.len());
        assert_eq!(result.discovered_groups.len(), group_count);
        assert!(result
            .discovered_groups
            .iter()
            .all(|&g| (g as usize) < group_count));
        assert!(result.max_depth < self.depth);
        result
    }

    fn validate_impl(
        &self,
        index: u32,
        parent_bounds: &Aabb,
        depth: u32,
        result: &mut QbvhValidationResult,
        group_bounds: &impl Fn(u32) -> Aabb,
    ) {
        assert!(
            result.discovered_nodes.insert(index),
            "node {index} is reachable twice"
        );
        result.node_count += 1;
        result.max_depth = result.max_depth.max(depth);
        *result.nodes_at_depth.entry(depth).or_default() += 1;

        let node = &self.nodes[index as usize];
        assert!(
            parent_bounds.contains_aabb(&node.bounds.union_all()),
            "node {index} is not contained in its parent slot"
        );

        for slot in 0..4 {
            let slot_bounds = node.bounds.get(slot);
            if node.is_empty(slot) {
                assert!(slot_bounds.is_empty());
                assert_eq!(node.group_counts[slot], 0);
                continue;
            }
            result.child_count += 1;

            if node.is_leaf(slot) {
                result.leaf_count += 1;
                *result.leaves_at_depth.entry(depth).or_default() += 1;
                let (first, count) = node.leaf_range(slot);
                assert!(count > 0, "leaf with no groups in node {index}");
                for group in first..first + count {
                    assert!(
                        result.discovered_groups.insert(group),
                        "group {group} is in more than one leaf"
                    );
                    let bounds = group_bounds(group);
                    assert!(
                        slot_bounds.contains_aabb(&bounds),
                        "group {group} does not fit in slot {slot} of node {index}:\ngroup: {bounds:?}\nslot:  {slot_bounds:?}"
                    );
                }
                result.group_count += count as usize;
            } else {
                let child = node.children[slot];
                assert!(child > index, "child {child} is stored before parent {index}");
                assert!((child as usize) < self.nodes.len());
                self.validate_impl(child, &slot_bounds, depth + 1, result, group_bounds);
            }
        }
    }
}

/// Statistics gathered by [`Qbvh::validate`].
#[derive(Clone, Debug, Default)]
pub struct QbvhValidationResult {
    /// Set of nodes discovered though validation traversal.
    pub discovered_nodes: HashSet<u32>,
    /// Set of packed groups discovered though validation traversal.
    pub discovered_groups: HashSet<u32>,
    pub node_count: usize,
    /// Non-empty slots.
    pub child_count: usize,
    pub leaf_count: usize,
    pub group_count: usize,
    /// Depth of the deepest node, the root is 0.
    pub max_depth: u32,
    pub nodes_at_depth: HashMap<u32, u32>,
    pub leaves_at_depth: HashMap<u32, u32>,
}

impl fmt::Display for QbvhValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Avg children/node: {:.3}, groups/leaf: {:.3}",
            self.child_count as f64 / self.node_count.max(1) as f64,
            self.group_count as f64 / self.leaf_count.max(1) as f64
        )?;
        writeln!(
            f,
            "child_count: {}\n node_count: {}\ngroup_count: {}\n leaf_count: {}",
            self.child_count, self.node_count, self.group_count, self.leaf_count
        )?;
        writeln!(f, "Node & Leaf counts for each depth")?;
        for i in 0..=self.max_depth {
            writeln!(
                f,
                "{:<3} {:<10} {:<10}",
                i,
                self.nodes_at_depth.get(&i).unwrap_or(&0),
                self.leaves_at_depth.get(&i).unwrap_or(&0)
            )?;
        }
        Ok(())
    }
}

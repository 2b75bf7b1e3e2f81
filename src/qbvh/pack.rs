//! Regroups each leaf's primitives into groups of four.

use crate::arena::Arena;

use super::builder::{BuildNode, BuildNodeKind};

/// For every leaf of the binary tree, hands its primitives to `pack_group` four at a time and rewrites the
/// leaf's `first`/`count` to the range of groups it produced in `groups`.
///
/// `pack_group` receives the position in `ordered` of the chunk's first primitive and the chunk itself (1 to 4
/// source indices). It pads the group out to four lanes.
pub fn pack_leaves<G>(
    build_nodes: &mut Arena<BuildNode>,
    ordered: &[u32],
    groups: &mut Vec<G>,
    mut pack_group: impl FnMut(u32, &[u32]) -> G,
) {
    crate::scope!("pack_leaves");
    groups.clear();
    groups.reserve(ordered.len().div_ceil(4));
    for node in build_nodes.iter_mut() {
        if let BuildNodeKind::Leaf { first, count } = &mut node.kind {
            let range = *first as usize..(*first + *count) as usize;
            let group_first = groups.len() as u32;
            for (i, chunk) in ordered[range.clone()].chunks(4).enumerate() {
                groups.push(pack_group((range.start + i * 4) as u32, chunk));
            }
            *first = group_first;
            *count = groups.len() as u32 - group_first;
        }
    }
}

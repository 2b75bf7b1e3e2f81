//! Writes the collapsed tree into one contiguous node array.

use crate::arena::{Arena, Handle};

use super::{
    builder::{BuildNode, BuildNodeKind},
    collapse::{CollapsedNode, Slot},
    node::{QbvhNode, LEAF_FLAG},
};

/// Pre-order walk: a node gets its index before its children do, so every child index is greater than its
/// parent's and the root is at index 0.
pub fn flatten(
    build_nodes: &Arena<BuildNode>,
    collapsed: &Arena<CollapsedNode>,
    root: Handle<CollapsedNode>,
    out: &mut Vec<QbvhNode>,
) {
    crate::scope!("flatten");
    out.clear();
    out.reserve(collapsed.len());
    flatten_node(build_nodes, collapsed, root, out);
}

fn flatten_node(
    build_nodes: &Arena<BuildNode>,
    collapsed: &Arena<CollapsedNode>,
    handle: Handle<CollapsedNode>,
    out: &mut Vec<QbvhNode>,
) -> u32 {
    let index = out.len();
    out.push(QbvhNode::EMPTY);

    let source = &collapsed[handle];
    let mut node = QbvhNode {
        axes: source.axes,
        ..QbvhNode::EMPTY
    };
    for (slot, child) in source.slots.iter().enumerate() {
        match *child {
            Slot::Empty => {}
            Slot::Leaf(leaf) => {
                let build = &build_nodes[leaf];
                let BuildNodeKind::Leaf { first, count } = build.kind else {
                    unreachable!("leaf slot refers to an interior node");
                };
                debug_assert!(first & LEAF_FLAG == 0);
                node.bounds.set(slot, &build.aabb);
                node.children[slot] = LEAF_FLAG | first;
                node.group_counts[slot] = count as u16;
            }
            Slot::Inner(inner) => {
                node.bounds.set(slot, &collapsed[inner].aabb);
                node.children[slot] = flatten_node(build_nodes, collapsed, inner, out);
            }
        }
    }

    out[index] = node;
    index as u32
}

//! Folds two binary levels into one four-wide node.

use crate::{
    aabb::Aabb,
    arena::{Arena, Handle},
};

use super::builder::{BuildNode, BuildNodeKind};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Slot {
    #[default]
    Empty,
    /// A leaf of the binary tree, its range is used directly.
    Leaf(Handle<BuildNode>),
    /// Another collapsed node to descend into.
    Inner(Handle<CollapsedNode>),
}

/// Four-wide node of the transient collapsed tree.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(align(16))]
pub struct CollapsedNode {
    /// Bounds of the binary node this was collapsed from.
    pub aabb: Aabb,
    /// Slots 0/1 come from the left binary child, 2/3 from the right one.
    pub slots: [Slot; 4],
    /// Split axis of the binary node, then of its left and right children. 0 where the child is a leaf.
    pub axes: [u8; 3],
}

/// Collapses the binary tree below `root` into `collapsed`. Returns the collapsed root and the number of
/// collapsed levels.
pub fn collapse(
    build_nodes: &Arena<BuildNode>,
    collapsed: &mut Arena<CollapsedNode>,
    root: Handle<BuildNode>,
) -> (Handle<CollapsedNode>, u32) {
    crate::scope!("collapse");
    let mut depth = 0;
    let root = collapse_node(build_nodes, collapsed, root, 1, &mut depth);
    (root, depth)
}

fn collapse_node(
    build_nodes: &Arena<BuildNode>,
    collapsed: &mut Arena<CollapsedNode>,
    node: Handle<BuildNode>,
    level: u32,
    depth: &mut u32,
) -> Handle<CollapsedNode> {
    *depth = (*depth).max(level);
    let aabb = build_nodes[node].aabb;

    let BuildNodeKind::Interior { children, axis } = build_nodes[node].kind else {
        // Only reachable for a root that is a leaf.
        return collapsed.alloc(CollapsedNode {
            aabb,
            slots: [Slot::Leaf(node), Slot::Empty, Slot::Empty, Slot::Empty],
            axes: [0; 3],
        });
    };

    let mut slots = [Slot::Empty; 4];
    let mut axes = [axis, 0, 0];
    for (pair, child) in children.into_iter().enumerate() {
        match build_nodes[child].kind {
            BuildNodeKind::Leaf { .. } => slots[pair * 2] = Slot::Leaf(child),
            BuildNodeKind::Interior {
                children: grandchildren,
                axis,
            } => {
                axes[pair + 1] = axis;
                for (k, grandchild) in grandchildren.into_iter().enumerate() {
                    slots[pair * 2 + k] = if build_nodes[grandchild].is_leaf() {
                        Slot::Leaf(grandchild)
                    } else {
                        Slot::Inner(collapse_node(
                            build_nodes,
                            collapsed,
                            grandchild,
                            level + 1,
                            depth,
                        ))
                    };
                }
            }
        }
    }

    collapsed.alloc(CollapsedNode { aabb, slots, axes })
}

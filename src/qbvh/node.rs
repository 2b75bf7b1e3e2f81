use bytemuck::{Pod, Zeroable};

use crate::{aabb4::Aabb4, INVALID};

/// Set on a child index that refers to a leaf. The low 31 bits are then the first packed group.
pub const LEAF_FLAG: u32 = 1 << 31;

/// A four-wide BVH node. repr(C), Pod, 128 bytes.
///
/// Slots 0 and 1 hold the two halves of the left child of the binary node this was collapsed from, slots 2
/// and 3 those of the right child. A binary child that was already a leaf sits in the even slot of its pair
/// with the odd slot left empty.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct QbvhNode {
    /// Bounds of each slot. Empty slots hold the empty box.
    pub bounds: Aabb4,
    /// Per slot:
    /// - [`INVALID`]: empty slot.
    /// - `LEAF_FLAG | first`: leaf covering `group_counts[i]` packed groups starting at `first`.
    /// - anything else: index of the child node, always greater than the index of this node.
    pub children: [u32; 4],
    /// Number of packed groups of each leaf slot, 0 for the other slots.
    pub group_counts: [u16; 4],
    /// Split axis of the binary node this was collapsed from, then those of its left and right children.
    pub axes: [u8; 3],
    pub _pad: [u8; 5],
}

impl Default for QbvhNode {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl QbvhNode {
    pub const EMPTY: Self = Self {
        bounds: Aabb4::EMPTY,
        children: [INVALID; 4],
        group_counts: [0; 4],
        axes: [0; 3],
        _pad: [0; 5],
    };

    #[inline(always)]
    pub fn is_empty(&self, slot: usize) -> bool {
        self.children[slot] == INVALID
    }

    #[inline(always)]
    pub fn is_leaf(&self, slot: usize) -> bool {
        let child = self.children[slot];
        child != INVALID && child & LEAF_FLAG != 0
    }

    #[inline(always)]
    pub fn is_inner(&self, slot: usize) -> bool {
        self.children[slot] & LEAF_FLAG == 0
    }

    /// `(first group, group count)` of a leaf slot.
    #[inline(always)]
    pub fn leaf_range(&self, slot: usize) -> (u32, u32) {
        debug_assert!(self.is_leaf(slot));
        (
            self.children[slot] & !LEAF_FLAG,
            self.group_counts[slot] as u32,
        )
    }

    /// Front to back order of the four slots for a ray whose direction is negative on the axes flagged in
    /// `dir_is_neg`. A pair is flipped when the ray travels against the axis it was split on.
    #[inline(always)]
    pub fn visit_order(&self, dir_is_neg: [bool; 3]) -> [usize; 4] {
        let [top, left, right] = self.axes;
        let (l0, l1) = if dir_is_neg[left as usize] { (1, 0) } else { (0, 1) };
        let (r0, r1) = if dir_is_neg[right as usize] { (3, 2) } else { (2, 3) };
        if dir_is_neg[top as usize] {
            [r0, r1, l0, l1]
        } else {
            [l0, l1, r0, r1]
        }
    }
}

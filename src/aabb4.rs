//! Four AABBs stored field by field so a ray can be tested against all of them at once.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3A, Vec4};

use crate::{aabb::Aabb, ray::WideRay};

/// `1 + 2 * gamma(3)` from pbrt. Scaling the far slab distance by this keeps rounding in the slab test from
/// reporting misses on boxes that are actually hit.
pub const ROBUST_TFAR_SCALE: f32 = 1.0 + 2.0 * GAMMA_3;

const MACHINE_EPSILON: f32 = f32::EPSILON * 0.5;
const GAMMA_3: f32 = (3.0 * MACHINE_EPSILON) / (1.0 - 3.0 * MACHINE_EPSILON);

/// Four AABBs in struct-of-arrays layout, one lane per box. Unused lanes hold [`Aabb::EMPTY`].
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Aabb4 {
    pub min_x: Vec4,
    pub min_y: Vec4,
    pub min_z: Vec4,
    pub max_x: Vec4,
    pub max_y: Vec4,
    pub max_z: Vec4,
}

impl Default for Aabb4 {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb4 {
    pub const EMPTY: Self = Self {
        min_x: Vec4::splat(f32::INFINITY),
        min_y: Vec4::splat(f32::INFINITY),
        min_z: Vec4::splat(f32::INFINITY),
        max_x: Vec4::splat(f32::NEG_INFINITY),
        max_y: Vec4::splat(f32::NEG_INFINITY),
        max_z: Vec4::splat(f32::NEG_INFINITY),
    };

    pub fn from_aabbs(aabbs: &[Aabb]) -> Self {
        debug_assert!(aabbs.len() <= 4);
        let mut packed = Self::EMPTY;
        for (lane, aabb) in aabbs.iter().enumerate() {
            packed.set(lane, aabb);
        }
        packed
    }

    #[inline(always)]
    pub fn set(&mut self, lane: usize, aabb: &Aabb) {
        self.min_x[lane] = aabb.min.x;
        self.min_y[lane] = aabb.min.y;
        self.min_z[lane] = aabb.min.z;
        self.max_x[lane] = aabb.max.x;
        self.max_y[lane] = aabb.max.y;
        self.max_z[lane] = aabb.max.z;
    }

    #[inline(always)]
    pub fn get(&self, lane: usize) -> Aabb {
        Aabb::new(
            Vec3A::new(self.min_x[lane], self.min_y[lane], self.min_z[lane]),
            Vec3A::new(self.max_x[lane], self.max_y[lane], self.max_z[lane]),
        )
    }

    /// Union of all four lanes.
    pub fn union_all(&self) -> Aabb {
        Aabb::new(
            Vec3A::new(
                self.min_x.min_element(),
                self.min_y.min_element(),
                self.min_z.min_element(),
            ),
            Vec3A::new(
                self.max_x.max_element(),
                self.max_y.max_element(),
                self.max_z.max_element(),
            ),
        )
    }

    /// Slab test against all four boxes. Returns the hit mask (bit `i` set if lane `i` is hit within
    /// `[tmin, tmax]`) and the per lane entry distance, which is only meaningful for hit lanes.
    #[inline(always)]
    pub fn intersect(&self, ray: &WideRay, tmin: f32, tmax: f32) -> (u32, Vec4) {
        #[inline(always)]
        fn slab(lo: Vec4, hi: Vec4, neg: bool, origin: Vec4, inv: Vec4) -> (Vec4, Vec4) {
            let (near, far) = if neg { (hi, lo) } else { (lo, hi) };
            ((near - origin) * inv, (far - origin) * inv)
        }

        let (near_x, far_x) = slab(
            self.min_x,
            self.max_x,
            ray.dir_is_neg[0],
            ray.origin[0],
            ray.inv_direction[0],
        );
        let (near_y, far_y) = slab(
            self.min_y,
            self.max_y,
            ray.dir_is_neg[1],
            ray.origin[1],
            ray.inv_direction[1],
        );
        let (near_z, far_z) = slab(
            self.min_z,
            self.max_z,
            ray.dir_is_neg[2],
            ray.origin[2],
            ray.inv_direction[2],
        );

        let tnear = near_x.max(near_y).max(near_z.max(Vec4::splat(tmin)));
        let tfar = (far_x.min(far_y).min(far_z) * ROBUST_TFAR_SCALE).min(Vec4::splat(tmax));

        (tnear.cmple(tfar).bitmask(), tnear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ray::Ray;
    use glam::vec3a;

    fn unit_boxes() -> Aabb4 {
        // Unit boxes along +x at 0, 2 and 4, the last lane is left empty.
        Aabb4::from_aabbs(&[
            Aabb::new(vec3a(0.0, 0.0, 0.0), vec3a(1.0, 1.0, 1.0)),
            Aabb::new(vec3a(2.0, 0.0, 0.0), vec3a(3.0, 1.0, 1.0)),
            Aabb::new(vec3a(4.0, 0.0, 0.0), vec3a(5.0, 1.0, 1.0)),
        ])
    }

    #[test]
    fn get_set() {
        let boxes = unit_boxes();
        assert_eq!(
            boxes.get(1),
            Aabb::new(vec3a(2.0, 0.0, 0.0), vec3a(3.0, 1.0, 1.0))
        );
        assert!(boxes.get(3).is_empty());
        assert_eq!(
            boxes.union_all(),
            Aabb::new(vec3a(0.0, 0.0, 0.0), vec3a(5.0, 1.0, 1.0))
        );
    }

    #[test]
    fn hits_along_x() {
        let boxes = unit_boxes();
        let ray = Ray::new_inf(vec3a(-1.0, 0.5, 0.5), vec3a(1.0, 0.0, 0.0));
        let (mask, tnear) = boxes.intersect(&WideRay::new(&ray), ray.tmin, ray.tmax);
        assert_eq!(mask, 0b0111);
        assert_eq!(tnear.x, 1.0);
        assert_eq!(tnear.y, 3.0);
        assert_eq!(tnear.z, 5.0);

        // Reversed direction from the other side still finds the same boxes.
        let ray = Ray::new_inf(vec3a(6.0, 0.5, 0.5), vec3a(-1.0, 0.0, 0.0));
        let (mask, tnear) = boxes.intersect(&WideRay::new(&ray), ray.tmin, ray.tmax);
        assert_eq!(mask, 0b0111);
        assert_eq!(tnear.z, 1.0);
    }

    #[test]
    fn respects_tmax() {
        let boxes = unit_boxes();
        let ray = Ray::new(vec3a(-1.0, 0.5, 0.5), vec3a(1.0, 0.0, 0.0), 0.0, 3.5);
        let (mask, _) = boxes.intersect(&WideRay::new(&ray), ray.tmin, ray.tmax);
        assert_eq!(mask, 0b0011);
    }

    #[test]
    fn empty_lanes_never_hit() {
        let boxes = Aabb4::EMPTY;
        for dir in [
            vec3a(1.0, 1.0, 1.0),
            vec3a(-1.0, 0.0, 0.0),
            vec3a(0.0, -1.0, 0.3),
        ] {
            let ray = Ray::new_inf(Vec3A::ZERO, dir);
            let (mask, _) = boxes.intersect(&WideRay::new(&ray), ray.tmin, ray.tmax);
            assert_eq!(mask, 0);
        }
    }
}

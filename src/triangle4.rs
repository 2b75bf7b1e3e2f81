//! Four triangles in struct-of-arrays layout with a four-wide Möller-Trumbore test.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3A, Vec4};

use crate::{ray::WideRay, triangle::Triangle, INVALID};

/// Four triangles stored as `v0`, `e1 = v1 - v0` and `e2 = v2 - v0`, each split into x/y/z lanes.
///
/// Unused lanes are all zero (a degenerate triangle, the determinant is exactly 0 so it can't be hit)
/// and carry the id [`INVALID`].
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Triangle4 {
    pub v0: [Vec4; 3],
    pub e1: [Vec4; 3],
    pub e2: [Vec4; 3],
    /// Caller defined id per lane. The mesh structure stores the primitive's position in its ordered list.
    pub ids: [u32; 4],
}

impl Default for Triangle4 {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Nearest lane hit by [`Triangle4::intersect`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle4Hit {
    pub lane: usize,
    pub id: u32,
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

impl Triangle4 {
    pub const EMPTY: Self = Self {
        v0: [Vec4::ZERO; 3],
        e1: [Vec4::ZERO; 3],
        e2: [Vec4::ZERO; 3],
        ids: [INVALID; 4],
    };

    /// Packs up to four `(triangle, id)` pairs, padding the rest.
    pub fn pack(tris: impl IntoIterator<Item = (Triangle, u32)>) -> Self {
        let mut packed = Self::EMPTY;
        for (lane, (tri, id)) in tris.into_iter().enumerate() {
            assert!(lane < 4, "Triangle4 holds at most 4 triangles");
            let e1 = tri.v1 - tri.v0;
            let e2 = tri.v2 - tri.v0;
            for axis in 0..3 {
                packed.v0[axis][lane] = tri.v0[axis];
                packed.e1[axis][lane] = e1[axis];
                packed.e2[axis][lane] = e2[axis];
            }
            packed.ids[lane] = id;
        }
        packed
    }

    /// Number of lanes holding a real triangle.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.ids.iter().filter(|id| **id != INVALID).count()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.ids[0] == INVALID
    }

    /// Rebuilds the triangle in `lane`, mostly for debugging since `v1`/`v2` go through `v0 + e`.
    pub fn triangle(&self, lane: usize) -> Triangle {
        let v0 = Vec3A::new(self.v0[0][lane], self.v0[1][lane], self.v0[2][lane]);
        let e1 = Vec3A::new(self.e1[0][lane], self.e1[1][lane], self.e1[2][lane]);
        let e2 = Vec3A::new(self.e2[0][lane], self.e2[1][lane], self.e2[2][lane]);
        Triangle::new(v0, v0 + e1, v0 + e2)
    }

    /// Returns a mask of the lanes the ray hits strictly inside `(tmin, tmax)` along with the per lane
    /// distance and barycentrics.
    #[inline(always)]
    pub fn intersect_lanes(&self, ray: &WideRay, tmin: f32, tmax: f32) -> (u32, Vec4, Vec4, Vec4) {
        let [dx, dy, dz] = ray.direction;
        let [e1x, e1y, e1z] = self.e1;
        let [e2x, e2y, e2z] = self.e2;

        // p = d x e2
        let px = dy * e2z - dz * e2y;
        let py = dz * e2x - dx * e2z;
        let pz = dx * e2y - dy * e2x;
        let det = e1x * px + e1y * py + e1z * pz;
        let inv_det = Vec4::ONE / det;

        let sx = ray.origin[0] - self.v0[0];
        let sy = ray.origin[1] - self.v0[1];
        let sz = ray.origin[2] - self.v0[2];
        let u = (sx * px + sy * py + sz * pz) * inv_det;

        // q = s x e1
        let qx = sy * e1z - sz * e1y;
        let qy = sz * e1x - sx * e1z;
        let qz = sx * e1y - sy * e1x;
        let v = (dx * qx + dy * qy + dz * qz) * inv_det;
        let t = (e2x * qx + e2y * qy + e2z * qz) * inv_det;

        // NaNs from a zero determinant fail every comparison below as well.
        let valid = det.cmpne(Vec4::ZERO)
            & u.cmpge(Vec4::ZERO)
            & v.cmpge(Vec4::ZERO)
            & (u + v).cmple(Vec4::ONE)
            & t.cmpgt(Vec4::splat(tmin))
            & t.cmplt(Vec4::splat(tmax));

        (valid.bitmask(), t, u, v)
    }

    /// Closest lane hit strictly inside `(tmin, tmax)`, if any.
    #[inline(always)]
    pub fn intersect(&self, ray: &WideRay, tmin: f32, tmax: f32) -> Option<Triangle4Hit> {
        let (mut mask, t, u, v) = self.intersect_lanes(ray, tmin, tmax);
        let mut best: Option<Triangle4Hit> = None;
        while mask != 0 {
            let lane = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            if best.map_or(true, |b| t[lane] < b.t) {
                best = Some(Triangle4Hit {
                    lane,
                    id: self.ids[lane],
                    t: t[lane],
                    u: u[lane],
                    v: v[lane],
                });
            }
        }
        best
    }

    /// True if any lane is hit strictly inside `(tmin, tmax)`.
    #[inline(always)]
    pub fn intersect_any(&self, ray: &WideRay, tmin: f32, tmax: f32) -> bool {
        self.intersect_lanes(ray, tmin, tmax).0 != 0
    }
}

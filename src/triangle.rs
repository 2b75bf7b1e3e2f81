//! Triangle representation in 3D space.

use bytemuck::{Pod, Zeroable};
use glam::{vec2, Vec2, Vec3A};

use crate::{aabb::Aabb, ray::Ray, Boundable};

/// Texture coordinates used when a mesh doesn't provide any.
pub const DEFAULT_UVS: [Vec2; 3] = [vec2(0.0, 0.0), vec2(1.0, 0.0), vec2(1.0, 1.0)];

#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[repr(C)]
pub struct Triangle {
    pub v0: Vec3A,
    pub v1: Vec3A,
    pub v2: Vec3A,
}

unsafe impl Pod for Triangle {}
unsafe impl Zeroable for Triangle {}

/// Result of a successful ray/triangle test. `u` and `v` weight `v1` and `v2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleIntersection {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

impl Triangle {
    pub const fn new(v0: Vec3A, v1: Vec3A, v2: Vec3A) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the normal of the triangle geometry. Zero if the triangle is degenerate.
    #[inline(always)]
    pub fn compute_normal(&self) -> Vec3A {
        (self.v1 - self.v0)
            .cross(self.v2 - self.v0)
            .normalize_or_zero()
    }

    #[inline(always)]
    pub fn area(&self) -> f32 {
        (self.v1 - self.v0).cross(self.v2 - self.v0).length() * 0.5
    }

    /// Compute the bounding box of the triangle.
    #[inline(always)]
    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(&[self.v0, self.v1, self.v2])
    }

    /// Scalar Möller-Trumbore test. Hits are reported strictly inside `(ray.tmin, ray.tmax)`.
    ///
    /// The four-wide [`crate::triangle4::Triangle4::intersect`] does the same arithmetic per lane, this is
    /// the reference it's checked against.
    #[inline]
    pub fn intersect(&self, ray: &Ray) -> Option<TriangleIntersection> {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        let p = ray.direction.cross(e2);
        let det = e1.dot(p);
        if det == 0.0 {
            return None;
        }
        let inv_det = 1.0 / det;

        let s = ray.origin - self.v0;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(e1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = e2.dot(q) * inv_det;
        (t > ray.tmin && t < ray.tmax).then_some(TriangleIntersection { t, u, v })
    }
}

impl Boundable for Triangle {
    #[inline(always)]
    fn aabb(&self) -> Aabb {
        Triangle::aabb(self)
    }
}

/// A triangle with per vertex texture coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TexturedTriangle {
    pub tri: Triangle,
    pub uvs: [Vec2; 3],
}

impl Boundable for TexturedTriangle {
    #[inline(always)]
    fn aabb(&self) -> Aabb {
        self.tri.aabb()
    }
}

/// What a mesh structure needs from its primitives: bounds for the build, the world space triangle for
/// packing, and texture coordinates for the closest-hit payload.
pub trait TrianglePrimitive: Boundable {
    fn triangle(&self) -> Triangle;

    fn uvs(&self) -> [Vec2; 3] {
        DEFAULT_UVS
    }
}

impl TrianglePrimitive for Triangle {
    #[inline(always)]
    fn triangle(&self) -> Triangle {
        *self
    }
}

impl TrianglePrimitive for TexturedTriangle {
    #[inline(always)]
    fn triangle(&self) -> Triangle {
        self.tri
    }

    #[inline(always)]
    fn uvs(&self) -> [Vec2; 3] {
        self.uvs
    }
}

//! A ray in 3D space, plus the lane-splatted form the four-wide kernels consume.

use glam::{vec3a, Vec3A, Vec4};

/// Computes the inverse of `x` avoiding division by zero.
pub fn safe_inverse(x: f32) -> f32 {
    if x.abs() <= f32::EPSILON {
        x.signum() / f32::EPSILON
    } else {
        1.0 / x
    }
}

/// A struct representing a ray in 3D space.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C)]
pub struct Ray {
    /// The starting point of the ray.
    pub origin: Vec3A,
    /// The direction vector of the ray. Does not need to be normalized, `t` is measured in multiples of it.
    pub direction: Vec3A,
    /// The inverse of the direction vector components, used by the slab tests.
    pub inv_direction: Vec3A,
    /// The minimum `t` (distance) value for intersection tests.
    pub tmin: f32,
    /// The maximum `t` (distance) value for intersection tests. Closest-hit queries shrink it as they
    /// find hits.
    pub tmax: f32,
}

impl Ray {
    /// Creates a new `Ray` with the given origin, direction, and `t` (distance) range.
    pub fn new(origin: Vec3A, direction: Vec3A, min: f32, max: f32) -> Self {
        let ray = Ray {
            origin,
            direction,
            inv_direction: vec3a(
                safe_inverse(direction.x),
                safe_inverse(direction.y),
                safe_inverse(direction.z),
            ),
            tmin: min,
            tmax: max,
        };

        debug_assert!(ray.inv_direction.is_finite());
        debug_assert!(ray.direction.is_finite());
        debug_assert!(origin.is_finite());

        ray
    }

    /// Creates a new infinite `Ray` with the given origin, direction.
    pub fn new_inf(origin: Vec3A, direction: Vec3A) -> Self {
        Self::new(origin, direction, 0.0, f32::INFINITY)
    }

    /// Point at parameter `t`.
    #[inline(always)]
    pub fn at(&self, t: f32) -> Vec3A {
        self.origin + self.direction * t
    }
}

/// A ray with each component broadcast to all four lanes. Built once per query, `tmin`/`tmax` are read from
/// the scalar [`Ray`] as they change.
#[derive(Clone, Copy, Debug)]
pub struct WideRay {
    pub origin: [Vec4; 3],
    pub direction: [Vec4; 3],
    pub inv_direction: [Vec4; 3],
    /// Sign of `inv_direction` per axis. Decides which slab plane is near and the child visiting order.
    pub dir_is_neg: [bool; 3],
}

impl WideRay {
    #[inline(always)]
    pub fn new(ray: &Ray) -> Self {
        let splat = |v: Vec3A| [Vec4::splat(v.x), Vec4::splat(v.y), Vec4::splat(v.z)];
        WideRay {
            origin: splat(ray.origin),
            direction: splat(ray.direction),
            inv_direction: splat(ray.inv_direction),
            dir_is_neg: [
                ray.inv_direction.x < 0.0,
                ray.inv_direction.y < 0.0,
                ray.inv_direction.z < 0.0,
            ],
        }
    }
}

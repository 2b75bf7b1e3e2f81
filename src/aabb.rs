//! An Axis-Aligned Bounding Box (AABB) represented by its minimum and maximum points.

use std::ops::BitAnd;

use bytemuck::{Pod, Zeroable};
use glam::{Affine3A, Mat3A, Vec3A};

use crate::{ray::Ray, Boundable};

/// An Axis-Aligned Bounding Box (AABB) represented by its minimum and maximum points.
#[derive(Clone, Copy, Debug, PartialEq, Zeroable)]
#[repr(C)]
pub struct Aabb {
    pub min: Vec3A,
    pub max: Vec3A,
}

unsafe impl Pod for Aabb {}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// The empty box. Union with anything yields the other operand unchanged and no ray can hit it.
    pub const EMPTY: Self = Self {
        min: Vec3A::splat(f32::INFINITY),
        max: Vec3A::splat(f32::NEG_INFINITY),
    };

    /// Creates a new AABB with the given minimum and maximum points.
    #[inline(always)]
    pub fn new(min: Vec3A, max: Vec3A) -> Self {
        Self { min, max }
    }

    /// Creates a new AABB with both min and max set to the given point.
    #[inline(always)]
    pub fn from_point(point: Vec3A) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Creates an AABB that bounds the given set of points. Empty if there are none.
    #[inline(always)]
    pub fn from_points(points: &[Vec3A]) -> Self {
        points
            .iter()
            .fold(Self::EMPTY, |aabb, point| aabb.union(&Self::from_point(*point)))
    }

    /// Checks if the AABB contains the given point.
    #[inline(always)]
    pub fn contains_point(&self, point: Vec3A) -> bool {
        (point.cmpge(self.min).bitand(point.cmple(self.max))).all()
    }

    /// Checks if `other` lies entirely inside this AABB. The empty box is inside everything.
    #[inline(always)]
    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        other.is_empty() || (other.min.cmpge(self.min) & other.max.cmple(self.max)).all()
    }

    /// Extends the AABB to include the given point.
    #[inline(always)]
    pub fn extend(&mut self, point: Vec3A) -> &mut Self {
        *self = self.union(&Self::from_point(point));
        self
    }

    /// Returns the union of this AABB and another AABB.
    #[inline(always)]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Returns the diagonal vector of the AABB.
    #[inline(always)]
    pub fn diagonal(&self) -> Vec3A {
        self.max - self.min
    }

    /// Returns the center point of the AABB.
    #[inline(always)]
    pub fn center(&self) -> Vec3A {
        (self.max + self.min) * 0.5
    }

    /// Returns the index of the largest axis of the AABB.
    #[inline]
    pub fn largest_axis(&self) -> usize {
        let d = self.diagonal();
        if d.x < d.y {
            if d.y < d.z {
                2
            } else {
                1
            }
        } else if d.x < d.z {
            2
        } else {
            0
        }
    }

    /// Position of `point` relative to the corners, 0 at `min` and 1 at `max` on each axis.
    /// Axes where the box is flat report 0.
    #[inline(always)]
    pub fn offset(&self, point: Vec3A) -> Vec3A {
        let d = self.diagonal();
        let o = point - self.min;
        Vec3A::select(d.cmpgt(Vec3A::ZERO), o / d, Vec3A::ZERO)
    }

    /// Returns half the surface area of the AABB. Zero for the empty box.
    #[inline(always)]
    pub fn half_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.diagonal();
        (d.x + d.y) * d.z + d.x * d.y
    }

    /// Returns the surface area of the AABB. Zero for the empty box.
    #[inline(always)]
    pub fn surface_area(&self) -> f32 {
        2.0 * self.half_area()
    }

    /// True if min > max on some axis, as for [`Aabb::EMPTY`].
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// True if both corners are finite, which also means the box is not [`Aabb::EMPTY`].
    #[inline(always)]
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Bounds of this box after applying `transform`, using the center/extent form
    /// (Arvo, "Transforming Axis-Aligned Bounding Boxes").
    pub fn transformed(&self, transform: &Affine3A) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let m = transform.matrix3;
        let abs = Mat3A::from_cols(m.x_axis.abs(), m.y_axis.abs(), m.z_axis.abs());
        let center = transform.transform_point3a(self.center());
        let extent = abs * (self.diagonal() * 0.5);
        Aabb::new(center - extent, center + extent)
    }

    /// Distance along the ray to where it enters the box, clamped to `ray.tmin`.
    /// Returns `f32::INFINITY` if the box is missed within `[ray.tmin, ray.tmax]`.
    #[inline(always)]
    pub fn intersect_ray(&self, ray: &Ray) -> f32 {
        // Near and far planes are picked per axis from the direction sign so inverted boxes never hit.
        let neg = ray.inv_direction.cmplt(Vec3A::ZERO);
        let near = Vec3A::select(neg, self.max, self.min);
        let far = Vec3A::select(neg, self.min, self.max);
        let t_near = (near - ray.origin) * ray.inv_direction;
        let t_far = (far - ray.origin) * ray.inv_direction;

        let tnear = t_near.max_element().max(ray.tmin);
        let tfar = (t_far.min_element() * crate::aabb4::ROBUST_TFAR_SCALE).min(ray.tmax);

        if tnear <= tfar {
            tnear
        } else {
            f32::INFINITY
        }
    }
}

impl Boundable for Aabb {
    #[inline(always)]
    fn aabb(&self) -> Aabb {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{vec3, Quat};

    #[test]
    fn test_from_points() {
        let points = vec![Vec3A::ZERO, Vec3A::ONE, Vec3A::splat(2.0)];
        let aabb = Aabb::from_points(&points);
        assert_eq!(aabb.min, Vec3A::ZERO);
        assert_eq!(aabb.max, Vec3A::splat(2.0));
        assert!(Aabb::from_points(&[]).is_empty());
    }

    #[test]
    fn test_empty_is_union_identity() {
        let aabb = Aabb::new(Vec3A::ZERO, Vec3A::ONE);
        assert_eq!(Aabb::EMPTY.union(&aabb), aabb);
        assert_eq!(aabb.union(&Aabb::EMPTY), aabb);
        assert!(Aabb::EMPTY.is_empty());
        assert!(!Aabb::EMPTY.is_finite());
        assert_eq!(Aabb::EMPTY.half_area(), 0.0);
    }

    #[test]
    fn test_extend_and_contains() {
        let mut aabb = Aabb::from_point(Vec3A::ZERO);
        aabb.extend(Vec3A::ONE);
        assert!(aabb.contains_point(Vec3A::splat(0.5)));
        assert!(!aabb.contains_point(Vec3A::splat(1.5)));
        assert!(aabb.contains_aabb(&Aabb::new(Vec3A::splat(0.25), Vec3A::splat(0.75))));
        assert!(!aabb.contains_aabb(&Aabb::new(Vec3A::splat(0.25), Vec3A::splat(1.75))));
        assert!(aabb.contains_aabb(&Aabb::EMPTY));
    }

    #[test]
    fn test_largest_axis() {
        let aabb = Aabb::new(Vec3A::ZERO, Vec3A::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.largest_axis(), 2);
        let aabb = Aabb::new(Vec3A::ZERO, Vec3A::new(4.0, 2.0, 3.0));
        assert_eq!(aabb.largest_axis(), 0);
    }

    #[test]
    fn test_areas() {
        let aabb = Aabb::new(Vec3A::ZERO, Vec3A::ONE);
        assert_eq!(aabb.half_area(), 3.0);
        assert_eq!(aabb.surface_area(), 6.0);
        let aabb = Aabb::new(Vec3A::ZERO, Vec3A::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.surface_area(), 22.0);
    }

    #[test]
    fn test_offset() {
        let aabb = Aabb::new(Vec3A::ZERO, Vec3A::new(2.0, 4.0, 0.0));
        assert_eq!(aabb.offset(Vec3A::new(1.0, 1.0, 0.0)), Vec3A::new(0.5, 0.25, 0.0));
    }

    #[test]
    fn test_transformed() {
        let aabb = Aabb::new(Vec3A::splat(-1.0), Vec3A::ONE);
        let moved = aabb.transformed(&Affine3A::from_translation(vec3(5.0, 0.0, 0.0)));
        assert_eq!(moved.min, Vec3A::new(4.0, -1.0, -1.0));
        assert_eq!(moved.max, Vec3A::new(6.0, 1.0, 1.0));

        let rotated = aabb.transformed(&Affine3A::from_quat(Quat::from_rotation_z(
            std::f32::consts::FRAC_PI_4,
        )));
        let r = std::f32::consts::SQRT_2;
        assert!((rotated.max.x - r).abs() < 1e-5);
        assert!((rotated.max.y - r).abs() < 1e-5);
        assert!((rotated.max.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_intersect_ray() {
        let aabb = Aabb::new(Vec3A::ZERO, Vec3A::ONE);
        let ray = Ray::new(Vec3A::splat(-1.0), Vec3A::ONE, 0.0, f32::MAX);
        assert_eq!(aabb.intersect_ray(&ray), 1.0);
        let ray_no_intersect = Ray::new(Vec3A::splat(2.0), Vec3A::ONE, 0.0, f32::MAX);
        assert_eq!(aabb.intersect_ray(&ray_no_intersect), f32::INFINITY);
        let too_short = Ray::new(Vec3A::splat(-1.0), Vec3A::ONE, 0.0, 0.5);
        assert_eq!(aabb.intersect_ray(&too_short), f32::INFINITY);
        assert_eq!(Aabb::EMPTY.intersect_ray(&ray), f32::INFINITY);
    }
}

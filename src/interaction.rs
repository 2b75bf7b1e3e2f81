//! Closest-hit payload handed to shading.

use glam::{Affine3A, Vec2, Vec3A};

use crate::{
    triangle::{Triangle, TriangleIntersection},
    INVALID,
};

/// Geometry at a ray/triangle hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceInteraction {
    /// Hit point.
    pub p: Vec3A,
    /// Geometric normal, unit length, facing against the incoming ray.
    pub n: Vec3A,
    /// Partial derivatives of `p` with respect to the texture coordinates.
    pub dpdu: Vec3A,
    pub dpdv: Vec3A,
    /// Interpolated texture coordinates.
    pub uv: Vec2,
    /// Barycentric weights of `v1` and `v2`.
    pub barycentric: Vec2,
    /// Negated ray direction.
    pub wo: Vec3A,
    /// Ray parameter of the hit.
    pub t: f32,
    /// Index of the triangle in the list the mesh structure was built from.
    pub primitive_id: u32,
    /// Index of the instance in the list the instance structure was built from, [`INVALID`] for hits
    /// reported by a mesh structure directly.
    pub instance_id: u32,
}

impl Default for SurfaceInteraction {
    fn default() -> Self {
        Self {
            p: Vec3A::ZERO,
            n: Vec3A::ZERO,
            dpdu: Vec3A::ZERO,
            dpdv: Vec3A::ZERO,
            uv: Vec2::ZERO,
            barycentric: Vec2::ZERO,
            wo: Vec3A::ZERO,
            t: f32::INFINITY,
            primitive_id: INVALID,
            instance_id: INVALID,
        }
    }
}

impl SurfaceInteraction {
    /// Fills in the payload for `hit` on `tri`, as seen by a ray with `direction`.
    pub fn from_triangle_hit(
        tri: &Triangle,
        uvs: &[Vec2; 3],
        hit: &TriangleIntersection,
        direction: Vec3A,
        primitive_id: u32,
    ) -> Self {
        let b0 = 1.0 - hit.u - hit.v;
        let p = tri.v0 * b0 + tri.v1 * hit.u + tri.v2 * hit.v;
        let uv = uvs[0] * b0 + uvs[1] * hit.u + uvs[2] * hit.v;

        let mut n = tri.compute_normal();
        if n.dot(direction) > 0.0 {
            n = -n;
        }

        let (dpdu, dpdv) = texture_derivatives(tri, uvs, n);

        Self {
            p,
            n,
            dpdu,
            dpdv,
            uv,
            barycentric: Vec2::new(hit.u, hit.v),
            wo: -direction,
            t: hit.t,
            primitive_id,
            instance_id: INVALID,
        }
    }

    /// Moves the payload from instance space to world space. `t` is left alone, it's the same parameter in
    /// both spaces since ray directions are transformed without renormalizing.
    pub fn transform(&mut self, object_to_world: &Affine3A, world_to_object: &Affine3A) {
        self.p = object_to_world.transform_point3a(self.p);
        self.dpdu = object_to_world.transform_vector3a(self.dpdu);
        self.dpdv = object_to_world.transform_vector3a(self.dpdv);
        self.wo = object_to_world.transform_vector3a(self.wo);
        // Normals go through the inverse transpose.
        let n = world_to_object.matrix3.transpose() * self.n;
        self.n = n.normalize_or_zero();
        if self.n.dot(self.wo) < 0.0 {
            self.n = -self.n;
        }
    }
}

/// `dp/du` and `dp/dv` from the triangle edges and the uv Jacobian. Falls back to an arbitrary basis around
/// `n` when the uv mapping is degenerate.
fn texture_derivatives(tri: &Triangle, uvs: &[Vec2; 3], n: Vec3A) -> (Vec3A, Vec3A) {
    let duv02 = uvs[0] - uvs[2];
    let duv12 = uvs[1] - uvs[2];
    let dp02 = tri.v0 - tri.v2;
    let dp12 = tri.v1 - tri.v2;
    let determinant = duv02.x * duv12.y - duv02.y * duv12.x;

    if determinant.abs() >= 1e-9 {
        let inv = 1.0 / determinant;
        let dpdu = (dp02 * duv12.y - dp12 * duv02.y) * inv;
        let dpdv = (dp12 * duv02.x - dp02 * duv12.x) * inv;
        if dpdu.cross(dpdv).length_squared() > 0.0 {
            return (dpdu, dpdv);
        }
    }
    orthonormal_basis(n)
}

/// Two unit vectors perpendicular to `n` and to each other.
/// From "Building an Orthonormal Basis, Revisited" (Duff et al. 2017).
pub fn orthonormal_basis(n: Vec3A) -> (Vec3A, Vec3A) {
    let sign = 1.0f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    (
        Vec3A::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x),
        Vec3A::new(b, sign + n.y * n.y * a, -n.y),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangle::DEFAULT_UVS;
    use approx::assert_relative_eq;
    use glam::{vec2, vec3, vec3a};

    const TRI: Triangle = Triangle::new(
        vec3a(0.0, 0.0, 1.0),
        vec3a(2.0, 0.0, 1.0),
        vec3a(2.0, 2.0, 1.0),
    );

    #[test]
    fn interpolates_and_orients() {
        let hit = TriangleIntersection {
            t: 1.0,
            u: 0.25,
            v: 0.5,
        };
        let isect = SurfaceInteraction::from_triangle_hit(&TRI, &DEFAULT_UVS, &hit, Vec3A::Z, 7);
        assert_relative_eq!(isect.p.x, 1.5);
        assert_relative_eq!(isect.p.y, 1.0);
        assert_relative_eq!(isect.uv.x, 0.75);
        assert_relative_eq!(isect.uv.y, 0.5);
        // The triangle winds towards +z, the ray travels +z so the normal is flipped.
        assert_eq!(isect.n, -Vec3A::Z);
        assert_eq!(isect.primitive_id, 7);
        assert_eq!(isect.instance_id, INVALID);

        // Default uvs map u to x and v to y, scaled by the triangle size of 2.
        assert_relative_eq!(isect.dpdu.x, 2.0);
        assert_relative_eq!(isect.dpdu.y, 0.0);
        assert_relative_eq!(isect.dpdv.y, 2.0);
    }

    #[test]
    fn degenerate_uvs_fall_back_to_basis() {
        let hit = TriangleIntersection {
            t: 1.0,
            u: 0.2,
            v: 0.2,
        };
        let uvs = [vec2(0.5, 0.5); 3];
        let isect = SurfaceInteraction::from_triangle_hit(&TRI, &uvs, &hit, -Vec3A::Z, 0);
        assert_eq!(isect.n, Vec3A::Z);
        assert_relative_eq!(isect.dpdu.length(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(isect.dpdu.dot(isect.n), 0.0, epsilon = 1e-6);
        assert_relative_eq!(isect.dpdv.dot(isect.n), 0.0, epsilon = 1e-6);
        assert_relative_eq!(isect.dpdu.dot(isect.dpdv), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn basis_is_orthonormal() {
        for n in [Vec3A::Z, -Vec3A::Z, Vec3A::X, vec3a(0.6, 0.0, -0.8)] {
            let (s, t) = orthonormal_basis(n);
            assert_relative_eq!(s.dot(t), 0.0, epsilon = 1e-6);
            assert_relative_eq!(s.dot(n), 0.0, epsilon = 1e-6);
            assert_relative_eq!(t.length(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn transform_to_world() {
        let hit = TriangleIntersection {
            t: 1.0,
            u: 0.25,
            v: 0.5,
        };
        let mut isect = SurfaceInteraction::from_triangle_hit(&TRI, &DEFAULT_UVS, &hit, Vec3A::Z, 0);
        let object_to_world =
            Affine3A::from_scale_rotation_translation(vec3(1.0, 1.0, 4.0), Default::default(), vec3(3.0, 0.0, 0.0));
        isect.transform(&object_to_world, &object_to_world.inverse());
        assert_relative_eq!(isect.p.x, 4.5);
        assert_relative_eq!(isect.p.z, 4.0);
        assert_relative_eq!(isect.n.z, -1.0);
        assert_relative_eq!(isect.n.length(), 1.0);
    }
}

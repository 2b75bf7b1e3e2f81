//! Deterministic noise and small meshes for tests and examples.

pub mod sampling {
    use std::f32::consts::TAU;

    use glam::*;

    use crate::ray::Ray;

    #[inline(always)]
    pub fn uhash(x: u32) -> u32 {
        // from https://nullprogram.com/blog/2018/07/31/
        let mut x = x ^ (x >> 16);
        x = x.wrapping_mul(0x7feb352d);
        x ^= x >> 15;
        x = x.wrapping_mul(0x846ca68b);
        x ^ (x >> 16)
    }

    #[inline(always)]
    pub fn uhash2(a: u32, b: u32) -> u32 {
        uhash(a.wrapping_mul(1597334673) ^ b.wrapping_mul(3812015801))
    }

    /// Maps a hash to `[0, 1]`.
    #[inline(always)]
    pub fn unormf(n: u32) -> f32 {
        n as f32 * (1.0 / u32::MAX as f32)
    }

    #[inline(always)]
    pub fn hash_noise(coord: UVec2, seed: u32) -> f32 {
        unormf(uhash2(coord.x, (coord.y << 11).wrapping_add(seed)))
    }

    #[inline(always)]
    pub fn uniform_sample_sphere(urand: Vec2) -> Vec3A {
        let z = 1.0 - 2.0 * urand.x;
        let r = (1.0 - z * z).max(0.0).sqrt();
        let theta = urand.y * TAU;
        vec3a(r * theta.cos(), r * theta.sin(), z)
    }

    /// Rays starting on a sphere of `radius` around the origin, aimed at random points inside a sphere of
    /// `target_radius`.
    pub fn random_rays(count: u32, seed: u32, radius: f32, target_radius: f32) -> Vec<Ray> {
        (0..count)
            .map(|i| {
                let noise = |k: u32| hash_noise(uvec2(i, k), seed);
                let origin = uniform_sample_sphere(vec2(noise(0), noise(1))) * radius;
                let target = uniform_sample_sphere(vec2(noise(2), noise(3))) * target_radius * noise(4);
                Ray::new_inf(origin, (target - origin).normalize())
            })
            .collect()
    }
}

pub mod geometry {
    use glam::*;

    use crate::{aabb::Aabb, triangle::Triangle};

    /// Square of side `2 * half_size` in the plane `z`, centered on the z axis, as two triangles.
    pub fn quad_at_z(z: f32, half_size: f32) -> [Triangle; 2] {
        let h = half_size;
        let (a, b, c, d) = (
            vec3a(-h, -h, z),
            vec3a(h, -h, z),
            vec3a(h, h, z),
            vec3a(-h, h, z),
        );
        [Triangle::new(a, b, c), Triangle::new(a, c, d)]
    }

    /// `n * n` triangles spread over the xy plane with a gap between each, facing z. Each sits at its own
    /// height in `[1, 2]` so no two overlap from any direction.
    pub fn triangle_grid(n: u32, spacing: f32) -> Vec<Triangle> {
        let size = spacing * 0.8;
        (0..n * n)
            .map(|i| {
                let (x, y) = ((i % n) as f32 * spacing, (i / n) as f32 * spacing);
                let z = 1.0 + i as f32 / (n * n) as f32;
                Triangle::new(
                    vec3a(x, y, z),
                    vec3a(x + size, y, z),
                    vec3a(x, y + size, z),
                )
            })
            .collect()
    }

    /// The twelve triangles of the surface of `aabb`.
    pub fn box_mesh(aabb: &Aabb) -> Vec<Triangle> {
        let corner = |i: usize| {
            Vec3A::select(
                BVec3A::new(i & 1 != 0, i & 2 != 0, i & 4 != 0),
                aabb.max,
                aabb.min,
            )
        };
        const FACES: [[usize; 4]; 6] = [
            [0, 2, 3, 1],
            [4, 5, 7, 6],
            [0, 1, 5, 4],
            [2, 6, 7, 3],
            [0, 4, 6, 2],
            [1, 3, 7, 5],
        ];
        FACES
            .iter()
            .flat_map(|f| {
                [
                    Triangle::new(corner(f[0]), corner(f[1]), corner(f[2])),
                    Triangle::new(corner(f[0]), corner(f[2]), corner(f[3])),
                ]
            })
            .collect()
    }

    /// Unit sphere made by subdividing an octahedron. `8 * 4^subdivisions` triangles.
    pub fn sphere(subdivisions: u32) -> Vec<Triangle> {
        let mut tris = Vec::with_capacity(8 << (2 * subdivisions));
        for &sx in &[-1.0f32, 1.0] {
            for &sy in &[-1.0f32, 1.0] {
                for &sz in &[-1.0f32, 1.0] {
                    tris.push(Triangle::new(
                        vec3a(sx, 0.0, 0.0),
                        vec3a(0.0, sy, 0.0),
                        vec3a(0.0, 0.0, sz),
                    ));
                }
            }
        }
        for _ in 0..subdivisions {
            tris = tris
                .iter()
                .flat_map(|t| {
                    let a = ((t.v0 + t.v1) * 0.5).normalize();
                    let b = ((t.v1 + t.v2) * 0.5).normalize();
                    let c = ((t.v2 + t.v0) * 0.5).normalize();
                    [
                        Triangle::new(t.v0, a, c),
                        Triangle::new(a, t.v1, b),
                        Triangle::new(c, b, t.v2),
                        Triangle::new(a, b, c),
                    ]
                })
                .collect();
        }
        tris
    }
}

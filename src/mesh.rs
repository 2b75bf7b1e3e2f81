//! Mesh level structure ("BLAS") over the triangles of one mesh.

use std::time::Instant;

use glam::Vec2;

use crate::{
    aabb::Aabb,
    interaction::SurfaceInteraction,
    pool::{Recycle, StructurePool},
    qbvh::{builder::build_infos, Qbvh, QbvhValidationResult, TraversalMode},
    ray::{Ray, WideRay},
    triangle::{Triangle, TriangleIntersection, TrianglePrimitive},
    triangle4::Triangle4,
    BuildError, BvhBuildParams, Intersect, PrettyDuration, INVALID,
};

/// Closest hit found by [`MeshBvh::closest_hit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshHit {
    /// Position of the triangle in [`MeshBvh::triangles`].
    pub ordered_index: u32,
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

#[derive(Clone, Debug, Default)]
pub struct MeshBvh {
    pub qbvh: Qbvh,
    /// Triangles packed four at a time. Leaf slots of `qbvh` index into this.
    pub groups: Vec<Triangle4>,
    /// Triangles in leaf order. The lane ids of `groups` index into this.
    pub triangles: Vec<Triangle>,
    /// Texture coordinates of `triangles`.
    pub uvs: Vec<[Vec2; 3]>,
    /// Maps a position in `triangles` back to the index in the list the structure was built from.
    pub primitive_indices: Vec<u32>,
}

impl MeshBvh {
    /// # Panics
    /// If `primitives` is empty, has non-finite bounds, or `params` are invalid. See [`MeshBvh::try_new`].
    pub fn new<T: TrianglePrimitive>(primitives: &[T], params: &BvhBuildParams) -> Self {
        Self::try_new(primitives, params)
            .unwrap_or_else(|err| panic!("failed to build mesh BVH: {err}"))
    }

    pub fn try_new<T: TrianglePrimitive>(
        primitives: &[T],
        params: &BvhBuildParams,
    ) -> Result<Self, BuildError> {
        let mut bvh = Self::default();
        bvh.rebuild(primitives, params)?;
        Ok(bvh)
    }

    /// Builds in a structure taken from `pool`, reusing its buffers. On failure the structure goes back to
    /// the pool.
    pub fn build_in<T: TrianglePrimitive>(
        pool: &mut StructurePool<MeshBvh>,
        primitives: &[T],
        params: &BvhBuildParams,
    ) -> Result<Box<Self>, BuildError> {
        let mut bvh = pool.acquire();
        match bvh.rebuild(primitives, params) {
            Ok(()) => Ok(bvh),
            Err(err) => {
                pool.release(bvh);
                Err(err)
            }
        }
    }

    /// Replaces the content with a structure over `primitives`. Left untouched on error.
    pub fn rebuild<T: TrianglePrimitive>(
        &mut self,
        primitives: &[T],
        params: &BvhBuildParams,
    ) -> Result<(), BuildError> {
        crate::scope!("mesh_bvh_build");
        params.validate()?;
        let start = Instant::now();
        let mut infos = build_infos(primitives)?;

        self.qbvh.build_into(
            &mut infos,
            params,
            &mut self.primitive_indices,
            &mut self.groups,
            |first, chunk| {
                Triangle4::pack(
                    chunk
                        .iter()
                        .enumerate()
                        .map(|(lane, &index)| (primitives[index as usize].triangle(), first + lane as u32)),
                )
            },
        );

        self.triangles.clear();
        self.triangles.extend(
            self.primitive_indices
                .iter()
                .map(|&index| primitives[index as usize].triangle()),
        );
        self.uvs.clear();
        self.uvs.extend(
            self.primitive_indices
                .iter()
                .map(|&index| primitives[index as usize].uvs()),
        );

        let degenerate = self.triangles.iter().filter(|tri| tri.area() == 0.0).count();
        if degenerate > 0 {
            log::debug!("mesh BVH contains {degenerate} zero area triangles, they will never be hit");
        }
        log::debug!(
            "built mesh BVH: {} triangles, {} nodes, {} groups, depth {} in {}",
            self.triangles.len(),
            self.qbvh.nodes.len(),
            self.groups.len(),
            self.qbvh.depth,
            PrettyDuration(start.elapsed())
        );
        Ok(())
    }

    /// Closest triangle hit strictly inside `(ray.tmin, ray.tmax)`. Shrinks `ray.tmax` to the hit.
    pub fn closest_hit(&self, ray: &mut Ray) -> Option<MeshHit> {
        let wide = WideRay::new(ray);
        let mut closest = None;
        self.qbvh
            .traverse(ray, TraversalMode::Closest, |ray, first, count| {
                let mut found = false;
                for group in &self.groups[first as usize..(first + count) as usize] {
                    if let Some(hit) = group.intersect(&wide, ray.tmin, ray.tmax) {
                        ray.tmax = hit.t;
                        closest = Some(MeshHit {
                            ordered_index: hit.id,
                            t: hit.t,
                            u: hit.u,
                            v: hit.v,
                        });
                        found = true;
                    }
                }
                found
            });
        closest
    }

    /// Fills in the surface geometry of `hit`, which must come from a query with `ray`.
    pub fn interaction(&self, ray: &Ray, hit: &MeshHit) -> SurfaceInteraction {
        let index = hit.ordered_index as usize;
        SurfaceInteraction::from_triangle_hit(
            &self.triangles[index],
            &self.uvs[index],
            &TriangleIntersection {
                t: hit.t,
                u: hit.u,
                v: hit.v,
            },
            ray.direction,
            self.primitive_indices[index],
        )
    }

    /// Checks the tree invariants plus that every triangle is in exactly one packed lane. Panics on failure.
    pub fn validate(&self) -> QbvhValidationResult {
        let result = self.qbvh.validate(self.groups.len(), |g| {
            self.groups[g as usize]
                .ids
                .iter()
                .filter(|&&id| id != INVALID)
                .fold(Aabb::EMPTY, |acc, &id| acc.union(&self.triangles[id as usize].aabb()))
        });

        let mut seen = vec![false; self.triangles.len()];
        for group in &self.groups {
            assert!(!group.is_empty(), "packed group without triangles");
            for &id in group.ids.iter().filter(|&&id| id != INVALID) {
                assert!(!seen[id as usize], "triangle {id} is packed twice");
                seen[id as usize] = true;
            }
        }
        assert!(seen.iter().all(|s| *s), "triangle missing from the packed groups");

        let mut sources = vec![false; self.primitive_indices.len()];
        for &index in &self.primitive_indices {
            assert!(!sources[index as usize], "primitive {index} is referenced twice");
            sources[index as usize] = true;
        }
        assert_eq!(self.uvs.len(), self.triangles.len());
        result
    }
}

impl Intersect for MeshBvh {
    fn bounds(&self) -> Aabb {
        self.qbvh.aabb
    }

    fn intersect_any(&self, ray: &Ray) -> bool {
        let mut ray = *ray;
        let wide = WideRay::new(&ray);
        self.qbvh
            .traverse(&mut ray, TraversalMode::Any, |ray, first, count| {
                self.groups[first as usize..(first + count) as usize]
                    .iter()
                    .any(|group| group.intersect_any(&wide, ray.tmin, ray.tmax))
            })
    }

    fn intersect(&self, ray: &mut Ray, interaction: &mut SurfaceInteraction) -> bool {
        match self.closest_hit(ray) {
            Some(hit) => {
                *interaction = self.interaction(ray, &hit);
                true
            }
            None => false,
        }
    }
}

impl Recycle for MeshBvh {
    fn recycle(&mut self) {
        self.qbvh.clear();
        self.groups.clear();
        self.triangles.clear();
        self.uvs.clear();
        self.primitive_indices.clear();
    }
}

//! Instance level structure ("TLAS") over transformed references to mesh structures.

use std::{sync::Arc, time::Instant};

use bytemuck::{Pod, Zeroable};
use glam::{Affine3A, Vec3};

use crate::{
    aabb::Aabb,
    aabb4::Aabb4,
    interaction::SurfaceInteraction,
    mesh::{MeshBvh, MeshHit},
    pool::{Recycle, StructurePool},
    qbvh::{builder::build_infos, Qbvh, QbvhValidationResult, TraversalMode},
    ray::{Ray, WideRay},
    Boundable, BuildError, BvhBuildParams, Intersect, PrettyDuration,
};

/// Object to world transform together with its inverse.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub object_to_world: Affine3A,
    pub world_to_object: Affine3A,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        object_to_world: Affine3A::IDENTITY,
        world_to_object: Affine3A::IDENTITY,
    };

    /// A singular `object_to_world` yields a non-finite inverse, and instances using it are rejected at build.
    pub fn new(object_to_world: Affine3A) -> Self {
        Self {
            object_to_world,
            world_to_object: object_to_world.inverse(),
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            object_to_world: Affine3A::from_translation(translation),
            world_to_object: Affine3A::from_translation(-translation),
        }
    }

    /// Maps a world space ray to object space. The direction is not renormalized, so a distance `t` along
    /// the returned ray is the same point as `t` along `ray`, and `tmin`/`tmax` carry over unchanged.
    #[inline(always)]
    pub fn ray_to_object(&self, ray: &Ray) -> Ray {
        Ray::new(
            self.world_to_object.transform_point3a(ray.origin),
            self.world_to_object.transform_vector3a(ray.direction),
            ray.tmin,
            ray.tmax,
        )
    }
}

/// A mesh structure placed in the world. Meshes and transforms are shared between instances.
#[derive(Clone, Debug)]
pub struct Instance {
    pub mesh: Arc<MeshBvh>,
    pub transform: Arc<Transform>,
    world_bounds: Aabb,
}

impl Instance {
    pub fn new(mesh: Arc<MeshBvh>, transform: Arc<Transform>) -> Self {
        let world_bounds = if transform.world_to_object.is_finite() {
            mesh.bounds().transformed(&transform.object_to_world)
        } else {
            Aabb::new(glam::Vec3A::NAN, glam::Vec3A::NAN)
        };
        Self {
            mesh,
            transform,
            world_bounds,
        }
    }

    /// Bounds of the mesh after the transform.
    pub fn world_bounds(&self) -> Aabb {
        self.world_bounds
    }
}

impl Boundable for Instance {
    fn aabb(&self) -> Aabb {
        self.world_bounds
    }
}

/// Up to four instances tested together. Lanes past `count` have empty bounds.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceGroup {
    pub bounds: Aabb4,
    /// Position of the first lane's instance in [`InstanceBvh::instances`].
    pub base: u32,
    pub count: u32,
    pub _pad: [u32; 2],
}

/// Closest hit found by [`InstanceBvh::closest_hit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceHit {
    /// Position of the instance in [`InstanceBvh::instances`].
    pub ordered_instance: u32,
    pub hit: MeshHit,
}

#[derive(Clone, Debug, Default)]
pub struct InstanceBvh {
    pub qbvh: Qbvh,
    pub groups: Vec<InstanceGroup>,
    /// Instances in leaf order.
    pub instances: Vec<Instance>,
    /// Maps a position in `instances` back to the index in the list the structure was built from.
    pub instance_indices: Vec<u32>,
}

impl InstanceBvh {
    /// # Panics
    /// If `instances` is empty, has non-finite bounds, or `params` are invalid. See [`InstanceBvh::try_new`].
    pub fn new(instances: &[Instance], params: &BvhBuildParams) -> Self {
        Self::try_new(instances, params)
            .unwrap_or_else(|err| panic!("failed to build instance BVH: {err}"))
    }

    pub fn try_new(instances: &[Instance], params: &BvhBuildParams) -> Result<Self, BuildError> {
        let mut bvh = Self::default();
        bvh.rebuild(instances, params)?;
        Ok(bvh)
    }

    /// Builds in a structure taken from `pool`, reusing its buffers. On failure the structure goes back to
    /// the pool.
    pub fn build_in(
        pool: &mut StructurePool<InstanceBvh>,
        instances: &[Instance],
        params: &BvhBuildParams,
    ) -> Result<Box<Self>, BuildError> {
        let mut bvh = pool.acquire();
        match bvh.rebuild(instances, params) {
            Ok(()) => Ok(bvh),
            Err(err) => {
                pool.release(bvh);
                Err(err)
            }
        }
    }

    /// Replaces the content with a structure over `instances`. Left untouched on error.
    pub fn rebuild(&mut self, instances: &[Instance], params: &BvhBuildParams) -> Result<(), BuildError> {
        crate::scope!("instance_bvh_build");
        params.validate()?;
        let start = Instant::now();
        let mut infos = build_infos(instances)?;

        self.qbvh.build_into(
            &mut infos,
            params,
            &mut self.instance_indices,
            &mut self.groups,
            |first, chunk| {
                let mut bounds = Aabb4::EMPTY;
                for (lane, &index) in chunk.iter().enumerate() {
                    bounds.set(lane, &instances[index as usize].world_bounds);
                }
                InstanceGroup {
                    bounds,
                    base: first,
                    count: chunk.len() as u32,
                    _pad: [0; 2],
                }
            },
        );

        self.instances.clear();
        self.instances.extend(
            self.instance_indices
                .iter()
                .map(|&index| instances[index as usize].clone()),
        );

        log::debug!(
            "built instance BVH: {} instances, {} nodes, {} groups, depth {} in {}",
            self.instances.len(),
            self.qbvh.nodes.len(),
            self.groups.len(),
            self.qbvh.depth,
            PrettyDuration(start.elapsed())
        );
        Ok(())
    }

    /// Closest hit over all instances. Shrinks `ray.tmax` to the hit.
    pub fn closest_hit(&self, ray: &mut Ray) -> Option<InstanceHit> {
        let wide = WideRay::new(ray);
        let mut closest = None;
        self.qbvh
            .traverse(ray, TraversalMode::Closest, |ray, first, count| {
                let mut found = false;
                for group in &self.groups[first as usize..(first + count) as usize] {
                    let (mask, tnear) = group.bounds.intersect(&wide, ray.tmin, ray.tmax);
                    if mask == 0 {
                        continue;
                    }

                    // Nearest instance box first.
                    let mut lanes = [(0u32, 0.0f32); 4];
                    let mut hit_lanes = 0;
                    for lane in 0..4 {
                        if mask & (1 << lane) != 0 {
                            lanes[hit_lanes] = (lane, tnear[lane as usize]);
                            hit_lanes += 1;
                        }
                    }
                    let lanes = &mut lanes[..hit_lanes];
                    lanes.sort_unstable_by(|a, b| a.1.total_cmp(&b.1));

                    for &(lane, t) in lanes.iter() {
                        if t > ray.tmax {
                            break;
                        }
                        let ordered_instance = group.base + lane;
                        let instance = &self.instances[ordered_instance as usize];
                        let mut local = instance.transform.ray_to_object(ray);
                        if let Some(hit) = instance.mesh.closest_hit(&mut local) {
                            ray.tmax = hit.t;
                            closest = Some(InstanceHit {
                                ordered_instance,
                                hit,
                            });
                            found = true;
                        }
                    }
                }
                found
            });
        closest
    }

    /// World space surface geometry of `hit`, which must come from a query with `ray`.
    pub fn interaction(&self, ray: &Ray, hit: &InstanceHit) -> SurfaceInteraction {
        let instance = &self.instances[hit.ordered_instance as usize];
        let local = instance.transform.ray_to_object(ray);
        let mut interaction = instance.mesh.interaction(&local, &hit.hit);
        interaction.transform(
            &instance.transform.object_to_world,
            &instance.transform.world_to_object,
        );
        interaction.instance_id = self.instance_indices[hit.ordered_instance as usize];
        interaction
    }

    /// Checks the tree invariants plus that every instance is in exactly one group lane. Panics on failure.
    pub fn validate(&self) -> QbvhValidationResult {
        let result = self
            .qbvh
            .validate(self.groups.len(), |g| self.groups[g as usize].bounds.union_all());

        let mut seen = vec![false; self.instances.len()];
        for group in &self.groups {
            assert!((1..=4).contains(&group.count), "group holds {} instances", group.count);
            for lane in 0..4 {
                let bounds = group.bounds.get(lane);
                if lane as u32 >= group.count {
                    assert!(bounds.is_empty(), "padding lane {lane} has bounds");
                    continue;
                }
                let index = (group.base + lane as u32) as usize;
                assert!(!seen[index], "instance {index} is packed twice");
                seen[index] = true;
                assert_eq!(bounds, self.instances[index].world_bounds);
            }
        }
        assert!(seen.iter().all(|s| *s), "instance missing from the packed groups");
        result
    }
}

impl Intersect for InstanceBvh {
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
                    .any(|group| {
                        let (mask, _) = group.bounds.intersect(&wide, ray.tmin, ray.tmax);
                        (0..4).any(|lane| {
                            mask & (1 << lane) != 0 && {
                                let instance = &self.instances[(group.base + lane) as usize];
                                instance
                                    .mesh
                                    .intersect_any(&instance.transform.ray_to_object(ray))
                            }
                        })
                    })
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

impl Recycle for InstanceBvh {
    fn recycle(&mut self) {
        self.qbvh.clear();
        self.groups.clear();
        self.instances.clear();
        self.instance_indices.clear();
    }
}

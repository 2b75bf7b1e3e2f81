#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use glam::*;
    use qbvh::{
        aabb::Aabb,
        instance::{Instance, InstanceBvh, Transform},
        interaction::SurfaceInteraction,
        mesh::MeshBvh,
        pool::{SharedPool, StructurePool},
        qbvh::TraversalMode,
        ray::Ray,
        test_util::{
            geometry::{box_mesh, quad_at_z, sphere, triangle_grid},
            sampling::{hash_noise, random_rays},
        },
        triangle::Triangle,
        BuildError, BvhBuildParams, Intersect,
    };

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Closest hit by testing every triangle. Returns (t, index).
    fn brute_force(tris: &[Triangle], ray: &Ray) -> Option<(f32, u32)> {
        let mut ray = *ray;
        let mut closest = None;
        for (i, tri) in tris.iter().enumerate() {
            if let Some(hit) = tri.intersect(&ray) {
                ray.tmax = hit.t;
                closest = Some((hit.t, i as u32));
            }
        }
        closest
    }

    fn transformed(tris: &[Triangle], transform: &Affine3A) -> Vec<Triangle> {
        tris.iter()
            .map(|t| {
                Triangle::new(
                    transform.transform_point3a(t.v0),
                    transform.transform_point3a(t.v1),
                    transform.transform_point3a(t.v2),
                )
            })
            .collect()
    }

    #[test]
    pub fn quad_hit_distance_and_barycentrics() {
        init_logger();
        let bvh = MeshBvh::new(&quad_at_z(1.0, 1.0), &BvhBuildParams::mesh());
        let mut ray = Ray::new_inf(vec3a(0.3, -0.2, 0.0), Vec3A::Z);
        let mut isect = SurfaceInteraction::default();
        assert!(bvh.intersect(&mut ray, &mut isect));
        assert_relative_eq!(isect.t, 1.0);
        assert_eq!(ray.tmax, isect.t);
        let b = isect.barycentric;
        assert!(b.x >= 0.0 && b.y >= 0.0 && b.x + b.y <= 1.0);
        assert!(isect.primitive_id < 2);
        assert_relative_eq!(isect.n.dot(ray.direction), -1.0);
    }

    #[test]
    pub fn missed_root_reaches_no_leaf() {
        init_logger();
        let tri = Triangle::new(
            vec3a(0.0, 0.0, 1.0),
            vec3a(1.0, 0.0, 1.0),
            vec3a(0.0, 1.0, 1.0),
        );
        let bvh = MeshBvh::new(&[tri], &BvhBuildParams::mesh());
        let mut ray = Ray::new_inf(vec3a(5.0, 5.0, 0.0), Vec3A::Z);
        let mut leaf_calls = 0;
        assert!(!bvh
            .qbvh
            .traverse(&mut ray, TraversalMode::Closest, |_, _, _| {
                leaf_calls += 1;
                false
            }));
        assert_eq!(leaf_calls, 0);
        assert!(!bvh.intersect_any(&ray));
        let mut isect = SurfaceInteraction::default();
        assert!(!bvh.intersect(&mut ray, &mut isect));
        assert_eq!(ray.tmax, f32::INFINITY);
    }

    #[test]
    pub fn hit_is_tagged_with_instance() {
        init_logger();
        let mesh = Arc::new(MeshBvh::new(&quad_at_z(0.0, 1.0), &BvhBuildParams::mesh()));
        let instances = [
            Instance::new(
                mesh.clone(),
                Arc::new(Transform::from_translation(vec3(-5.0, 0.0, 2.0))),
            ),
            Instance::new(
                mesh.clone(),
                Arc::new(Transform::from_translation(vec3(5.0, 0.0, 2.0))),
            ),
        ];
        let tlas = InstanceBvh::new(&instances, &BvhBuildParams::instance());
        tlas.validate();

        let mut ray = Ray::new_inf(vec3a(5.25, 0.5, 0.0), Vec3A::Z);
        let mut isect = SurfaceInteraction::default();
        assert!(tlas.intersect(&mut ray, &mut isect));
        assert_eq!(isect.instance_id, 1);
        assert!(isect.primitive_id < 2);
        assert_relative_eq!(isect.t, 2.0);
        assert_relative_eq!(isect.p.x, 5.25, epsilon = 1e-6);
        assert!(tlas.bounds().contains_point(isect.p));
    }

    #[test]
    pub fn grid_matches_brute_force() {
        init_logger();
        let tris = triangle_grid(40, 1.0);
        let bvh = MeshBvh::new(&tris, &BvhBuildParams::mesh());
        let result = bvh.validate();
        assert!(result.max_depth > 0);

        let mut hits = 0;
        for i in 0..2000 {
            let noise = |k: u32| hash_noise(uvec2(i, k), 7);
            let target = vec3a(noise(0) * 40.0, noise(1) * 40.0, 1.5);
            let origin = target + vec3a(noise(2) - 0.5, noise(3) - 0.5, 4.0);
            let mut ray = Ray::new_inf(origin, (target - origin).normalize());
            let expected = brute_force(&tris, &ray);

            let hit = bvh.closest_hit(&mut ray);
            match (hit, expected) {
                (Some(hit), Some((t, index))) => {
                    hits += 1;
                    assert_eq!(bvh.primitive_indices[hit.ordered_index as usize], index);
                    assert_relative_eq!(hit.t, t, max_relative = 1e-5);
                }
                (None, None) => {}
                (hit, expected) => panic!("ray {i}: bvh {hit:?}, brute force {expected:?}"),
            }
        }
        assert!(hits > 300);
    }

    #[test]
    pub fn any_hit_agrees_with_closest_hit() {
        init_logger();
        let tris = sphere(4);
        let bvh = MeshBvh::new(&tris, &BvhBuildParams::mesh());
        bvh.validate();

        let (mut hits, mut misses) = (0, 0);
        for (i, mut ray) in random_rays(4000, 3, 4.0, 1.5).into_iter().enumerate() {
            // Some rays end before reaching the sphere.
            ray.tmax = hash_noise(uvec2(i as u32, 9), 3) * 8.0;
            let any = bvh.intersect_any(&ray);
            let closest = bvh.closest_hit(&mut ray.clone());
            assert_eq!(any, closest.is_some(), "ray {i}");
            if any {
                hits += 1;
            } else {
                misses += 1;
            }
        }
        assert!(hits > 100 && misses > 100);
    }

    #[test]
    pub fn tmin_and_tmax_are_exclusive() {
        init_logger();
        let tris = triangle_grid(8, 1.0);
        let bvh = MeshBvh::new(&tris, &BvhBuildParams::mesh());
        let origin = vec3a(3.2, 4.2, 10.0);
        let mut ray = Ray::new_inf(origin, -Vec3A::Z);
        let hit = bvh.closest_hit(&mut ray).unwrap();
        assert_eq!(ray.tmax, hit.t);

        // Nothing closer than the hit.
        assert!(bvh.closest_hit(&mut ray.clone()).is_none());
        assert!(!bvh.intersect_any(&ray));

        let past = Ray::new(origin, -Vec3A::Z, hit.t, f32::INFINITY);
        assert!(!bvh.intersect_any(&past));

        let around = Ray::new(origin, -Vec3A::Z, hit.t * 0.5, hit.t * 1.5);
        assert!(bvh.intersect_any(&around));
    }

    #[test]
    pub fn padding_lanes_are_never_hit() {
        init_logger();
        // Five triangles leave three padding lanes, which hold zeroed vertices at the origin. The real
        // triangles alternate above and below y = 0, so the leaf box spans the origin without covering it.
        let tris: Vec<Triangle> = (0..5)
            .map(|i| {
                let x = -2.5 + i as f32;
                let s = if i % 2 == 0 { 1.0 } else { -1.0 };
                Triangle::new(
                    vec3a(x, s * 0.5, 0.0),
                    vec3a(x + 1.0, s * 0.5, 0.0),
                    vec3a(x, s * 1.5, 0.0),
                )
            })
            .collect();
        let bvh = MeshBvh::new(&tris, &BvhBuildParams::mesh());
        assert!(bvh.groups.iter().any(|g| g.len() < 4));
        assert!(bvh.qbvh.aabb.contains_point(Vec3A::ZERO));

        let ray = Ray::new_inf(vec3a(0.0, 0.0, -1.0), Vec3A::Z);
        assert!(!bvh.intersect_any(&ray));
        assert!(bvh.closest_hit(&mut ray.clone()).is_none());
    }

    #[test]
    pub fn validate_counts_every_triangle() {
        init_logger();
        let tris = sphere(5);
        let bvh = MeshBvh::new(&tris, &BvhBuildParams::mesh());
        let result = bvh.validate();
        assert_eq!(result.group_count, bvh.groups.len());
        assert_eq!(result.node_count, bvh.qbvh.nodes.len());
        assert_eq!(bvh.groups.iter().map(|g| g.len()).sum::<usize>(), tris.len());
        assert!(bvh.qbvh.aabb.contains_aabb(&Aabb::new(Vec3A::splat(-0.5), Vec3A::splat(0.5))));
        // Leaves hold at most 64 triangles, so at most 16 groups.
        assert!(bvh
            .qbvh
            .nodes
            .iter()
            .flat_map(|n| n.group_counts)
            .all(|c| c <= 16));
    }

    #[test]
    pub fn instances_match_brute_force() {
        init_logger();
        let meshes = [
            Arc::new(MeshBvh::new(&sphere(2), &BvhBuildParams::mesh())),
            Arc::new(MeshBvh::new(
                &box_mesh(&Aabb::new(Vec3A::splat(-0.5), Vec3A::splat(0.5))),
                &BvhBuildParams::mesh(),
            )),
        ];
        let instances: Vec<Instance> = (0..300)
            .map(|i| {
                let noise = |k: u32| hash_noise(uvec2(i, k), 11);
                let position = vec3(noise(0), noise(1), noise(2)) * 40.0 - 20.0;
                let transform = Affine3A::from_scale_rotation_translation(
                    Vec3::splat(0.5 + noise(3)),
                    Quat::from_rotation_y(noise(4) * 6.0),
                    position,
                );
                Instance::new(meshes[i as usize % 2].clone(), Arc::new(Transform::new(transform)))
            })
            .collect();
        let tlas = InstanceBvh::new(&instances, &BvhBuildParams::instance());
        tlas.validate();

        let mut hits = 0;
        for (i, ray) in random_rays(1000, 5, 40.0, 20.0).into_iter().enumerate() {
            let mut expected: Option<(f32, usize)> = None;
            for (index, instance) in instances.iter().enumerate() {
                let mut local = instance.transform.ray_to_object(&ray);
                local.tmax = expected.map_or(f32::INFINITY, |e| e.0);
                if let Some(hit) = instance.mesh.closest_hit(&mut local) {
                    expected = Some((hit.t, index));
                }
            }

            let mut world = ray;
            let mut isect = SurfaceInteraction::default();
            let hit = tlas.intersect(&mut world, &mut isect);
            assert_eq!(hit, expected.is_some(), "ray {i}");
            assert_eq!(hit, tlas.intersect_any(&ray), "ray {i}");
            if let Some((t, index)) = expected {
                hits += 1;
                assert_eq!(isect.instance_id as usize, index, "ray {i}");
                assert_eq!(isect.t, t);
                assert_relative_eq!(isect.n.length(), 1.0, epsilon = 1e-5);
                assert!(isect.n.dot(ray.direction) <= 0.0);
            }
        }
        assert!(hits > 50);
    }

    #[test]
    pub fn scaled_instance_matches_world_space_mesh() {
        init_logger();
        let object_tris = sphere(3);
        let transform = Affine3A::from_scale_rotation_translation(
            vec3(3.0, 0.5, 1.5),
            Quat::from_euler(EulerRot::XYZ, 0.4, 1.1, -0.3),
            vec3(1.0, -2.0, 0.5),
        );
        let tlas = InstanceBvh::new(
            &[Instance::new(
                Arc::new(MeshBvh::new(&object_tris, &BvhBuildParams::mesh())),
                Arc::new(Transform::new(transform)),
            )],
            &BvhBuildParams::instance(),
        );
        let world = MeshBvh::new(&transformed(&object_tris, &transform), &BvhBuildParams::mesh());

        let mut hits = 0;
        for ray in random_rays(1000, 17, 10.0, 2.0) {
            let (mut a, mut b) = (ray, ray);
            let (mut ia, mut ib) = (SurfaceInteraction::default(), SurfaceInteraction::default());
            if tlas.intersect(&mut a, &mut ia) && world.intersect(&mut b, &mut ib) {
                hits += 1;
                assert_relative_eq!(ia.t, ib.t, max_relative = 1e-3);
                assert!((ia.p - ray.at(ia.t)).length() < 1e-3);
                // Geometric normals agree up to transform rounding.
                assert!(ia.n.dot(ib.n) > 0.999);
            }
        }
        assert!(hits > 100);
    }

    #[test]
    pub fn empty_inputs_are_errors() {
        init_logger();
        let empty: Vec<Triangle> = Vec::new();
        assert_eq!(
            MeshBvh::try_new(&empty, &BvhBuildParams::mesh()).unwrap_err(),
            BuildError::EmptyInput
        );
        assert_eq!(
            InstanceBvh::try_new(&[], &BvhBuildParams::instance()).unwrap_err(),
            BuildError::EmptyInput
        );
        let bad = BvhBuildParams {
            max_prims_per_leaf: 0,
            ..BvhBuildParams::mesh()
        };
        assert!(matches!(
            MeshBvh::try_new(&quad_at_z(0.0, 1.0), &bad),
            Err(BuildError::InvalidParams(_))
        ));
    }

    #[test]
    #[should_panic]
    pub fn building_over_nothing_panics() {
        let empty: Vec<Triangle> = Vec::new();
        MeshBvh::new(&empty, &BvhBuildParams::mesh());
    }

    #[test]
    pub fn pooled_instance_rebuilds() {
        init_logger();
        let mesh = Arc::new(MeshBvh::new(&sphere(1), &BvhBuildParams::mesh()));
        let instances: Vec<Instance> = (0..100)
            .map(|i| {
                Instance::new(
                    mesh.clone(),
                    Arc::new(Transform::from_translation(vec3(i as f32 * 3.0, 0.0, 0.0))),
                )
            })
            .collect();

        let mut pool = StructurePool::new(4);
        let first = InstanceBvh::build_in(&mut pool, &instances, &BvhBuildParams::instance()).unwrap();
        let first_result = first.validate();
        let node_capacity = first.qbvh.nodes.capacity();
        pool.release(first);

        let second = InstanceBvh::build_in(&mut pool, &instances[..50], &BvhBuildParams::instance()).unwrap();
        assert!(second.qbvh.nodes.capacity() >= node_capacity);
        assert_eq!(second.instances.len(), 50);
        assert!(second.validate().group_count <= first_result.group_count);

        let shared = SharedPool::<MeshBvh>::new(2);
        let mut bvh = shared.acquire();
        bvh.rebuild(&sphere(2), &BvhBuildParams::mesh()).unwrap();
        shared.release(bvh);
        assert_eq!(shared.len(), 1);
    }

    #[test]
    pub fn concurrent_queries() {
        init_logger();
        let bvh = MeshBvh::new(&sphere(4), &BvhBuildParams::mesh());
        let rays = random_rays(1000, 23, 4.0, 1.0);
        let expected: Vec<bool> = rays.iter().map(|r| bvh.intersect_any(r)).collect();
        std::thread::scope(|s| {
            for chunk in 0..4 {
                let (bvh, rays, expected) = (&bvh, &rays, &expected);
                s.spawn(move || {
                    for i in (chunk..rays.len()).step_by(4) {
                        let mut ray = rays[i];
                        assert_eq!(bvh.closest_hit(&mut ray).is_some(), expected[i]);
                    }
                });
            }
        });
    }
}

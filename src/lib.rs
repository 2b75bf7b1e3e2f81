//! # Two-level four-wide BVH for offline ray tracing
//!
//! - Binned [SAH](https://www.pbr-book.org/3ed-2018/Primitives_and_Intersection_Acceleration/Bounding_Volume_Hierarchies)
//!   binary builder with a median fallback for coincident centroids.
//! - Binary to four-wide collapse that keeps the split axes of the two folded levels so traversal can
//!   visit the four children front to back.
//! - Primitives packed in groups of four (struct-of-arrays) so one SIMD test covers a whole group.
//! - A mesh level ([`mesh::MeshBvh`], the "BLAS") over triangles and an instance level
//!   ([`instance::InstanceBvh`], the "TLAS") over transformed references to mesh structures. Both share
//!   the same build and traversal code in [`qbvh`].
//!
//! Structures are immutable after build and can be traversed from many threads at once. QBVH optionally
//! uses [rayon](https://github.com/rayon-rs/rayon) to gather build records in parallel.
//!
//! ## Example
//!
//! ```
//! use glam::*;
//! use qbvh::{
//!     interaction::SurfaceInteraction,
//!     mesh::MeshBvh,
//!     ray::Ray,
//!     test_util::geometry::quad_at_z,
//!     BvhBuildParams, Intersect,
//! };
//!
//! // Two triangles forming a 2x2 quad at z = 1.
//! let tris = quad_at_z(1.0, 1.0);
//! let bvh = MeshBvh::new(&tris, &BvhBuildParams::mesh());
//!
//! // Shadow style query, only interested in whether anything is hit.
//! let origin = vec3a(0.5, -0.25, 0.0);
//! assert!(bvh.intersect_any(&Ray::new_inf(origin, Vec3A::Z)));
//!
//! // Closest hit, `ray.tmax` is shortened to the hit distance.
//! let mut ray = Ray::new_inf(origin, Vec3A::Z);
//! let mut isect = SurfaceInteraction::default();
//! if bvh.intersect(&mut ray, &mut isect) {
//!     println!("Hit triangle {} at t = {}", isect.primitive_id, isect.t);
//!     println!("Normal {}", isect.n);
//! } else {
//!     println!("Miss");
//! }
//! ```

use std::time::Duration;

use aabb::Aabb;
use interaction::SurfaceInteraction;
use ray::Ray;

pub mod aabb;
pub mod aabb4;
pub mod arena;
pub mod error;
pub mod faststack;
pub mod instance;
pub mod interaction;
pub mod mesh;
pub mod pool;
pub mod qbvh;
pub mod ray;
pub mod test_util;
pub mod triangle;
pub mod triangle4;

pub use error::BuildError;

pub const INVALID: u32 = u32::MAX;

/// A trait for types that can be bounded by an axis-aligned bounding box (AABB). Anything `Boundable` can
/// be fed to the builder.
#[cfg(feature = "parallel")]
pub trait Boundable: Send + Sync {
    fn aabb(&self) -> Aabb;

    /// Point used to bin the primitive during the SAH build. Defaults to the center of `aabb()`.
    fn centroid(&self) -> glam::Vec3A {
        self.aabb().center()
    }
}

/// A trait for types that can be bounded by an axis-aligned bounding box (AABB). Anything `Boundable` can
/// be fed to the builder.
#[cfg(not(feature = "parallel"))]
pub trait Boundable {
    fn aabb(&self) -> Aabb;

    /// Point used to bin the primitive during the SAH build. Defaults to the center of `aabb()`.
    fn centroid(&self) -> glam::Vec3A {
        self.aabb().center()
    }
}

/// Ray queries shared by the mesh and the instance structures.
pub trait Intersect {
    /// World space bounds of everything the structure contains.
    fn bounds(&self) -> Aabb;

    /// Any-hit query. Returns as soon as some primitive is hit within `[ray.tmin, ray.tmax]`.
    fn intersect_any(&self, ray: &Ray) -> bool;

    /// Closest-hit query. On a hit `ray.tmax` is set to the hit distance and `interaction` is filled in.
    fn intersect(&self, ray: &mut Ray, interaction: &mut SurfaceInteraction) -> bool;
}

/// A macro to measure and print the execution time of a block of code.
///
/// # Arguments
/// * `$label` - A string label to identify the code block being timed.
/// * `$($code:tt)*` - The code block whose execution time is to be measured.
///
/// # Usage
/// ```rust
/// use qbvh::timeit;
/// timeit!["example",
///     // code to measure
/// ];
/// ```
///
/// # Note
/// The macro purposefully doesn't include a scope so variables don't need to
/// be passed out of it.
///
/// This macro only measures time when the `timeit` feature is enabled.
#[macro_export]
#[doc(hidden)]
macro_rules! timeit {
    [$label:expr, $($code:tt)*] => {
        #[cfg(feature = "timeit")]
        let timeit_start = std::time::Instant::now();
        $($code)*
        #[cfg(feature = "timeit")]
        log::info!("{:>8} {}", format!("{}", $crate::PrettyDuration(timeit_start.elapsed())), $label);
    };
}

/// A wrapper struct for `std::time::Duration` to provide pretty-printing of durations.
#[doc(hidden)]
pub struct PrettyDuration(pub Duration);

impl std::fmt::Display for PrettyDuration {
    /// Seconds and milliseconds are printed with two decimals, anything shorter in whole microseconds.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let duration = self.0;
        if duration.as_secs() > 0 {
            write!(f, "{:.2}s ", duration.as_secs_f64())
        } else if duration.subsec_millis() > 0 {
            write!(f, "{:.2}ms", duration.as_secs_f64() * 1_000.0)
        } else {
            write!(f, "{}µs", duration.as_micros())
        }
    }
}

/// Add profile scope. Nesting the macro allows us to make the profiling crate optional.
#[doc(hidden)]
#[macro_export]
macro_rules! scope {
    [$label:expr] => {
        #[cfg(feature = "profile")]
        profiling::scope!($label);
    };
}

/// Largest bucket count the SAH binning supports.
pub const MAX_SAH_BUCKETS: usize = 32;

/// Build parameters shared by the mesh and the instance structures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BvhBuildParams {
    /// Ranges with at most this many primitives become leaves.
    pub max_prims_per_leaf: u32,
    /// Number of equal width buckets the SAH bins centroids into along the split axis.
    pub sah_buckets: u32,
    /// Constant term of the SAH cost, relative to the cost of one primitive test.
    pub traversal_cost: f32,
    /// Ranges with at most `equal_counts_multiple * max_prims_per_leaf` primitives skip the SAH and are split
    /// into two halves of equal count. 0 disables this.
    pub equal_counts_multiple: u32,
    /// Past this depth every range is split at the median, which bounds the depth of degenerate inputs.
    pub max_build_depth: u32,
}

impl BvhBuildParams {
    /// Triangles of one mesh.
    pub const fn mesh() -> Self {
        BvhBuildParams {
            max_prims_per_leaf: 64,
            sah_buckets: 12,
            traversal_cost: 0.125,
            equal_counts_multiple: 0,
            max_build_depth: 64,
        }
    }

    /// Instances of meshes. Scenes usually have few instances so small ranges are split by count
    /// instead of paying for the SAH binning.
    pub const fn instance() -> Self {
        BvhBuildParams {
            max_prims_per_leaf: 64,
            sah_buckets: 12,
            traversal_cost: 0.125,
            equal_counts_multiple: 2,
            max_build_depth: 64,
        }
    }

    /// Checks that the parameters describe a buildable tree.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_prims_per_leaf == 0 {
            return Err(BuildError::InvalidParams("max_prims_per_leaf must be at least 1"));
        }
        // Leaf group counts are stored as u16 in the flattened nodes.
        if self.max_prims_per_leaf.div_ceil(4) > u16::MAX as u32 {
            return Err(BuildError::InvalidParams("max_prims_per_leaf is too large"));
        }
        if self.sah_buckets < 2 || self.sah_buckets as usize > MAX_SAH_BUCKETS {
            return Err(BuildError::InvalidParams("sah_buckets must be within 2..=32"));
        }
        if !self.traversal_cost.is_finite() || self.traversal_cost < 0.0 {
            return Err(BuildError::InvalidParams(
                "traversal_cost must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

impl Default for BvhBuildParams {
    fn default() -> Self {
        Self::mesh()
    }
}

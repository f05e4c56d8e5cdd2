#![forbid(unsafe_code)]

pub mod error;
pub mod geometry;
pub mod index;
pub mod octree;

pub use error::SpatialError;
pub use geometry::{ray_box_intersection, Frustum, Plane, Ray, PARALLEL_EPSILON};
pub use index::CloudIndex;
pub use octree::{Neighbor, Octree, OctreeConfig, QueryStats, RayHit};

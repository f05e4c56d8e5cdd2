//! Streaming PLY ingestion into chunked point clouds with octree queries.
//!
//! Re-exports the member crates so applications can depend on one package:
//!
//! ```no_run
//! use pointstream::{CloudIndex, ImportJob, Settings};
//!
//! let settings = Settings::default();
//! let cloud = ImportJob::new("scan.ply", &settings).run()?;
//! let mut index = CloudIndex::new(&settings);
//! if let Some(hit) = index.nearest(&cloud, [0.0, 0.0, 0.0])? {
//!     println!("closest point #{} at {:?}", hit.index, hit.position);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]

pub use pointstream_core as core;
pub use pointstream_io as io;
pub use pointstream_spatial as spatial;

pub use pointstream_core::{Aabb, ChunkedArray, CloudError, PointBatch, PointCloud, Settings};
pub use pointstream_io::{
    write_ply, ImportError, ImportJob, PlyError, PlyFormat, PlyParser, PointChunk, WriteOptions,
};
pub use pointstream_spatial::{CloudIndex, Frustum, Octree, OctreeConfig, Ray, SpatialError};

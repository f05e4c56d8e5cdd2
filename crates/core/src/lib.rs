#![forbid(unsafe_code)]

pub mod bbox;
pub mod chunked;
pub mod cloud;
pub mod color;
pub mod error;
pub mod sample_cache;
pub mod settings;

pub use bbox::{Aabb, ValueRange};
pub use chunked::ChunkedArray;
pub use cloud::{CloudId, PointBatch, PointCloud, PointUpdate, ScanCounts};
pub use color::{pack_color, pack_rgb, unpack_rgb, ColorGradient, ColorMode, ColorValue, Rgb};
pub use error::{CloudError, SettingsError};
pub use sample_cache::SampleCache;
pub use settings::{Settings, MAX_OCTREE_DEPTH};

#![forbid(unsafe_code)]

pub mod decode;
pub mod error;
pub mod header;
pub mod import;
pub mod parser;
pub mod progress;
pub mod write;

pub use error::{BodyLocation, PlyError};
pub use header::{PlyFormat, PlyHeader, ScalarType};
pub use import::{
    CancelToken, ImportDiagnostics, ImportError, ImportHandle, ImportJob, ImportStatus,
    InvalidationThrottle, UnitScale, ViewInvalidator,
};
pub use parser::{
    ParseSummary, ParserState, PlyParser, PointChunk, CANCEL_POLL_INTERVAL, THREAD_YIELD_INTERVAL,
};
pub use progress::{Clock, ManualClock, Progress, SystemClock};
pub use write::{write_ply, write_ply_to, WriteOptions};

use pointstream_core::CloudError;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlyError>;

/// Where in the body a problem was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLocation {
    ByteOffset(u64),
    Line(u64),
}

impl fmt::Display for BodyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyLocation::ByteOffset(offset) => write!(f, "byte offset {}", offset),
            BodyLocation::Line(line) => write!(f, "line {}", line),
        }
    }
}

/// Errors raised by [`PlyParser`](crate::PlyParser).
#[derive(Error, Debug)]
pub enum PlyError {
    #[error("malformed PLY header at line {line}: {message}")]
    MalformedHeader { line: usize, message: String },

    #[error("unsupported PLY format `{format}` at line {line}")]
    UnsupportedFormat { line: usize, format: String },

    #[error("truncated PLY body at {location}: expected {expected} vertices, decoded {decoded}")]
    TruncatedBody {
        location: BodyLocation,
        expected: u64,
        decoded: u64,
    },

    #[error("malformed PLY body at line {line}: {message}")]
    MalformedBody { line: u64, message: String },

    #[error("PLY parse cancelled after {processed} vertices")]
    Cancelled { processed: u64 },

    #[error("chunk consumer rejected data: {0}")]
    Consumer(#[from] CloudError),

    #[error("I/O error while reading PLY: {0}")]
    Io(#[from] std::io::Error),
}

impl PlyError {
    /// True for a user-requested abort, which callers usually should not
    /// surface as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PlyError::Cancelled { .. })
    }

    pub(crate) fn header(line: usize, message: impl Into<String>) -> Self {
        PlyError::MalformedHeader {
            line,
            message: message.into(),
        }
    }
}

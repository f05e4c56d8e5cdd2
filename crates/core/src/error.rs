use thiserror::Error;

/// Result type for point-cloud mutation.
pub type Result<T> = std::result::Result<T, CloudError>;

/// Errors raised while growing or mutating a [`PointCloud`](crate::PointCloud).
///
/// A failing call leaves previously stored points untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CloudError {
    #[error("point index {index} out of range for cloud of {len} points")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid color value: {0}")]
    InvalidColorValue(String),

    #[error("{channel} has {actual} entries, expected {expected}")]
    LengthMismatch {
        channel: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{channel} channel presence does not match the cloud")]
    ChannelMismatch { channel: &'static str },
}

/// Errors raised while loading or validating [`Settings`](crate::Settings).
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

//! Error types for session repository operations.

/// Error type for session repository operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required argument was missing or malformed.
    #[error("{0}")]
    InvalidArgument(String),

    /// Reading from or writing to a data stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An attribute value could not be encoded or decoded.
    #[error("Value encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// A text field is longer than the encoding can represent.
    #[error("Text too long to encode: {len} bytes (max 65535)")]
    TextTooLong { len: usize },

    /// A count or length read from a stream was negative.
    #[error("Invalid {field} in stream: {len}")]
    InvalidLength { field: &'static str, len: i32 },

    /// The backing region reported a failure.
    #[error("Region error: {0}")]
    Region(String),

    /// Failed to read a configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ReadConfig {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ParseConfig(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidArgument`] with a fixed message.
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}

/// Result type for session repository operations.
pub type Result<T> = std::result::Result<T, Error>;

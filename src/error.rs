//! Error types for the leaky-bucket limiters.

use thiserror::Error;

/// Main error type for limiter operations.
#[derive(Error, Debug)]
pub enum LeakyBucketError {
    /// The bucket is over capacity or the rate is configured to zero.
    #[error("rejected")]
    Rejected,

    /// A zone item with this key is already registered
    #[error("zone item already exists")]
    AlreadyExists,

    /// No zone item is registered under this key
    #[error("zone item not found")]
    NotFound,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LeakyBucketError {
    /// Whether this error is a normal throttling outcome rather than misuse.
    pub fn is_rejected(&self) -> bool {
        matches!(self, LeakyBucketError::Rejected)
    }
}

impl From<::config::ConfigError> for LeakyBucketError {
    fn from(err: ::config::ConfigError) -> Self {
        LeakyBucketError::Config(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LeakyBucketError>;

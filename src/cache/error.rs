//! Error types for cache backends.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Cache backend errors.
///
/// These never reach callers of [`Client`](crate::Client): a failed lookup is treated as a miss
/// and the configuration is fetched from the repository instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// Redis-specific error.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The configuration could not be encoded for storage.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored entry could not be decoded back into a configuration.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The backend could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// Invalid cache configuration, such as a malformed URL.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend did not answer in time.
    #[error("operation timeout")]
    Timeout,
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CacheError::Timeout
    }
}

//! Cache and lock error types.

use thiserror::Error;

/// Errors from cache and lock operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Acquisition retries were exhausted. Distinct from system failure so
    /// callers can choose between failing fast and degrading to an
    /// unguarded load.
    #[error("lock unavailable after {tries} attempts: {key}")]
    LockUnavailable { key: String, tries: u32 },

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

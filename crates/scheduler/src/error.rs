//! Scheduler error types.

use thiserror::Error;

/// Errors from queue plumbing and task handlers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("queue error: {0}")]
    Queue(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] depot_cache::CacheError),

    #[error(transparent)]
    Engine(#[from] depot_engine::EngineError),
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

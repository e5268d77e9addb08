//! Engine error types.

use thiserror::Error;

/// Errors from dedup resolution and ingestion.
///
/// Callers branch on structure, never on message text: validation failures
/// are permanent, `NotFound` is an outcome, and storage/metadata failures
/// are the transient class the retry scheduler may re-run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The stream ended without delivering a single chunk.
    #[error("upload contained no content")]
    NoContent,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Typed not-found outcome, distinct from system failure.
    #[error("file not found")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] depot_storage::StorageError),

    #[error(transparent)]
    Metadata(#[from] depot_metadata::MetadataError),

    #[error(transparent)]
    Core(#[from] depot_core::Error),
}

impl EngineError {
    /// Whether retrying can ever succeed. Validation and hash-mismatch
    /// failures are permanent.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::NoContent | Self::Validation(_) | Self::HashMismatch { .. }
        )
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

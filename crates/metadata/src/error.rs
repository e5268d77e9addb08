//! Metadata error types.

use thiserror::Error;

/// Metadata store errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// A uniqueness constraint rejected the write. For file records this
    /// means another writer already persisted the same hash or key; callers
    /// treat it as a lost race, not a failure.
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for MetadataError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return Self::UniqueViolation(db_err.to_string());
            }
        }
        Self::Database(err)
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

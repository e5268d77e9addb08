//! Database models mapping to the metadata schema.

use depot_core::{BackendKind, SharedReference};
use sqlx::FromRow;
use time::OffsetDateTime;

/// A persisted file-ownership record.
///
/// Either a *real* record (its `file_hash` is a content hash and its
/// `object_key` owns bytes in a backend) or a *shared* record (synthetic
/// hash, object key encoding a reference to another record's bytes).
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: i64,
    pub owner_id: i64,
    pub file_name: String,
    pub file_size: i64,
    pub backend: String,
    pub object_key: String,
    pub file_hash: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FileRow {
    /// Whether this record is a cross-owner shared reference.
    pub fn is_shared(&self) -> bool {
        SharedReference::is_synthetic(&self.file_hash)
    }

    /// The backend this record's bytes live in.
    pub fn backend_kind(&self) -> depot_core::Result<BackendKind> {
        BackendKind::parse(&self.backend)
    }
}

/// Fields for creating a file record; id and timestamps are assigned by the
/// store.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub owner_id: i64,
    pub file_name: String,
    pub file_size: i64,
    pub backend: BackendKind,
    pub object_key: String,
    pub file_hash: String,
}

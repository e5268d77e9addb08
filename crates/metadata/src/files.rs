//! File record repository.

use crate::error::MetadataResult;
use crate::models::{FileRow, NewFile};
use async_trait::async_trait;

/// A page of file records plus the total matching count.
#[derive(Debug, Clone)]
pub struct FilePage {
    pub files: Vec<FileRow>,
    pub total: u64,
}

/// Search filters for the global listing.
#[derive(Debug, Clone, Default)]
pub struct FileSearch {
    /// Substring match on the display name.
    pub name: Option<String>,
    /// Exact backend tag filter (`local` / `cloud`).
    pub backend: Option<String>,
}

/// Repository for file record operations.
///
/// Every "real hash" lookup excludes the synthetic `shared_` namespace so a
/// shared record can never satisfy a content match.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a record. A uniqueness conflict on hash or key surfaces as
    /// [`crate::MetadataError::UniqueViolation`].
    async fn create_file(&self, file: &NewFile) -> MetadataResult<FileRow>;

    /// The owner's record carrying this real hash verbatim, if any.
    async fn find_owner_real_by_hash(
        &self,
        owner_id: i64,
        hash: &str,
    ) -> MetadataResult<Option<FileRow>>;

    /// Any owner's record carrying this real hash verbatim, if any.
    async fn find_global_real_by_hash(&self, hash: &str) -> MetadataResult<Option<FileRow>>;

    /// All of the owner's shared records. The caller decodes their keys to
    /// match a target; the repository does not parse the encoding.
    async fn find_owner_shared(&self, owner_id: i64) -> MetadataResult<Vec<FileRow>>;

    /// Count other real records with the same hash, excluding `exclude_id`.
    /// Zero means the excluded record was the last owner of the bytes.
    async fn count_other_real_with_hash(
        &self,
        hash: &str,
        exclude_id: i64,
    ) -> MetadataResult<u64>;

    /// Get a record by id, any owner.
    async fn find_by_id(&self, id: i64) -> MetadataResult<Option<FileRow>>;

    /// Get a record by id scoped to an owner.
    async fn find_by_owner_and_id(
        &self,
        owner_id: i64,
        id: i64,
    ) -> MetadataResult<Option<FileRow>>;

    /// Delete a record by id.
    async fn delete_by_id(&self, id: i64) -> MetadataResult<()>;

    /// List an owner's records, paginated (1-based page).
    async fn list_by_owner(
        &self,
        owner_id: i64,
        page: u32,
        page_size: u32,
    ) -> MetadataResult<FilePage>;

    /// Search records across all owners, newest first, paginated.
    async fn search(
        &self,
        filter: &FileSearch,
        page: u32,
        page_size: u32,
    ) -> MetadataResult<FilePage>;
}

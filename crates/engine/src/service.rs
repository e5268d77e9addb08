//! File service operations over the resolver and pipeline.

use crate::backends::BackendSet;
use crate::error::{EngineError, EngineResult};
use crate::ingest::{IngestOutcome, IngestPipeline, UploadChunk};
use crate::resolver::DedupResolver;
use bytes::Bytes;
use depot_core::{BackendKind, ContentHash, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use depot_metadata::{FilePage, FileRow, FileSearch, MetaStore};
use futures::Stream;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

/// A record resolved to its download address.
#[derive(Debug)]
pub struct DownloadTarget {
    pub file_name: String,
    pub url: String,
}

/// Transport-free file operations: the RPC layer above is a thin shim over
/// these.
pub struct FileService {
    meta: Arc<dyn MetaStore>,
    resolver: Arc<DedupResolver>,
    pipeline: Arc<IngestPipeline>,
    backends: Arc<BackendSet>,
}

impl FileService {
    pub fn new(meta: Arc<dyn MetaStore>, backends: Arc<BackendSet>) -> Self {
        let resolver = Arc::new(DedupResolver::new(meta.clone()));
        let pipeline = Arc::new(IngestPipeline::new(resolver.clone(), backends.clone()));
        Self {
            meta,
            resolver,
            pipeline,
            backends,
        }
    }

    pub fn pipeline(&self) -> Arc<IngestPipeline> {
        self.pipeline.clone()
    }

    pub fn backends(&self) -> Arc<BackendSet> {
        self.backends.clone()
    }

    /// Generate a collision-resistant object key for an upload.
    pub fn generate_object_key(owner_id: u64, file_name: &str) -> String {
        let ext = Path::new(file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stamp = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        format!("uploads/{owner_id}/{stamp}{ext}")
    }

    /// Streaming upload entry point.
    pub async fn upload<S>(&self, target: BackendKind, chunks: S) -> EngineResult<IngestOutcome>
    where
        S: Stream<Item = EngineResult<UploadChunk>> + Unpin + Send,
    {
        self.pipeline.ingest(target, chunks).await
    }

    /// Buffered (form) upload entry point.
    pub async fn upload_bytes(
        &self,
        target: BackendKind,
        owner_id: u64,
        file_name: &str,
        object_key: &str,
        content: Bytes,
    ) -> EngineResult<IngestOutcome> {
        self.pipeline
            .ingest_bytes(target, owner_id, file_name, object_key, content)
            .await
    }

    /// Instant-transfer probe: does this owner already hold content with
    /// the given hash?
    pub async fn check_exists(
        &self,
        owner_id: i64,
        hash: &ContentHash,
    ) -> EngineResult<Option<DownloadTarget>> {
        match self
            .meta
            .find_owner_real_by_hash(owner_id, &hash.to_hex())
            .await?
        {
            Some(record) => {
                let url = self.backends.url_for(&record)?;
                Ok(Some(DownloadTarget {
                    file_name: record.file_name,
                    url,
                }))
            }
            None => Ok(None),
        }
    }

    /// Resolve a record to its download address. `owner_id` of `None`
    /// performs an unscoped (cross-owner) lookup.
    pub async fn download(
        &self,
        owner_id: Option<i64>,
        file_id: i64,
    ) -> EngineResult<DownloadTarget> {
        let record = match owner_id {
            Some(owner) => self.meta.find_by_owner_and_id(owner, file_id).await?,
            None => self.meta.find_by_id(file_id).await?,
        }
        .ok_or(EngineError::NotFound)?;

        let url = self.backends.url_for(&record)?;
        Ok(DownloadTarget {
            file_name: record.file_name,
            url,
        })
    }

    /// Delete a record, removing backend bytes only when this was the last
    /// real record holding them.
    pub async fn delete(&self, owner_id: i64, file_id: i64) -> EngineResult<FileRow> {
        let record = self
            .meta
            .find_by_owner_and_id(owner_id, file_id)
            .await?
            .ok_or(EngineError::NotFound)?;

        self.meta.delete_by_id(record.id).await?;

        if self.resolver.may_delete_bytes(&record).await? {
            let storage = self.backends.get(record.backend_kind()?)?;
            let key = extract_backend_key(&record.object_key);
            // The row is already gone; a failed byte removal is logged and
            // left to operational cleanup rather than resurrecting the record.
            match storage.delete(key).await {
                Ok(()) => info!(record_id = record.id, %key, "removed backend bytes"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(record_id = record.id, %key, error = %e, "failed to remove backend bytes"),
            }
        }

        info!(owner_id, record_id = record.id, "file deleted");
        Ok(record)
    }

    /// List an owner's files, paginated.
    pub async fn list(
        &self,
        owner_id: i64,
        page: u32,
        page_size: u32,
    ) -> EngineResult<FilePage> {
        let (page, page_size) = clamp_page(page, page_size);
        Ok(self.meta.list_by_owner(owner_id, page, page_size).await?)
    }

    /// Search files across all owners.
    pub async fn search(
        &self,
        filter: &FileSearch,
        page: u32,
        page_size: u32,
    ) -> EngineResult<FilePage> {
        let (page, page_size) = clamp_page(page, page_size);
        Ok(self.meta.search(filter, page, page_size).await?)
    }

    /// Resolve a record to its public URL.
    pub fn url_for(&self, record: &FileRow) -> EngineResult<String> {
        self.backends.url_for(record)
    }
}

/// Extract the backend-relative key from a stored object key that may be a
/// fully qualified URL (cloud records store the resolved URL).
fn extract_backend_key(object_key: &str) -> &str {
    if object_key.starts_with("http://") || object_key.starts_with("https://") {
        // scheme://host/path -> path
        let parts: Vec<&str> = object_key.splitn(4, '/').collect();
        if parts.len() == 4 {
            return parts[3];
        }
    }
    object_key
}

fn clamp_page(page: u32, page_size: u32) -> (u32, u32) {
    let page = page.max(1);
    let page_size = if page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size.min(MAX_PAGE_SIZE)
    };
    (page, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_backend_key() {
        assert_eq!(extract_backend_key("uploads/1/a.txt"), "uploads/1/a.txt");
        assert_eq!(
            extract_backend_key("http://cdn.example.com/uploads/1/a.txt"),
            "uploads/1/a.txt"
        );
        assert_eq!(
            extract_backend_key("https://cdn.example.com/deep/nested/key"),
            "deep/nested/key"
        );
        assert_eq!(extract_backend_key("http://cdn.example.com"), "http://cdn.example.com");
    }

    #[test]
    fn test_clamp_page() {
        assert_eq!(clamp_page(0, 0), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(clamp_page(3, 50), (3, 50));
        assert_eq!(clamp_page(1, 10_000), (1, MAX_PAGE_SIZE));
    }

    #[test]
    fn test_generate_object_key_keeps_extension() {
        let key = FileService::generate_object_key(7, "photo.png");
        assert!(key.starts_with("uploads/7/"));
        assert!(key.ends_with(".png"));

        let bare = FileService::generate_object_key(7, "README");
        assert!(!bare.contains('.'));
    }
}

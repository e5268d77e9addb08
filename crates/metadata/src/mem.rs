//! In-memory metadata store.
//!
//! Mirrors the SQLite schema's constraint semantics (unique hash and key)
//! so engine and scheduler tests exercise the same conflict paths without a
//! database file.

use crate::error::{MetadataError, MetadataResult};
use crate::files::{FilePage, FileRepo, FileSearch};
use crate::models::{FileRow, NewFile};
use crate::store::MetaStore;
use async_trait::async_trait;
use std::sync::Mutex;
use time::OffsetDateTime;

#[derive(Default)]
struct Inner {
    rows: Vec<FileRow>,
    next_id: i64,
}

/// In-memory [`MetaStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_real(hash: &str) -> bool {
        !depot_core::SharedReference::is_synthetic(hash)
    }
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn migrate(&self) -> MetadataResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        Ok(())
    }
}

#[async_trait]
impl FileRepo for MemoryStore {
    async fn create_file(&self, file: &NewFile) -> MetadataResult<FileRow> {
        let mut inner = self.inner.lock().expect("lock poisoned");

        for row in &inner.rows {
            if row.file_hash == file.file_hash {
                return Err(MetadataError::UniqueViolation(format!(
                    "files.file_hash: {}",
                    file.file_hash
                )));
            }
            if row.object_key == file.object_key {
                return Err(MetadataError::UniqueViolation(format!(
                    "files.object_key: {}",
                    file.object_key
                )));
            }
        }

        inner.next_id += 1;
        let now = OffsetDateTime::now_utc();
        let row = FileRow {
            id: inner.next_id,
            owner_id: file.owner_id,
            file_name: file.file_name.clone(),
            file_size: file.file_size,
            backend: file.backend.as_str().to_string(),
            object_key: file.object_key.clone(),
            file_hash: file.file_hash.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.rows.push(row.clone());
        Ok(row)
    }

    async fn find_owner_real_by_hash(
        &self,
        owner_id: i64,
        hash: &str,
    ) -> MetadataResult<Option<FileRow>> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner
            .rows
            .iter()
            .find(|r| r.owner_id == owner_id && r.file_hash == hash && Self::is_real(&r.file_hash))
            .cloned())
    }

    async fn find_global_real_by_hash(&self, hash: &str) -> MetadataResult<Option<FileRow>> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner
            .rows
            .iter()
            .find(|r| r.file_hash == hash && Self::is_real(&r.file_hash))
            .cloned())
    }

    async fn find_owner_shared(&self, owner_id: i64) -> MetadataResult<Vec<FileRow>> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner
            .rows
            .iter()
            .filter(|r| r.owner_id == owner_id && !Self::is_real(&r.file_hash))
            .cloned()
            .collect())
    }

    async fn count_other_real_with_hash(
        &self,
        hash: &str,
        exclude_id: i64,
    ) -> MetadataResult<u64> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner
            .rows
            .iter()
            .filter(|r| r.file_hash == hash && r.id != exclude_id && Self::is_real(&r.file_hash))
            .count() as u64)
    }

    async fn find_by_id(&self, id: i64) -> MetadataResult<Option<FileRow>> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner.rows.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_owner_and_id(
        &self,
        owner_id: i64,
        id: i64,
    ) -> MetadataResult<Option<FileRow>> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner
            .rows
            .iter()
            .find(|r| r.id == id && r.owner_id == owner_id)
            .cloned())
    }

    async fn delete_by_id(&self, id: i64) -> MetadataResult<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.rows.retain(|r| r.id != id);
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner_id: i64,
        page: u32,
        page_size: u32,
    ) -> MetadataResult<FilePage> {
        let inner = self.inner.lock().expect("lock poisoned");
        let matching: Vec<FileRow> = inner
            .rows
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        let total = matching.len() as u64;
        let offset = (page.saturating_sub(1) as usize) * page_size as usize;
        let files = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();
        Ok(FilePage { files, total })
    }

    async fn search(
        &self,
        filter: &FileSearch,
        page: u32,
        page_size: u32,
    ) -> MetadataResult<FilePage> {
        let inner = self.inner.lock().expect("lock poisoned");
        let mut matching: Vec<FileRow> = inner
            .rows
            .iter()
            .filter(|r| {
                filter
                    .name
                    .as_ref()
                    .map(|n| r.file_name.contains(n.as_str()))
                    .unwrap_or(true)
                    && filter
                        .backend
                        .as_ref()
                        .map(|b| &r.backend == b)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as u64;
        let offset = (page.saturating_sub(1) as usize) * page_size as usize;
        let files = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();
        Ok(FilePage { files, total })
    }
}

//! In-memory storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::BackendKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory object store backed by a `RwLock<HashMap>`.
///
/// Used in tests as a stand-in for either backend; tracks how many writes
/// reached the "remote" so dedup tests can assert no bytes moved.
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
    kind: BackendKind,
    writes: Arc<AtomicU64>,
}

impl MemoryBackend {
    /// Create a new in-memory store reporting the given backend kind.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            kind,
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of completed writes (puts and finished streamed uploads).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(BackendKind::Local)
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<u64> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        map.insert(key.to_string(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(MemoryUpload {
            objects: self.objects.clone(),
            writes: self.writes.clone(),
            key: key.to_string(),
            buffer: Vec::new(),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        map.remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    fn public_url(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Staged upload buffering until finish.
struct MemoryUpload {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
    writes: Arc<AtomicU64>,
    key: String,
    buffer: Vec<u8>,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let MemoryUpload {
            objects,
            writes,
            key,
            buffer,
        } = *self;
        let len = buffer.len() as u64;
        let mut map = objects.write().expect("lock poisoned");
        map.insert(key, Bytes::from(buffer));
        writes.fetch_add(1, Ordering::SeqCst);
        Ok(len)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryBackend::default();
        store.put("a/b", Bytes::from_static(b"data")).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), Bytes::from_static(b"data"));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryBackend::default();
        assert!(store.get("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_streamed_abort_writes_nothing() {
        let store = MemoryBackend::default();
        let mut upload = store.put_stream("staged").await.unwrap();
        upload.write(Bytes::from_static(b"x")).await.unwrap();
        upload.abort().await.unwrap();
        assert_eq!(store.object_count(), 0);
        assert_eq!(store.write_count(), 0);
    }
}

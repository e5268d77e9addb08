//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::BackendKind;

/// Object store abstraction over the local filesystem and the remote object
/// store.
///
/// Keys are backend-relative: filesystem keys are paths under the storage
/// root, cloud keys are bucket object names. [`ObjectStore::public_url`]
/// turns a key into the address handed back to clients.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size in bytes without fetching content.
    async fn head(&self, key: &str) -> StorageResult<u64>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a staged upload for `key`.
    ///
    /// Nothing is visible under the final key until
    /// [`StreamingUpload::finish`] runs; [`StreamingUpload::abort`] leaves
    /// no artifacts.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Which backend this is, as recorded on file records.
    fn backend_kind(&self) -> BackendKind;

    /// Resolve a stored key to the address returned to clients.
    ///
    /// Keys already shaped as absolute URLs are returned unchanged.
    fn public_url(&self, key: &str) -> String;
}

/// Trait for staged streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data to the staging area.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Atomically promote the staged data to the final key and return the
    /// total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, removing any staged data.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

//! Object storage abstraction and backends for depot.
//!
//! This crate provides:
//! - A uniform key/byte interface with staged, atomically finalized uploads
//! - Backends: local filesystem, S3-compatible, and in-memory (tests)
//! - Public-URL resolution per the backend addressing rules

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{
    filesystem::FilesystemBackend, memory::MemoryBackend, s3::S3Backend,
};
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectStore, StreamingUpload};

use depot_core::config::StorageConfig;
use std::sync::Arc;

/// Create the configured backends: the local store, plus the cloud store
/// when an S3 section is present.
pub async fn from_config(
    config: &StorageConfig,
) -> StorageResult<(Arc<dyn ObjectStore>, Option<Arc<dyn ObjectStore>>)> {
    let local: Arc<dyn ObjectStore> = Arc::new(FilesystemBackend::new(&config.root).await?);

    let cloud: Option<Arc<dyn ObjectStore>> = match &config.s3 {
        Some(s3) => Some(Arc::new(
            S3Backend::new(
                &s3.bucket,
                s3.endpoint.clone(),
                s3.region.clone(),
                s3.prefix.clone(),
                s3.domain.clone(),
                s3.force_path_style,
            )
            .await?,
        )),
        None => None,
    };

    Ok((local, cloud))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use depot_core::config::S3Config;

    #[tokio::test]
    async fn from_config_local_only() {
        let temp = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            root: temp.path().join("store"),
            ..StorageConfig::default()
        };

        let (local, cloud) = from_config(&config).await.unwrap();
        assert!(cloud.is_none());
        local
            .put("hello.txt", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert!(local.exists("hello.txt").await.unwrap());
    }

    #[tokio::test]
    async fn from_config_with_s3() {
        let temp = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            root: temp.path().join("store"),
            s3: Some(S3Config {
                bucket: "bucket".to_string(),
                endpoint: Some("minio:9000".to_string()),
                region: Some("us-east-1".to_string()),
                prefix: Some("depot".to_string()),
                domain: None,
                force_path_style: true,
            }),
            ..StorageConfig::default()
        };

        let (_local, cloud) = from_config(&config).await.unwrap();
        assert!(cloud.is_some());
    }
}

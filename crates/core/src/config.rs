//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Storage backend configuration. The local backend is always present;
/// the cloud backend only when an `[storage.s3]` section is given.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for local storage.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Backend new uploads go to by default.
    #[serde(default = "default_backend")]
    pub default_backend: crate::BackendKind,
    /// S3-compatible cloud backend.
    #[serde(default)]
    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            default_backend: default_backend(),
            s3: None,
        }
    }
}

/// S3-compatible storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name.
    pub bucket: String,
    /// Optional endpoint URL (for MinIO, etc.).
    pub endpoint: Option<String>,
    /// AWS region.
    pub region: Option<String>,
    /// Optional key prefix.
    pub prefix: Option<String>,
    /// Public domain used to build download URLs. When unset, raw keys are
    /// returned.
    pub domain: Option<String>,
    /// Force path-style URLs (required for MinIO and some S3-compatible
    /// services).
    #[serde(default)]
    pub force_path_style: bool,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database path.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Message broker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// NATS server URL.
    #[serde(default = "default_queue_url")]
    pub url: String,
    /// Durable consumer name prefix; each subscription appends its kind.
    #[serde(default = "default_consumer_prefix")]
    pub consumer_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: default_queue_url(),
            consumer_prefix: default_consumer_prefix(),
        }
    }
}

/// Cache and distributed-lock configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL.
    #[serde(default = "default_cache_url")]
    pub url: String,
    /// TTL for cached user entries, in seconds.
    #[serde(default = "default_user_ttl_secs")]
    pub user_ttl_secs: u64,
    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
            user_ttl_secs: default_user_ttl_secs(),
            lock: LockConfig::default(),
        }
    }
}

/// Lease-lock tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease TTL in milliseconds.
    #[serde(default = "default_lock_ttl_millis")]
    pub ttl_millis: u64,
    /// Maximum acquisition attempts before giving up.
    #[serde(default = "default_lock_max_tries")]
    pub max_tries: u32,
    /// Delay between acquisition attempts, in milliseconds.
    #[serde(default = "default_lock_retry_delay_millis")]
    pub retry_delay_millis: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_millis: default_lock_ttl_millis(),
            max_tries: default_lock_max_tries(),
            retry_delay_millis: default_lock_retry_delay_millis(),
        }
    }
}

/// Delayed-retry scheduler tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Liveness tick interval in seconds; the executor also wakes on intake.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Fixed backoff applied after a failed handler, in milliseconds.
    #[serde(default = "default_retry_backoff_millis")]
    pub retry_backoff_millis: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            retry_backoff_millis: default_retry_backoff_millis(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/objects")
}

fn default_backend() -> crate::BackendKind {
    crate::BackendKind::Local
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("data/depot.db")
}

fn default_queue_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_consumer_prefix() -> String {
    "depot".to_string()
}

fn default_cache_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_user_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_lock_ttl_millis() -> u64 {
    10_000
}

fn default_lock_max_tries() -> u32 {
    15
}

fn default_lock_retry_delay_millis() -> u64 {
    1_000
}

fn default_tick_secs() -> u64 {
    5
}

fn default_retry_backoff_millis() -> u64 {
    1_000
}

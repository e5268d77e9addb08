//! Read-through cache guarded by the lock manager.
//!
//! Lookup path: cache hit returns immediately; on a miss the per-key lock
//! serializes refills so a miss storm collapses into one load, with a
//! re-check after acquisition for waiters that queued behind the winner.

use crate::error::{CacheError, CacheResult};
use crate::lock::LockManager;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Plain string KV with TTL; values are JSON documents.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;
    async fn del(&self, key: &str) -> CacheResult<()>;
}

/// Redis cache backend.
pub struct RedisCacheBackend {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisCacheBackend {
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

/// In-memory cache backend with expiry, for tests.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let entries = self.entries.lock().expect("lock poisoned");
        Ok(entries.get(key).and_then(|(value, expiry)| {
            if *expiry > Instant::now() {
                Some(value.clone())
            } else {
                None
            }
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        entries.remove(key);
        Ok(())
    }
}

/// Read-through cache over a key namespace (e.g. `user:`).
pub struct ReadThroughCache {
    backend: std::sync::Arc<dyn CacheBackend>,
    locks: LockManager,
    prefix: String,
    ttl: Duration,
}

impl ReadThroughCache {
    pub fn new(
        backend: std::sync::Arc<dyn CacheBackend>,
        locks: LockManager,
        prefix: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            locks,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn cache_key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    fn lock_key(&self, name: &str) -> String {
        format!("lock:{}{name}", self.prefix)
    }

    /// Cached value for `name`, if present and fresh.
    pub async fn get<T: DeserializeOwned>(&self, name: &str) -> CacheResult<Option<T>> {
        match self.backend.get(&self.cache_key(name)).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    // A corrupt entry is dropped and treated as a miss.
                    warn!(%name, error = %e, "dropping undecodable cache entry");
                    self.backend.del(&self.cache_key(name)).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Store a value for `name`.
    pub async fn put<T: Serialize>(&self, name: &str, value: &T) -> CacheResult<()> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(&self.cache_key(name), &raw, self.ttl).await
    }

    /// Drop the entry for `name`. Idempotent.
    pub async fn invalidate(&self, name: &str) -> CacheResult<()> {
        debug!(%name, "invalidating cache entry");
        self.backend.del(&self.cache_key(name)).await
    }

    /// Read-through load: hit, or lock → re-check → load → populate.
    ///
    /// `CacheError::LockUnavailable` propagates so the caller can decide
    /// whether to fall back to an unguarded load.
    pub async fn get_or_load<T, F, Fut>(&self, name: &str, loader: F) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Option<T>>>,
    {
        if let Some(value) = self.get(name).await? {
            return Ok(Some(value));
        }

        let guard = self.locks.acquire(&self.lock_key(name)).await?;

        // Someone else may have populated while we queued for the lock.
        match self.get(name).await {
            Ok(Some(value)) => {
                guard.release().await?;
                return Ok(Some(value));
            }
            Ok(None) => {}
            Err(e) => {
                guard.release().await?;
                return Err(e);
            }
        }

        let loaded = match loader().await {
            Ok(loaded) => loaded,
            Err(e) => {
                guard.release().await?;
                return Err(e);
            }
        };

        if let Some(value) = &loaded {
            if let Err(e) = self.put(name, value).await {
                warn!(%name, error = %e, "failed to populate cache");
            }
        }

        guard.release().await?;
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryLockBackend;
    use depot_core::config::LockConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn cache() -> Arc<ReadThroughCache> {
        let locks = LockManager::new(
            Arc::new(MemoryLockBackend::new()),
            LockConfig {
                ttl_millis: 5_000,
                max_tries: 50,
                retry_delay_millis: 5,
            },
        );
        Arc::new(ReadThroughCache::new(
            Arc::new(MemoryCacheBackend::new()),
            locks,
            "user:",
            Duration::from_secs(300),
        ))
    }

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let cache = cache();
        cache.put("alice", &"payload".to_string()).await.unwrap();
        let value: Option<String> = cache.get("alice").await.unwrap();
        assert_eq!(value.as_deref(), Some("payload"));

        cache.invalidate("alice").await.unwrap();
        let value: Option<String> = cache.get("alice").await.unwrap();
        assert!(value.is_none());

        // Invalidation of an absent entry is fine.
        cache.invalidate("alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_or_load_populates_once() {
        let cache = cache();
        let loads = Arc::new(AtomicU32::new(0));

        let loads_clone = loads.clone();
        let value = cache
            .get_or_load("bob", move || async move {
                loads_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Some("from source".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("from source"));
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        // Second call is a pure cache hit.
        let loads_clone = loads.clone();
        let value = cache
            .get_or_load("bob", move || async move {
                loads_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Some("never seen".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("from source"));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_miss_storm_collapses_to_one_load() {
        let cache = cache();
        let loads = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_load("carol", move || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        // Simulate a slow source-of-truth read.
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(Some("expensive".to_string()))
                    })
                    .await
                    .unwrap()
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().as_deref(), Some("expensive"));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_error_releases_lock() {
        let cache = cache();

        let result: CacheResult<Option<String>> = cache
            .get_or_load("dave", || async { Err(CacheError::LockUnavailable {
                key: "inner".to_string(),
                tries: 0,
            }) })
            .await;
        assert!(result.is_err());

        // The lock must have been released on the error path.
        let value = cache
            .get_or_load("dave", || async { Ok(Some("second try".to_string())) })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("second try"));
    }

    #[tokio::test]
    async fn test_absent_source_is_not_cached() {
        let cache = cache();
        let value: Option<String> = cache
            .get_or_load("erin", || async { Ok(None) })
            .await
            .unwrap();
        assert!(value.is_none());

        // A later load still runs (no negative caching).
        let value = cache
            .get_or_load("erin", || async { Ok(Some("appeared".to_string())) })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("appeared"));
    }
}

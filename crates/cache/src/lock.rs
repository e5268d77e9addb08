//! Lease-based distributed locks.
//!
//! A lock is a key holding a fencing token with a TTL. Acquisition retries
//! a bounded number of times; a held lock is extended by a background
//! renewal task until the guard is released, and release/extend only act
//! when the stored token still matches (a lock that expired and was taken
//! by someone else is never stolen back).

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use depot_core::config::LockConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Compare-and-act lease operations.
#[async_trait]
pub trait LockBackend: Send + Sync + 'static {
    /// Take the lease if free. Returns false when someone else holds it.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool>;

    /// Extend the lease iff `token` still holds it.
    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool>;

    /// Release the lease iff `token` still holds it.
    async fn release(&self, key: &str, token: &str) -> CacheResult<bool>;
}

/// Redis lease backend: SET NX PX plus compare-token Lua for extend and
/// release.
pub struct RedisLockBackend {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisLockBackend {
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { conn }
    }
}

const EXTEND_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = redis::Script::new(EXTEND_SCRIPT)
            .key(key)
            .arg(token)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn release(&self, key: &str, token: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }
}

/// In-memory lease backend with real expiry, for tests.
#[derive(Default)]
pub struct MemoryLockBackend {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder token, if the lease is live.
    pub fn holder(&self, key: &str) -> Option<String> {
        let leases = self.leases.lock().expect("lock poisoned");
        leases.get(key).and_then(|(token, expiry)| {
            if *expiry > Instant::now() {
                Some(token.clone())
            } else {
                None
            }
        })
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        let mut leases = self.leases.lock().expect("lock poisoned");
        let now = Instant::now();
        match leases.get(key) {
            Some((_, expiry)) if *expiry > now => Ok(false),
            _ => {
                leases.insert(key.to_string(), (token.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        let mut leases = self.leases.lock().expect("lock poisoned");
        let now = Instant::now();
        match leases.get_mut(key) {
            Some((holder, expiry)) if holder == token && *expiry > now => {
                *expiry = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, token: &str) -> CacheResult<bool> {
        let mut leases = self.leases.lock().expect("lock poisoned");
        match leases.get(key) {
            Some((holder, _)) if holder == token => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Lock manager: bounded-retry acquisition producing scoped guards.
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(backend: Arc<dyn LockBackend>, config: LockConfig) -> Self {
        Self { backend, config }
    }

    /// Acquire `key`, retrying up to the configured number of attempts.
    ///
    /// The returned guard carries a renewal task extending the lease at
    /// half the TTL; both stop on release (explicit or drop).
    pub async fn acquire(&self, key: &str) -> CacheResult<LockGuard> {
        let ttl = Duration::from_millis(self.config.ttl_millis);
        let retry_delay = Duration::from_millis(self.config.retry_delay_millis);
        let token = Uuid::new_v4().to_string();

        for attempt in 1..=self.config.max_tries {
            if self.backend.try_acquire(key, &token, ttl).await? {
                debug!(%key, attempt, "lock acquired");
                return Ok(LockGuard::start(
                    self.backend.clone(),
                    key.to_string(),
                    token,
                    ttl,
                ));
            }
            if attempt < self.config.max_tries {
                tokio::time::sleep(retry_delay).await;
            }
        }

        Err(CacheError::LockUnavailable {
            key: key.to_string(),
            tries: self.config.max_tries,
        })
    }
}

/// A held lock. Renewal runs until release; dropping the guard releases
/// best-effort.
pub struct LockGuard {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    renewal: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("renewal", &self.renewal.is_some())
            .finish()
    }
}

impl LockGuard {
    fn start(backend: Arc<dyn LockBackend>, key: String, token: String, ttl: Duration) -> Self {
        let renewal = {
            let backend = backend.clone();
            let key = key.clone();
            let token = token.clone();
            tokio::spawn(async move {
                // Renew at half the TTL so a missed beat still leaves slack.
                let mut tick = tokio::time::interval(ttl / 2);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                tick.tick().await; // first tick completes immediately
                loop {
                    tick.tick().await;
                    match backend.extend(&key, &token, ttl).await {
                        Ok(true) => debug!(%key, "lease extended"),
                        Ok(false) => {
                            warn!(%key, "lease lost, stopping renewal");
                            return;
                        }
                        Err(e) => {
                            warn!(%key, error = %e, "lease renewal failed");
                            return;
                        }
                    }
                }
            })
        };

        Self {
            backend,
            key,
            token,
            renewal: Some(renewal),
        }
    }

    /// Stop renewal and release the lease.
    pub async fn release(mut self) -> CacheResult<()> {
        self.stop_renewal();
        // Clearing the fields disarms the drop-path release.
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        let released = self.backend.release(&key, &token).await?;
        if !released {
            warn!(%key, "lease already expired at release");
        }
        Ok(())
    }

    fn stop_renewal(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.stop_renewal();
        if !self.key.is_empty() {
            // Best-effort release on non-explicit exits (errors, panics);
            // the lease TTL bounds the damage if this never runs.
            let backend = self.backend.clone();
            let key = std::mem::take(&mut self.key);
            let token = std::mem::take(&mut self.token);
            tokio::spawn(async move {
                let _ = backend.release(&key, &token).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(backend: Arc<MemoryLockBackend>, ttl_millis: u64, max_tries: u32) -> LockManager {
        LockManager::new(
            backend,
            LockConfig {
                ttl_millis,
                max_tries,
                retry_delay_millis: 10,
            },
        )
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let backend = Arc::new(MemoryLockBackend::new());
        let locks = manager(backend.clone(), 10_000, 3);

        let guard = locks.acquire("lock:user:alice").await.unwrap();
        assert!(backend.holder("lock:user:alice").is_some());
        guard.release().await.unwrap();
        assert!(backend.holder("lock:user:alice").is_none());
    }

    #[tokio::test]
    async fn test_contention_exhausts_retries() {
        let backend = Arc::new(MemoryLockBackend::new());
        let locks = manager(backend.clone(), 10_000, 3);

        let _held = locks.acquire("lock:user:bob").await.unwrap();
        let err = locks.acquire("lock:user:bob").await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::LockUnavailable { tries: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_lease_is_renewed_past_ttl() {
        let backend = Arc::new(MemoryLockBackend::new());
        let locks = manager(backend.clone(), 100, 1);

        let guard = locks.acquire("lock:user:carol").await.unwrap();
        // Hold across several TTL windows; renewal must keep the lease live.
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(backend.holder("lock:user:carol").is_some());
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_renewal_stops_after_release() {
        let backend = Arc::new(MemoryLockBackend::new());
        let locks = manager(backend.clone(), 100, 1);

        let guard = locks.acquire("lock:user:dave").await.unwrap();
        guard.release().await.unwrap();

        // With renewal stopped, a new acquisition succeeds immediately.
        let again = locks.acquire("lock:user:dave").await.unwrap();
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_releases_best_effort() {
        let backend = Arc::new(MemoryLockBackend::new());
        let locks = manager(backend.clone(), 10_000, 1);

        {
            let _guard = locks.acquire("lock:user:erin").await.unwrap();
        }
        // Drop spawns the release; give it a beat to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.holder("lock:user:erin").is_none());
    }

    #[tokio::test]
    async fn test_release_does_not_steal_foreign_lease() {
        let backend = Arc::new(MemoryLockBackend::new());
        assert!(backend
            .try_acquire("k", "token-a", Duration::from_secs(10))
            .await
            .unwrap());
        // A stale holder with a different token cannot release or extend.
        assert!(!backend.release("k", "token-b").await.unwrap());
        assert!(!backend
            .extend("k", "token-b", Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(backend.holder("k").unwrap(), "token-a");
    }
}

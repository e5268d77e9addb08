//! Lease-based distributed locks and read-through caching for depot.
//!
//! The lock manager turns Redis `SET NX PX` leases into scoped guards with
//! background renewal; the read-through cache uses those guards to collapse
//! cache-miss storms into a single source-of-truth load.

pub mod cache;
pub mod error;
pub mod lock;

pub use cache::{CacheBackend, MemoryCacheBackend, ReadThroughCache, RedisCacheBackend};
pub use error::{CacheError, CacheResult};
pub use lock::{LockBackend, LockGuard, LockManager, MemoryLockBackend, RedisLockBackend};

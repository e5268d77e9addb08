//! Task handlers, dispatched by kind.

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::TaskKind;
use async_trait::async_trait;
use depot_cache::ReadThroughCache;
use depot_core::{CacheInvalidateMsg, PersistFileMsg};
use depot_engine::AsyncIngestAdapter;
use std::sync::Arc;
use tracing::{debug, error};

/// One task kind's execution logic. Handlers must be idempotent: the
/// at-least-once guarantee means any of them can run again after a crash
/// between success and commit.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> SchedulerResult<()>;
}

/// Handlers keyed by task kind.
pub struct HandlerRegistry {
    invalidate: Arc<dyn TaskHandler>,
    persist: Arc<dyn TaskHandler>,
}

impl HandlerRegistry {
    pub fn new(invalidate: Arc<dyn TaskHandler>, persist: Arc<dyn TaskHandler>) -> Self {
        Self {
            invalidate,
            persist,
        }
    }

    pub async fn dispatch(&self, kind: TaskKind, payload: &[u8]) -> SchedulerResult<()> {
        match kind {
            TaskKind::InvalidateCache => self.invalidate.handle(payload).await,
            TaskKind::PersistFile => self.persist.handle(payload).await,
        }
    }
}

/// Drops a cache entry. Naturally idempotent: deleting an absent key is
/// success.
pub struct InvalidateCacheHandler {
    cache: Arc<ReadThroughCache>,
}

impl InvalidateCacheHandler {
    pub fn new(cache: Arc<ReadThroughCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl TaskHandler for InvalidateCacheHandler {
    async fn handle(&self, payload: &[u8]) -> SchedulerResult<()> {
        let msg: CacheInvalidateMsg = serde_json::from_slice(payload)?;
        self.cache.invalidate(&msg.name).await?;
        debug!(name = %msg.name, "cache entry invalidated");
        Ok(())
    }
}

/// Persists a queued upload through the shared ingest pipeline. A
/// redelivered message resolves to a reuse, which counts as success.
pub struct PersistFileHandler {
    adapter: Arc<AsyncIngestAdapter>,
}

impl PersistFileHandler {
    pub fn new(adapter: Arc<AsyncIngestAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl TaskHandler for PersistFileHandler {
    async fn handle(&self, payload: &[u8]) -> SchedulerResult<()> {
        let msg: PersistFileMsg = serde_json::from_slice(payload)?;
        match self.adapter.persist(&msg).await {
            Ok(_) => Ok(()),
            // Validation can never succeed on retry; drop the task so the
            // message is committed instead of looping forever.
            Err(e) if e.is_permanent() => {
                error!(filename = %msg.filename, error = %e, "dropping unpersistable upload");
                Ok(())
            }
            Err(e) => Err(SchedulerError::Engine(e)),
        }
    }
}

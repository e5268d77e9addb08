//! Delayed task and source-message types.

use crate::error::SchedulerResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use time::OffsetDateTime;

/// The kinds of queued work the scheduler executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Drop a cache entry once its due time passes.
    InvalidateCache,
    /// Persist a queued upload.
    PersistFile,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidateCache => "invalidate_cache",
            Self::PersistFile => "persist_file",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commit handle for a broker message. Acking marks the message consumed
/// on its own subscription; an unacked message is redelivered after a
/// restart, which is what makes task execution at-least-once.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn ack(&self) -> SchedulerResult<()>;
}

/// The broker message a task was built from.
pub struct SourceMessage {
    /// Subscription the message arrived on, for logging and to make clear
    /// commits are per-subscription.
    pub subscription: String,
    acker: Box<dyn AckHandle>,
}

impl SourceMessage {
    pub fn new(subscription: impl Into<String>, acker: Box<dyn AckHandle>) -> Self {
        Self {
            subscription: subscription.into(),
            acker,
        }
    }

    /// Commit the message against its own subscription.
    pub async fn ack(&self) -> SchedulerResult<()> {
        self.acker.ack().await
    }
}

impl fmt::Debug for SourceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceMessage")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

/// A unit of delayed, retryable work wrapping one broker message.
#[derive(Debug)]
pub struct DelayedTask {
    pub kind: TaskKind,
    pub payload: Bytes,
    pub due_at: OffsetDateTime,
    /// Execution attempts so far.
    pub attempts: u32,
    /// The originating message; `None` for locally scheduled work.
    pub source: Option<SourceMessage>,
    /// Position in the heap, maintained by [`crate::heap::TaskHeap`].
    pub(crate) heap_index: usize,
}

impl DelayedTask {
    pub fn new(
        kind: TaskKind,
        payload: Bytes,
        due_at: OffsetDateTime,
        source: Option<SourceMessage>,
    ) -> Self {
        Self {
            kind,
            payload,
            due_at,
            attempts: 0,
            source,
            heap_index: usize::MAX,
        }
    }
}

//! Broker subscription abstraction and the in-process test queue.

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::{AckHandle, SourceMessage, TaskKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One received broker message, ready to be wrapped into a delayed task.
pub struct QueueMessage {
    pub kind: TaskKind,
    pub payload: Bytes,
    pub source: SourceMessage,
}

/// A single broker subscription feeding the scheduler.
#[async_trait]
pub trait QueueConsumer: Send {
    /// Next message, or `None` once the subscription is closed.
    async fn recv(&mut self) -> SchedulerResult<Option<QueueMessage>>;
}

/// In-process queue for tests: a producer handle plus a consumer half, with
/// ack counts observable from the test body.
pub struct MemoryQueue {
    kind: TaskKind,
    rx: mpsc::UnboundedReceiver<(Bytes, Arc<AckProbe>)>,
}

/// Producer half of [`MemoryQueue`].
#[derive(Clone)]
pub struct MemoryProducer {
    kind: TaskKind,
    tx: mpsc::UnboundedSender<(Bytes, Arc<AckProbe>)>,
}

/// Observable commit state of one in-process message.
#[derive(Debug, Default)]
pub struct AckProbe {
    acks: AtomicU32,
}

impl AckProbe {
    pub fn ack_count(&self) -> u32 {
        self.acks.load(Ordering::SeqCst)
    }

    pub fn is_acked(&self) -> bool {
        self.ack_count() > 0
    }
}

struct MemoryAck {
    probe: Arc<AckProbe>,
}

#[async_trait]
impl AckHandle for MemoryAck {
    async fn ack(&self) -> SchedulerResult<()> {
        self.probe.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MemoryQueue {
    /// Create a connected producer/consumer pair for one subscription.
    pub fn channel(kind: TaskKind) -> (MemoryProducer, MemoryQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemoryProducer { kind, tx }, MemoryQueue { kind, rx })
    }
}

impl MemoryProducer {
    /// Enqueue a payload; the returned probe observes its commit state.
    pub fn send(&self, payload: Bytes) -> SchedulerResult<Arc<AckProbe>> {
        let probe = Arc::new(AckProbe::default());
        self.tx
            .send((payload, probe.clone()))
            .map_err(|_| SchedulerError::Queue("memory queue closed".to_string()))?;
        Ok(probe)
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn recv(&mut self) -> SchedulerResult<Option<QueueMessage>> {
        match self.rx.recv().await {
            Some((payload, probe)) => Ok(Some(QueueMessage {
                kind: self.kind,
                payload,
                source: SourceMessage::new(
                    self.kind.as_str(),
                    Box::new(MemoryAck { probe }),
                ),
            })),
            None => Ok(None),
        }
    }
}

//! NATS JetStream queue plumbing: durable subscriptions and the producer.

use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::{QueueConsumer, QueueMessage};
use crate::task::{AckHandle, SourceMessage, TaskKind};
use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream};
use async_trait::async_trait;
use bytes::Bytes;
use depot_core::{CacheInvalidateMsg, PersistFileMsg};
use futures::StreamExt;
use tracing::info;

/// Stream and subject names, one subscription per task kind.
pub const INVALIDATE_STREAM: &str = "DEPOT_INVALIDATE";
pub const INVALIDATE_SUBJECT: &str = "depot.invalidate";
pub const PERSIST_STREAM: &str = "DEPOT_PERSIST";
pub const PERSIST_SUBJECT: &str = "depot.persist";

fn stream_name(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::InvalidateCache => INVALIDATE_STREAM,
        TaskKind::PersistFile => PERSIST_STREAM,
    }
}

fn subject(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::InvalidateCache => INVALIDATE_SUBJECT,
        TaskKind::PersistFile => PERSIST_SUBJECT,
    }
}

fn queue_err(context: &str, err: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Queue(format!("{context}: {err}"))
}

/// Connection to the broker, shared by subscriptions and the publisher.
#[derive(Clone)]
pub struct NatsQueue {
    jetstream: jetstream::Context,
}

impl NatsQueue {
    /// Connect to a NATS server.
    pub async fn connect(url: &str) -> SchedulerResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| queue_err("failed to connect to NATS", e))?;
        info!(%url, "connected to NATS");
        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }

    async fn ensure_stream(&self, kind: TaskKind) -> SchedulerResult<Stream> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name(kind).to_string(),
                subjects: vec![subject(kind).to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| queue_err("failed to create stream", e))
    }

    /// Open a durable pull subscription for one task kind.
    pub async fn subscribe(
        &self,
        kind: TaskKind,
        consumer_prefix: &str,
    ) -> SchedulerResult<NatsSubscription> {
        let stream = self.ensure_stream(kind).await?;
        let consumer_name = format!("{consumer_prefix}_{}", kind.as_str());

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| queue_err("failed to create consumer", e))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| queue_err("failed to open message stream", e))?;

        info!(consumer = %consumer_name, subject = subject(kind), "subscription open");
        Ok(NatsSubscription { kind, messages })
    }

    /// Producer handle for enqueuing work.
    pub fn publisher(&self) -> Publisher {
        Publisher {
            queue: self.clone(),
        }
    }
}

/// One durable JetStream subscription.
pub struct NatsSubscription {
    kind: TaskKind,
    messages: jetstream::consumer::pull::Stream,
}

struct NatsAck {
    message: jetstream::Message,
}

#[async_trait]
impl AckHandle for NatsAck {
    async fn ack(&self) -> SchedulerResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| queue_err("failed to ack message", e))
    }
}

#[async_trait]
impl QueueConsumer for NatsSubscription {
    async fn recv(&mut self) -> SchedulerResult<Option<QueueMessage>> {
        match self.messages.next().await {
            Some(Ok(message)) => {
                let payload = Bytes::copy_from_slice(&message.payload);
                Ok(Some(QueueMessage {
                    kind: self.kind,
                    payload,
                    source: SourceMessage::new(
                        self.kind.as_str(),
                        Box::new(NatsAck { message }),
                    ),
                }))
            }
            Some(Err(e)) => Err(queue_err("failed to receive message", e)),
            None => Ok(None),
        }
    }
}

/// Producer for queued work.
///
/// Enqueuing is fire-and-forget from the caller's perspective: a persist
/// message that later fails is observable only through eventual record
/// creation and operational logs, never through the original request.
pub struct Publisher {
    queue: NatsQueue,
}

impl Publisher {
    /// Enqueue a cache invalidation due at `msg.due_timestamp`.
    pub async fn publish_invalidate(&self, msg: &CacheInvalidateMsg) -> SchedulerResult<()> {
        self.publish(TaskKind::InvalidateCache, serde_json::to_vec(msg)?)
            .await
    }

    /// Enqueue an asynchronous upload.
    pub async fn publish_persist(&self, msg: &PersistFileMsg) -> SchedulerResult<()> {
        self.publish(TaskKind::PersistFile, serde_json::to_vec(msg)?)
            .await
    }

    async fn publish(&self, kind: TaskKind, payload: Vec<u8>) -> SchedulerResult<()> {
        self.queue.ensure_stream(kind).await?;
        self.queue
            .jetstream
            .publish(subject(kind), payload.into())
            .await
            .map_err(|e| queue_err("failed to publish", e))?
            .await
            .map_err(|e| queue_err("publish not acknowledged", e))?;
        Ok(())
    }
}

//! The retry executor: a single loop owning the task heap.
//!
//! Intake feeders (one per subscription) wrap broker messages into delayed
//! tasks and send them over a channel; the executor is the only heap
//! mutator. It wakes on intake, on a periodic liveness tick, or on
//! shutdown, and drains every due task in due-time order. Success commits
//! the source message on its own subscription; failure re-queues the task
//! with a fixed backoff and leaves the message uncommitted, so a restart
//! redelivers it (at-least-once).

use crate::error::SchedulerResult;
use crate::handlers::HandlerRegistry;
use crate::heap::TaskHeap;
use crate::queue::QueueConsumer;
use crate::task::{DelayedTask, TaskKind};
use depot_core::CacheInvalidateMsg;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Handle for feeding tasks into a running executor. Cloneable; one per
/// intake feeder.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<DelayedTask>,
}

impl SchedulerHandle {
    /// Submit a task. Fails only when the executor is gone.
    pub fn submit(&self, task: DelayedTask) -> Result<(), DelayedTask> {
        self.tx.send(task).map_err(|e| e.0)
    }
}

/// The executor loop state.
pub struct Scheduler {
    heap: TaskHeap,
    intake: mpsc::UnboundedReceiver<DelayedTask>,
    handlers: HandlerRegistry,
    tick: Duration,
    backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    /// Build an executor with its intake handle.
    ///
    /// `tick` bounds how long a due task can wait without any wake signal;
    /// `backoff` is the fixed retry delay after a failed handler.
    pub fn new(
        handlers: HandlerRegistry,
        tick: Duration,
        backoff: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, SchedulerHandle) {
        let (tx, intake) = mpsc::unbounded_channel();
        (
            Self {
                heap: TaskHeap::new(),
                intake,
                handlers,
                tick,
                backoff,
                shutdown,
            },
            SchedulerHandle { tx },
        )
    }

    /// Run until shutdown. Tasks still in the heap at shutdown are
    /// abandoned un-acked; the broker redelivers them on restart.
    pub async fn run(mut self) {
        info!("scheduler executor started");
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => self.drain().await,
                task = self.intake.recv() => match task {
                    Some(task) => {
                        self.heap.push(task);
                        self.drain().await;
                    }
                    // All feeders dropped; nothing can arrive anymore.
                    None => break,
                },
                _ = self.shutdown.changed() => {
                    info!(pending = self.heap.len(), "scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Pop and execute every due task. The heap ordering guarantees that
    /// once a future-due task surfaces, nothing earlier remains.
    async fn drain(&mut self) {
        while let Some(mut task) = self.heap.pop() {
            let now = OffsetDateTime::now_utc();
            if task.due_at > now {
                self.heap.push(task);
                break;
            }

            match self.handlers.dispatch(task.kind, &task.payload).await {
                Ok(()) => {
                    debug!(kind = %task.kind, attempts = task.attempts, "task done");
                    if let Some(source) = &task.source {
                        if let Err(e) = source.ack().await {
                            // The work itself succeeded; the handler must
                            // tolerate the redelivery this ack failure causes.
                            error!(
                                kind = %task.kind,
                                subscription = %source.subscription,
                                error = %e,
                                "failed to commit source message"
                            );
                        }
                    }
                }
                Err(e) => {
                    task.attempts += 1;
                    task.due_at = now + self.backoff;
                    warn!(
                        kind = %task.kind,
                        attempts = task.attempts,
                        retry_at = %task.due_at,
                        error = %e,
                        "task failed, rescheduling"
                    );
                    self.heap.push(task);
                }
            }
        }
    }
}

/// Feed one subscription into the executor until it closes.
///
/// Invalidation messages carry their own due time; persist messages are due
/// immediately. Messages that fail to parse are committed and dropped so a
/// poison payload cannot wedge the subscription.
pub async fn run_intake<C: QueueConsumer>(mut consumer: C, handle: SchedulerHandle) {
    loop {
        match consumer.recv().await {
            Ok(Some(message)) => {
                let due_at = match due_time(message.kind, &message.payload) {
                    Ok(due_at) => due_at,
                    Err(e) => {
                        error!(kind = %message.kind, error = %e, "dropping malformed message");
                        if let Err(e) = message.source.ack().await {
                            warn!(error = %e, "failed to ack malformed message");
                        }
                        continue;
                    }
                };

                let task = DelayedTask::new(
                    message.kind,
                    message.payload,
                    due_at,
                    Some(message.source),
                );
                if handle.submit(task).is_err() {
                    info!("executor gone, stopping intake");
                    return;
                }
            }
            Ok(None) => {
                info!("subscription closed, stopping intake");
                return;
            }
            Err(e) => {
                error!(error = %e, "queue receive failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn due_time(kind: TaskKind, payload: &[u8]) -> SchedulerResult<OffsetDateTime> {
    match kind {
        TaskKind::InvalidateCache => {
            let msg: CacheInvalidateMsg = serde_json::from_slice(payload)?;
            Ok(OffsetDateTime::from_unix_timestamp(msg.due_timestamp)
                .unwrap_or_else(|_| OffsetDateTime::now_utc()))
        }
        TaskKind::PersistFile => Ok(OffsetDateTime::now_utc()),
    }
}

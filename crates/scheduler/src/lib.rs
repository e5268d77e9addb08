//! Delayed-retry task scheduler over broker subscriptions.
//!
//! Turns best-effort queue deliveries into at-least-once, due-time-ordered
//! execution: subscriptions feed a single min-heap executor that commits
//! each source message only after its handler succeeds, and re-queues
//! failures with a fixed backoff.

pub mod error;
pub mod executor;
pub mod handlers;
pub mod heap;
pub mod nats;
pub mod queue;
pub mod task;

pub use error::{SchedulerError, SchedulerResult};
pub use executor::{run_intake, Scheduler, SchedulerHandle};
pub use handlers::{
    HandlerRegistry, InvalidateCacheHandler, PersistFileHandler, TaskHandler,
};
pub use heap::TaskHeap;
pub use nats::{NatsQueue, NatsSubscription, Publisher};
pub use queue::{AckProbe, MemoryProducer, MemoryQueue, QueueConsumer, QueueMessage};
pub use task::{AckHandle, DelayedTask, SourceMessage, TaskKind};

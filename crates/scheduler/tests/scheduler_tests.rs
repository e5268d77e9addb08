//! Executor behavior tests over the in-process queue.

use async_trait::async_trait;
use bytes::Bytes;
use depot_core::CacheInvalidateMsg;
use depot_scheduler::{
    run_intake, HandlerRegistry, MemoryQueue, Scheduler, SchedulerError, SchedulerHandle,
    SchedulerResult, TaskHandler, TaskKind,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;

/// Handler that fails a configured number of times, recording every
/// execution with its wall-clock time.
struct FlakyHandler {
    failures_left: AtomicU32,
    executions: Mutex<Vec<(String, OffsetDateTime)>>,
}

impl FlakyHandler {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(failures),
            executions: Mutex::new(Vec::new()),
        })
    }

    fn executions(&self) -> Vec<(String, OffsetDateTime)> {
        self.executions.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, payload: &[u8]) -> SchedulerResult<()> {
        let msg: CacheInvalidateMsg = serde_json::from_slice(payload)?;
        self.executions
            .lock()
            .unwrap()
            .push((msg.name, OffsetDateTime::now_utc()));

        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(SchedulerError::Queue("induced failure".to_string()));
        }
        Ok(())
    }
}

struct NoopHandler;

#[async_trait]
impl TaskHandler for NoopHandler {
    async fn handle(&self, _payload: &[u8]) -> SchedulerResult<()> {
        Ok(())
    }
}

fn invalidate_payload(name: &str, due: OffsetDateTime) -> Bytes {
    Bytes::from(
        serde_json::to_vec(&CacheInvalidateMsg {
            name: name.to_string(),
            due_timestamp: due.unix_timestamp(),
        })
        .unwrap(),
    )
}

/// Spin up an executor plus one invalidate-subscription feeder.
fn start(
    handler: Arc<dyn TaskHandler>,
    backoff: Duration,
) -> (
    depot_scheduler::MemoryProducer,
    SchedulerHandle,
    watch::Sender<bool>,
) {
    let (producer, consumer) = MemoryQueue::channel(TaskKind::InvalidateCache);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let registry = HandlerRegistry::new(handler, Arc::new(NoopHandler));
    let (scheduler, handle) = Scheduler::new(
        registry,
        Duration::from_millis(50),
        backoff,
        shutdown_rx,
    );
    tokio::spawn(scheduler.run());
    tokio::spawn(run_intake(consumer, handle.clone()));
    (producer, handle, shutdown_tx)
}

#[tokio::test]
async fn test_successful_task_is_committed_once() {
    let handler = FlakyHandler::new(0);
    let (producer, _handle, _shutdown) = start(handler.clone(), Duration::from_millis(100));

    let past = OffsetDateTime::now_utc() - time::Duration::seconds(1);
    let probe = producer.send(invalidate_payload("alice", past)).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(probe.ack_count(), 1);
    assert_eq!(handler.executions().len(), 1);
}

#[tokio::test]
async fn test_fail_once_then_succeed_commits_once_with_backoff() {
    let handler = FlakyHandler::new(1);
    let (producer, _handle, _shutdown) = start(handler.clone(), Duration::from_millis(200));

    let past = OffsetDateTime::now_utc() - time::Duration::seconds(1);
    let probe = producer.send(invalidate_payload("bob", past)).unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;

    let executions = handler.executions();
    assert_eq!(executions.len(), 2, "one failure plus one success");
    // The retry ran strictly later than the first attempt, by at least
    // roughly the backoff.
    let gap = executions[1].1 - executions[0].1;
    assert!(gap >= time::Duration::milliseconds(150), "gap was {gap}");
    // Committed exactly once despite two executions.
    assert_eq!(probe.ack_count(), 1);
}

#[tokio::test]
async fn test_always_failing_task_is_never_committed() {
    let handler = FlakyHandler::new(u32::MAX);
    let (producer, _handle, _shutdown) = start(handler.clone(), Duration::from_millis(100));

    let past = OffsetDateTime::now_utc() - time::Duration::seconds(1);
    let probe = producer.send(invalidate_payload("carol", past)).unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;

    let executions = handler.executions();
    assert!(
        executions.len() >= 3,
        "kept retrying, saw {}",
        executions.len()
    );
    assert_eq!(probe.ack_count(), 0);
    // Due times strictly increase across attempts.
    for pair in executions.windows(2) {
        assert!(pair[1].1 > pair[0].1);
    }
}

#[tokio::test]
async fn test_tasks_execute_in_due_time_order() {
    let handler = FlakyHandler::new(0);
    let (producer, _handle, _shutdown) = start(handler.clone(), Duration::from_millis(100));

    let now = OffsetDateTime::now_utc();
    // Sent in reverse due order; both land in the heap before either is due.
    producer
        .send(invalidate_payload("late", now + time::Duration::milliseconds(600)))
        .unwrap();
    producer
        .send(invalidate_payload("early", now + time::Duration::milliseconds(300)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let names: Vec<String> = handler.executions().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["early".to_string(), "late".to_string()]);
}

#[tokio::test]
async fn test_future_due_task_waits() {
    let handler = FlakyHandler::new(0);
    let (producer, _handle, _shutdown) = start(handler.clone(), Duration::from_millis(100));

    let due = OffsetDateTime::now_utc() + time::Duration::milliseconds(500);
    let probe = producer.send(invalidate_payload("dave", due)).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handler.executions().is_empty(), "ran before due time");
    assert_eq!(probe.ack_count(), 0);

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(handler.executions().len(), 1);
    assert_eq!(probe.ack_count(), 1);
}

#[tokio::test]
async fn test_malformed_message_is_dropped_and_committed() {
    let handler = FlakyHandler::new(0);
    let (producer, _handle, _shutdown) = start(handler.clone(), Duration::from_millis(100));

    let probe = producer.send(Bytes::from_static(b"not json")).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Acked so it cannot wedge the subscription, but never executed.
    assert_eq!(probe.ack_count(), 1);
    assert!(handler.executions().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_executor() {
    let handler = FlakyHandler::new(0);
    let (_producer, handle, shutdown) = start(handler, Duration::from_millis(100));

    shutdown.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The executor is gone; submissions bounce back.
    let task = depot_scheduler::DelayedTask::new(
        TaskKind::InvalidateCache,
        Bytes::new(),
        OffsetDateTime::now_utc(),
        None,
    );
    assert!(handle.submit(task).is_err());
}

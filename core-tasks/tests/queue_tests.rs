//! Integration tests for the bounded task queue
//!
//! These tests verify the queue's core contracts:
//! - de-duplication by task key while pending or running
//! - priority dispatch order among waiting tasks
//! - the concurrency bound is never exceeded
//! - task failures and panics are isolated from the queue
//! - cancellation resolves pending and running work cleanly

use async_trait::async_trait;
use core_tasks::{
    Priority, QueueTask, ScheduleOutcome, TaskContext, TaskError, TaskKey, TaskOutcome, TaskQueue,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Task that sleeps and records how many instances run concurrently
struct TrackingTask {
    key: String,
    priority: Priority,
    sleep: Duration,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    started: Arc<Mutex<Vec<String>>>,
}

impl TrackingTask {
    fn new(key: &str, sleep: Duration) -> Self {
        Self {
            key: key.to_string(),
            priority: Priority::Normal,
            sleep,
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    fn sharing(mut self, other: &TrackingTask) -> Self {
        self.running = Arc::clone(&other.running);
        self.max_running = Arc::clone(&other.max_running);
        self.started = Arc::clone(&other.started);
        self
    }

    fn sharing_started(mut self, started: &Arc<Mutex<Vec<String>>>) -> Self {
        self.started = Arc::clone(started);
        self
    }
}

#[async_trait]
impl QueueTask for TrackingTask {
    fn key(&self) -> TaskKey {
        TaskKey::new(self.key.clone())
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    async fn run(&self, context: TaskContext) -> Result<(), TaskError> {
        self.started.lock().await.push(self.key.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            _ = tokio::time::sleep(self.sleep) => Ok(()),
            _ = context.cancel.cancelled() => Err(TaskError::Cancelled),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

struct FailingTask;

#[async_trait]
impl QueueTask for FailingTask {
    fn key(&self) -> TaskKey {
        TaskKey::new("failing")
    }

    async fn run(&self, _context: TaskContext) -> Result<(), TaskError> {
        Err(TaskError::Failed("boom".to_string()))
    }
}

struct PanickingTask;

#[async_trait]
impl QueueTask for PanickingTask {
    fn key(&self) -> TaskKey {
        TaskKey::new("panicking")
    }

    async fn run(&self, _context: TaskContext) -> Result<(), TaskError> {
        panic!("unexpected");
    }
}

fn expect_scheduled(outcome: ScheduleOutcome) -> core_tasks::TaskHandle {
    match outcome {
        ScheduleOutcome::Scheduled(handle) => handle,
        ScheduleOutcome::AlreadyQueued => panic!("task unexpectedly de-duplicated"),
        ScheduleOutcome::Rejected => panic!("queue unexpectedly closed"),
    }
}

#[tokio::test]
async fn test_deduplication_while_pending_or_running() {
    let queue = TaskQueue::new("test", 2);

    let first = TrackingTask::new("feed-1", Duration::from_millis(100));
    let second = TrackingTask::new("feed-1", Duration::from_millis(100)).sharing(&first);

    let handle = expect_scheduled(queue.schedule(Arc::new(first)).await);
    assert!(queue.is_queued(&TaskKey::new("feed-1")).await);

    // An equivalent task is refused while the first is pending or running
    assert!(matches!(
        queue.schedule(Arc::new(second)).await,
        ScheduleOutcome::AlreadyQueued
    ));

    assert_eq!(handle.outcome().await, TaskOutcome::Completed);
    assert!(!queue.is_queued(&TaskKey::new("feed-1")).await);

    // After completion the key is free again
    let third = TrackingTask::new("feed-1", Duration::from_millis(1));
    assert!(queue.schedule(Arc::new(third)).await.is_scheduled());
}

#[tokio::test]
async fn test_at_most_one_instance_runs_per_key() {
    let queue = TaskQueue::new("test", 4);

    let template = TrackingTask::new("feed-1", Duration::from_millis(50));
    let max_running = Arc::clone(&template.max_running);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let task = TrackingTask::new("feed-1", Duration::from_millis(50)).sharing(&template);
        if let ScheduleOutcome::Scheduled(handle) = queue.schedule(Arc::new(task)).await {
            handles.push(handle);
        }
    }

    // Only the first schedule was accepted
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.outcome().await;
    }
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrency_bound_is_respected() {
    let queue = TaskQueue::new("test", 2);

    let template = TrackingTask::new("t-0", Duration::from_millis(50));
    let max_running = Arc::clone(&template.max_running);

    let mut handles = Vec::new();
    for i in 0..6 {
        let task =
            TrackingTask::new(&format!("t-{}", i), Duration::from_millis(50)).sharing(&template);
        handles.push(expect_scheduled(queue.schedule(Arc::new(task)).await));
    }

    for handle in handles {
        assert_eq!(handle.outcome().await, TaskOutcome::Completed);
    }

    assert!(max_running.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_priority_dispatch_order() {
    let queue = TaskQueue::new("test", 1);

    let blocker = TrackingTask::new("blocker", Duration::from_millis(100));
    let started = Arc::clone(&blocker.started);

    let blocker_handle = expect_scheduled(queue.schedule(Arc::new(blocker)).await);

    // Let the blocker occupy the single slot before queueing the rest
    tokio::time::sleep(Duration::from_millis(30)).await;

    let low = TrackingTask::new("low", Duration::from_millis(10))
        .with_priority(Priority::Low)
        .sharing_started(&started);
    let high = TrackingTask::new("high", Duration::from_millis(10))
        .with_priority(Priority::High)
        .sharing_started(&started);

    let low_handle = expect_scheduled(queue.schedule(Arc::new(low)).await);
    let high_handle = expect_scheduled(queue.schedule(Arc::new(high)).await);

    blocker_handle.outcome().await;
    high_handle.outcome().await;
    low_handle.outcome().await;

    let order = started.lock().await.clone();
    assert_eq!(order, vec!["blocker", "high", "low"]);
}

#[tokio::test]
async fn test_task_failure_does_not_crash_the_queue() {
    let queue = TaskQueue::new("test", 1);

    let failed = expect_scheduled(queue.schedule(Arc::new(FailingTask)).await)
        .outcome()
        .await;
    assert_eq!(failed, TaskOutcome::Failed("boom".to_string()));

    let panicked = expect_scheduled(queue.schedule(Arc::new(PanickingTask)).await)
        .outcome()
        .await;
    assert_eq!(panicked, TaskOutcome::Failed("task panicked".to_string()));

    // The queue keeps processing after both failures
    let ok = TrackingTask::new("after", Duration::from_millis(1));
    let outcome = expect_scheduled(queue.schedule(Arc::new(ok)).await)
        .outcome()
        .await;
    assert_eq!(outcome, TaskOutcome::Completed);
}

#[tokio::test]
async fn test_cancel_resolves_pending_and_running_tasks() {
    let queue = TaskQueue::new("test", 1);

    let running = TrackingTask::new("running", Duration::from_secs(30));
    let pending = TrackingTask::new("pending", Duration::from_millis(1));

    let running_handle = expect_scheduled(queue.schedule(Arc::new(running)).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    let pending_handle = expect_scheduled(queue.schedule(Arc::new(pending)).await);

    queue.cancel(true).await;

    assert_eq!(running_handle.outcome().await, TaskOutcome::Cancelled);
    assert_eq!(pending_handle.outcome().await, TaskOutcome::Cancelled);

    // New work is refused after cancellation
    let late = TrackingTask::new("late", Duration::from_millis(1));
    assert!(matches!(
        queue.schedule(Arc::new(late)).await,
        ScheduleOutcome::Rejected
    ));
}

#[tokio::test]
async fn test_shutdown_drains_pending_work() {
    let queue = TaskQueue::new("writes", 1);

    let template = TrackingTask::new("w-0", Duration::from_millis(20));
    let started = Arc::clone(&template.started);

    let mut handles = Vec::new();
    for i in 0..3 {
        let task =
            TrackingTask::new(&format!("w-{}", i), Duration::from_millis(20)).sharing(&template);
        handles.push(expect_scheduled(queue.schedule(Arc::new(task)).await));
    }

    queue.shutdown().await;

    // Every accepted write ran to completion before shutdown returned
    assert_eq!(started.lock().await.len(), 3);
    for handle in handles {
        assert_eq!(handle.outcome().await, TaskOutcome::Completed);
    }
}

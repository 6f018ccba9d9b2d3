//! # Bounded Task Queue
//!
//! Named work queue that runs at most N tasks concurrently.
//!
//! ## Features
//!
//! - **Bounded Concurrency**: at most `bound` tasks run simultaneously
//! - **De-duplication**: a task is never queued while an equivalent task
//!   (same key) is pending or running
//! - **Prioritization**: dispatch order among waiting tasks follows priority,
//!   FIFO within one priority; a running task is never preempted
//! - **Failure Isolation**: an error or panic inside a task is reported
//!   through the task's handle and never takes down the queue
//! - **Cancellation**: `cancel` stops dispatch and cancels in-flight work;
//!   `shutdown` drains pending and in-flight work to completion
//!
//! ## Usage
//!
//! ```ignore
//! use core_tasks::{Priority, ScheduleOutcome, TaskQueue};
//!
//! let queue = TaskQueue::new("reloads", 10);
//! match queue.schedule(task).await {
//!     ScheduleOutcome::Scheduled(handle) => {
//!         let outcome = handle.outcome().await;
//!     }
//!     ScheduleOutcome::AlreadyQueued => { /* equivalent task pending */ }
//!     ScheduleOutcome::Rejected => { /* queue shut down */ }
//! }
//! ```

use async_trait::async_trait;
use futures::FutureExt;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::TaskError;

/// Stable identity of a task, used for de-duplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level for queued tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Low priority - background housekeeping
    Low = 0,
    /// Normal priority - bulk work
    #[default]
    Normal = 1,
    /// High priority - user-initiated single operations
    High = 2,
}

/// Progress report emitted by a running task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProgress {
    /// Units of work completed so far
    pub completed: u64,
    /// Total units when known
    pub total: Option<u64>,
}

/// Sink a running task reports progress into
#[derive(Clone)]
pub struct ProgressSink {
    callback: Option<Arc<dyn Fn(TaskProgress) + Send + Sync>>,
}

impl ProgressSink {
    /// A sink that discards all reports
    pub fn noop() -> Self {
        Self { callback: None }
    }

    /// A sink forwarding reports into the given callback
    pub fn new(callback: impl Fn(TaskProgress) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn report(&self, progress: TaskProgress) {
        if let Some(callback) = &self.callback {
            callback(progress);
        }
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("attached", &self.callback.is_some())
            .finish()
    }
}

/// Execution context handed to a task's unit of work
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Cancelled when the task or the whole queue is cancelled
    pub cancel: CancellationToken,
    /// Sink for progress reports
    pub progress: ProgressSink,
}

/// A schedulable unit of work
#[async_trait]
pub trait QueueTask: Send + Sync {
    /// Stable, comparable identity used for de-duplication
    fn key(&self) -> TaskKey;

    /// Dispatch priority among waiting tasks
    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Run the unit of work.
    ///
    /// Implementations poll `context.cancel` at natural boundaries and
    /// return `TaskError::Cancelled` when it fires.
    async fn run(&self, context: TaskContext) -> Result<(), TaskError>;
}

/// Final result of a dispatched task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Result of a `schedule` call
pub enum ScheduleOutcome {
    /// Task accepted; the handle resolves to the task's outcome
    Scheduled(TaskHandle),
    /// An equivalent task is already pending or running; nothing was queued
    AlreadyQueued,
    /// The queue no longer accepts tasks
    Rejected,
}

impl ScheduleOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }
}

/// Await-able handle to a scheduled task's outcome
pub struct TaskHandle {
    key: TaskKey,
    rx: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Wait for the task to finish and return its outcome
    pub async fn outcome(self) -> TaskOutcome {
        self.rx.await.unwrap_or(TaskOutcome::Cancelled)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub bound: usize,
}

struct PendingEntry {
    priority: Priority,
    seq: u64,
    task: Arc<dyn QueueTask>,
    progress: ProgressSink,
    done_tx: oneshot::Sender<TaskOutcome>,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier arrival
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    pending: BinaryHeap<PendingEntry>,
    /// Keys of all pending and running tasks
    keys: HashSet<TaskKey>,
    accepting: bool,
    draining: bool,
    seq: u64,
}

struct Inner {
    name: String,
    bound: usize,
    state: Mutex<QueueState>,
    notify: Notify,
    semaphore: Arc<Semaphore>,
    quit: CancellationToken,
    tracker: TaskTracker,
}

/// Named work queue with bounded concurrency and key de-duplication
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    /// Create a queue running at most `bound` tasks concurrently.
    ///
    /// The bound is fixed for the queue's lifetime.
    pub fn new(name: impl Into<String>, bound: usize) -> Self {
        assert!(bound > 0, "queue bound must be positive");

        let inner = Arc::new(Inner {
            name: name.into(),
            bound,
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                keys: HashSet::new(),
                accepting: true,
                draining: false,
                seq: 0,
            }),
            notify: Notify::new(),
            semaphore: Arc::new(Semaphore::new(bound)),
            quit: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        let dispatcher = Arc::clone(&inner);
        inner.tracker.spawn(dispatch_loop(dispatcher));

        Self { inner }
    }

    /// Schedule a task unless an equivalent one is pending or running
    pub async fn schedule(&self, task: Arc<dyn QueueTask>) -> ScheduleOutcome {
        self.schedule_with_progress(task, ProgressSink::noop())
            .await
    }

    /// Schedule a task with an attached progress sink
    pub async fn schedule_with_progress(
        &self,
        task: Arc<dyn QueueTask>,
        progress: ProgressSink,
    ) -> ScheduleOutcome {
        let key = task.key();
        let handle = {
            let mut state = self.inner.state.lock().await;
            if !state.accepting {
                debug!(queue = %self.inner.name, key = %key, "Queue closed, rejecting task");
                return ScheduleOutcome::Rejected;
            }
            if state.keys.contains(&key) {
                debug!(queue = %self.inner.name, key = %key, "Equivalent task already queued");
                return ScheduleOutcome::AlreadyQueued;
            }

            state.keys.insert(key.clone());
            state.seq += 1;
            let seq = state.seq;
            let (done_tx, done_rx) = oneshot::channel();
            state.pending.push(PendingEntry {
                priority: task.priority(),
                seq,
                task,
                progress,
                done_tx,
            });

            TaskHandle { key, rx: done_rx }
        };

        self.inner.notify.notify_one();
        ScheduleOutcome::Scheduled(handle)
    }

    /// Answer whether an equivalent task is pending or running, without side
    /// effects
    pub async fn is_queued(&self, key: &TaskKey) -> bool {
        self.inner.state.lock().await.keys.contains(key)
    }

    /// Current queue statistics
    pub async fn stats(&self) -> QueueStats {
        let pending = self.inner.state.lock().await.pending.len();
        QueueStats {
            pending,
            running: self.inner.bound - self.inner.semaphore.available_permits(),
            bound: self.inner.bound,
        }
    }

    /// Stop accepting new tasks and cancel work.
    ///
    /// Pending tasks resolve as `Cancelled` without running; in-flight tasks
    /// observe their cancellation token. When `wait_for_running` is set the
    /// call blocks until in-flight tasks have finished.
    pub async fn cancel(&self, wait_for_running: bool) {
        {
            let mut state = self.inner.state.lock().await;
            state.accepting = false;
            while let Some(entry) = state.pending.pop() {
                let key = entry.task.key();
                state.keys.remove(&key);
                let _ = entry.done_tx.send(TaskOutcome::Cancelled);
            }
        }

        self.inner.quit.cancel();
        self.inner.notify.notify_one();
        self.inner.tracker.close();

        if wait_for_running {
            self.inner.tracker.wait().await;
        }

        debug!(queue = %self.inner.name, "Queue cancelled");
    }

    /// Stop accepting new tasks and drain all pending and in-flight work to
    /// completion.
    ///
    /// Used by the persistence write queue so no accepted write is abandoned
    /// at shutdown.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.accepting = false;
            state.draining = true;
        }

        self.inner.notify.notify_one();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        debug!(queue = %self.inner.name, "Queue drained and shut down");
    }
}

async fn dispatch_loop(inner: Arc<Inner>) {
    loop {
        let next = {
            let mut state = inner.state.lock().await;
            if inner.quit.is_cancelled() {
                break;
            }
            match state.pending.pop() {
                Some(entry) => Some(entry),
                None if state.draining => break,
                None => None,
            }
        };

        let Some(entry) = next else {
            tokio::select! {
                _ = inner.notify.notified() => {}
                _ = inner.quit.cancelled() => {}
            }
            continue;
        };

        let permit = tokio::select! {
            permit = Arc::clone(&inner.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = inner.quit.cancelled() => {
                let key = entry.task.key();
                inner.state.lock().await.keys.remove(&key);
                let _ = entry.done_tx.send(TaskOutcome::Cancelled);
                continue;
            }
        };

        let key = entry.task.key();
        debug!(queue = %inner.name, key = %key, priority = ?entry.priority, "Dispatching task");

        let child = inner.quit.child_token();
        let task_inner = Arc::clone(&inner);
        inner.tracker.spawn(async move {
            let _permit = permit;
            let context = TaskContext {
                cancel: child,
                progress: entry.progress.clone(),
            };

            let result = AssertUnwindSafe(entry.task.run(context)).catch_unwind().await;
            let outcome = match result {
                Ok(Ok(())) => TaskOutcome::Completed,
                Ok(Err(TaskError::Cancelled)) => TaskOutcome::Cancelled,
                Ok(Err(TaskError::Failed(message))) => TaskOutcome::Failed(message),
                Err(_) => TaskOutcome::Failed("task panicked".to_string()),
            };

            task_inner.state.lock().await.keys.remove(&key);

            match &outcome {
                TaskOutcome::Failed(message) => {
                    warn!(queue = %task_inner.name, key = %key, error = %message, "Task failed")
                }
                outcome => {
                    debug!(queue = %task_inner.name, key = %key, outcome = ?outcome, "Task finished")
                }
            }

            let _ = entry.done_tx.send(outcome);
        });
    }
}

//! # Task Scheduling Module
//!
//! Concurrency primitives for the feed engine:
//!
//! - **Task Queue** (`queue`): named bounded work queue with priority
//!   dispatch and de-duplication by task key
//! - **Event Batcher** (`batcher`): quiet-period coalescing of bursts into
//!   batches delivered to a single consumer

pub mod batcher;
pub mod error;
pub mod queue;

pub use batcher::EventBatcher;
pub use error::{Result, TaskError};
pub use queue::{
    Priority, ProgressSink, QueueStats, QueueTask, ScheduleOutcome, TaskContext, TaskHandle,
    TaskKey, TaskOutcome, TaskProgress, TaskQueue,
};

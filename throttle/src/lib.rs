//! Concurrency control for transfer operations
//!
//! This crate provides the bounded work queue used to schedule leaf file transfers. It keeps
//! a fixed number of transfers in flight against a remote endpoint no matter how large the
//! directory tree being synchronized is.
//!
//! # Overview
//!
//! - [`WorkQueue::submit`] enqueues a task with a priority; higher priorities start first and
//!   tasks of equal priority start in submission order
//! - At most `concurrency` tasks run at once (5 unless configured otherwise)
//! - [`WorkQueue::await_idle`] is a barrier that releases once nothing is pending or running
//!
//! # Usage
//!
//! ```rust,no_run
//! use throttle::WorkQueue;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let queue = WorkQueue::new(WorkQueue::DEFAULT_CONCURRENCY)?;
//! for i in 0..10 {
//!     queue.submit(format!("file-{i}"), 2, async move {
//!         // transfer one file here
//!         Ok(())
//!     });
//! }
//! queue.await_idle().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Failure Semantics
//!
//! A task that returns an error is logged and forgotten: the queue keeps running the remaining
//! tasks and never retries. Callers that need to know about failures record them from inside
//! the task itself.
//!
//! # Sharing
//!
//! `WorkQueue` is a cheap handle around shared state. Clones schedule into the same queue and
//! observe the same idle barrier, so one queue can be shared by a whole directory traversal and
//! by several top-level operations.

mod queue;

pub use queue::{Error, QueueStatus, WorkQueue};

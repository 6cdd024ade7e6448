//! Bounded priority work queue with an idle barrier.
//!
//! # Scheduling
//!
//! At most `concurrency` tasks run at any time. Waiting tasks are drawn by descending priority,
//! and tasks of equal priority run in submission order. A task that finishes, panics included,
//! releases its slot and the next waiting task is started from the same code path; there is no
//! background dispatcher.
//!
//! # Idle barrier
//!
//! Every change to the queue state is published through a `tokio::sync::watch` channel while the
//! state lock is still held. [`WorkQueue::await_idle`] waits on that channel for a snapshot with
//! nothing pending and nothing active. A running task that submits more work does so before its
//! own slot is released, so the published state never passes through idle in between.
//!
//! # Failures
//!
//! Tasks return `anyhow::Result<()>`. The queue logs each outcome and moves on: there is no
//! global failure propagation and nothing is retried.

use std::sync::Arc;

type Job = futures::future::BoxFuture<'static, anyhow::Result<()>>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("work queue concurrency must be greater than zero")]
    ZeroConcurrency,
}

/// Point-in-time view of the queue state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueStatus {
    /// Tasks submitted but not started yet
    pub pending: usize,
    /// Tasks currently running
    pub active: usize,
    /// Maximum number of tasks allowed to run at once
    pub concurrency: usize,
}

impl QueueStatus {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.active == 0
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "pending: {}, active: {}/{}",
            self.pending, self.active, self.concurrency
        )
    }
}

struct PendingTask {
    priority: i32,
    seq: u64,
    label: String,
    job: Job,
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PendingTask {}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTask {
    // BinaryHeap is a max-heap: higher priority wins, then the older submission
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct State {
    pending: std::collections::BinaryHeap<PendingTask>,
    active: usize,
    next_seq: u64,
}

struct Inner {
    concurrency: usize,
    state: std::sync::Mutex<State>,
    status: tokio::sync::watch::Sender<QueueStatus>,
}

/// Fixed-capacity task scheduler shared by everything that clones it.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("status", &self.status())
            .finish()
    }
}

impl WorkQueue {
    pub const DEFAULT_CONCURRENCY: usize = 5;

    pub fn new(concurrency: usize) -> Result<Self, Error> {
        if concurrency == 0 {
            return Err(Error::ZeroConcurrency);
        }
        let (status, _) = tokio::sync::watch::channel(QueueStatus {
            pending: 0,
            active: 0,
            concurrency,
        });
        Ok(Self {
            inner: Arc::new(Inner {
                concurrency,
                state: std::sync::Mutex::new(State::default()),
                status,
            }),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn status(&self) -> QueueStatus {
        *self.inner.status.borrow()
    }

    /// Enqueue a task. It starts right away if a slot is free, otherwise it waits its turn.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit<F>(&self, label: impl Into<String>, priority: i32, task: F)
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        tracing::trace!("Queueing task {} with priority {}", label, priority);
        let ready = {
            let mut state = self.lock_state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(PendingTask {
                priority,
                seq,
                label,
                job: Box::pin(task),
            });
            self.take_ready(&mut state)
        };
        let handle = tokio::runtime::Handle::current();
        for task in ready {
            self.start(&handle, task);
        }
    }

    /// Wait until nothing is pending and nothing is running.
    pub async fn await_idle(&self) {
        let mut receiver = self.inner.status.subscribe();
        // the sender lives as long as `self`, so this can only return once idle
        if receiver.wait_for(QueueStatus::is_idle).await.is_err() {
            tracing::warn!("Work queue status channel closed before the queue became idle");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        // a poisoned lock only means a panic happened while it was held; the counters are intact
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Pop every task that fits under the concurrency limit and publish the new state.
    /// Must be called with the state lock held.
    fn take_ready(&self, state: &mut State) -> Vec<PendingTask> {
        let mut ready = vec![];
        while state.active < self.inner.concurrency {
            match state.pending.pop() {
                Some(task) => {
                    state.active += 1;
                    ready.push(task);
                }
                None => break,
            }
        }
        self.inner.status.send_replace(QueueStatus {
            pending: state.pending.len(),
            active: state.active,
            concurrency: self.inner.concurrency,
        });
        ready
    }

    fn start(&self, handle: &tokio::runtime::Handle, task: PendingTask) {
        let slot = SlotGuard {
            queue: self.clone(),
            handle: handle.clone(),
        };
        handle.spawn(async move {
            // released on completion and on panic alike
            let _slot = slot;
            let PendingTask {
                label,
                job,
                priority,
                ..
            } = task;
            tracing::debug!("Starting task {} (priority {})", label, priority);
            let started = std::time::Instant::now();
            match job.await {
                Ok(()) => {
                    tracing::debug!("Task {} finished in {:?}", label, started.elapsed());
                }
                Err(error) => {
                    tracing::error!("Task {} failed: {:#}", label, error);
                }
            }
        });
    }

    fn release(&self, handle: &tokio::runtime::Handle) {
        let ready = {
            let mut state = self.lock_state();
            state.active -= 1;
            self.take_ready(&mut state)
        };
        for task in ready {
            self.start(handle, task);
        }
    }
}

struct SlotGuard {
    queue: WorkQueue,
    handle: tokio::runtime::Handle,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.queue.release(&self.handle);
    }
}

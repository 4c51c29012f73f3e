use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::scheduler::job::JobParams;

/// What a worker needs to dispatch a run. The record itself stays in the
/// status store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: String,
    pub params: JobParams,
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<QueuedJob>,
    /// Enqueued but not yet acknowledged with `task_done`.
    unfinished: usize,
}

/// Unbounded FIFO between the front door and the workers.
///
/// Synchronised separately from the status store so enqueue/dequeue never
/// contend with status polls.
#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<Inner>,
    available: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never leave the deque half-updated, so a poisoned
        // lock still guards consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a run. Never blocks.
    pub fn enqueue(&self, job: QueuedJob) {
        {
            let mut inner = self.lock();
            inner.items.push_back(job);
            inner.unfinished += 1;
        }
        self.available.notify_one();
    }

    /// Take the oldest run, waiting until one is available.
    pub async fn dequeue(&self) -> QueuedJob {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue between the check and
            // the await is not missed.
            notified.as_mut().enable();

            if let Some(job) = self.lock().items.pop_front() {
                return job;
            }
            notified.await;
        }
    }

    /// Acknowledge that a dequeued run has been dealt with.
    pub fn task_done(&self) {
        let mut inner = self.lock();
        inner.unfinished = inner.unfinished.saturating_sub(1);
    }

    /// Runs waiting to be picked up.
    pub fn size(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Runs enqueued and not yet acknowledged, in flight ones included.
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }
}

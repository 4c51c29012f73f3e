use std::sync::Arc;

use crate::error::{Result, SnowcastError};
use crate::scheduler::denylist::{denied_message, Denylist};
use crate::scheduler::job::{JobParams, JobResult, JobStatus};
use crate::scheduler::queue::{JobQueue, QueuedJob};
use crate::scheduler::store::StatusStore;

/// What a caller gets back from a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub id: String,
    pub status: JobStatus,
    pub queue_position: usize,
    pub active_runs: usize,
    pub max_runs: usize,
}

/// Poll answer for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Pending {
        id: String,
        status: JobStatus,
        queue_position: usize,
        active_runs: usize,
        max_runs: usize,
    },
    Finished {
        id: String,
        status: JobStatus,
        result: JobResult,
    },
}

impl RunStatus {
    pub fn status(&self) -> JobStatus {
        match self {
            RunStatus::Pending { status, .. } | RunStatus::Finished { status, .. } => *status,
        }
    }
}

/// Front door: validates, records and enqueues runs, and answers polls.
///
/// Submitting never waits on the workers; the only contention is the status
/// store lock.
#[derive(Clone)]
pub struct Admission {
    store: Arc<StatusStore>,
    queue: Arc<JobQueue>,
    denylist: Arc<dyn Denylist>,
}

impl Admission {
    pub fn new(store: Arc<StatusStore>, queue: Arc<JobQueue>, denylist: Arc<dyn Denylist>) -> Self {
        Self {
            store,
            queue,
            denylist,
        }
    }

    /// Validate raw fields and submit.
    pub fn submit(&self, lake: &str, date: &str) -> Result<SubmitReceipt> {
        let params = JobParams::parse(lake, date)?;
        self.submit_params(params)
    }

    pub fn submit_params(&self, params: JobParams) -> Result<SubmitReceipt> {
        if self.denylist.is_denied(&params) {
            tracing::info!(run_name = %params.run_name(), "Rejected run with missing input data");
            return Err(SnowcastError::Rejected(denied_message(&params)));
        }

        let queue = &self.queue;
        let record = self.store.create(params.clone(), || queue.size());
        self.queue.enqueue(QueuedJob {
            id: record.id.clone(),
            params,
        });

        tracing::info!(
            run_id = %record.id,
            lake = %record.params.lake,
            date = %record.params.date_label(),
            queue_position = record.queue_position,
            "Run queued"
        );

        Ok(SubmitReceipt {
            id: record.id,
            status: record.status,
            queue_position: record.queue_position,
            active_runs: self.store.active_runs(),
            max_runs: self.store.max_runs(),
        })
    }

    pub fn status(&self, id: &str) -> Result<RunStatus> {
        let snapshot = self.store.snapshot(id)?;
        let record = snapshot.record;
        match record.result {
            Some(result) => Ok(RunStatus::Finished {
                id: record.id,
                status: record.status,
                result,
            }),
            None => Ok(RunStatus::Pending {
                id: record.id,
                status: record.status,
                queue_position: record.queue_position,
                active_runs: snapshot.active_runs,
                max_runs: snapshot.max_runs,
            }),
        }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

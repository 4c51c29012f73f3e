use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ExecutionError, RemoteError};
use crate::maintenance::ReaperHandle;
use crate::scheduler::{JobQueue, JobResult, QueuedJob, StatusStore};
use crate::worker::executor::ExecutionUnit;
use crate::worker::layout::{OutputLayout, OutputTarget};

/// Shown for failures whose detail must stay server-side.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "Internal error while running the model. Please wait a few minutes and try again.";

/// Shown when the remote preparation service could not deliver input data.
pub const REMOTE_ERROR_MESSAGE: &str =
    "Input data could not be prepared for this run. Please wait a few minutes and try again.";

/// Everything a worker needs, shared by every worker in the pool.
pub struct WorkerContext {
    pub store: Arc<StatusStore>,
    pub queue: Arc<JobQueue>,
    pub unit: Arc<dyn ExecutionUnit>,
    pub layout: Arc<dyn OutputLayout>,
    pub reaper: ReaperHandle,
}

/// Holds an active-run slot and the queue acknowledgement for one run.
///
/// Released on drop so it also happens when a worker unwinds.
struct RunSlot<'a> {
    store: &'a StatusStore,
    queue: &'a JobQueue,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.store.release_run();
        self.queue.task_done();
    }
}

impl WorkerContext {
    async fn worker_loop(self: Arc<Self>, name: String, shutdown: CancellationToken) {
        tracing::info!(worker = %name, "Worker started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = self.queue.dequeue() => job,
            };
            self.process(&name, job).await;
        }
        tracing::info!(worker = %name, "Worker stopped");
    }

    async fn process(&self, worker: &str, job: QueuedJob) {
        if let Err(e) = self.store.begin_processing(&job.id) {
            // Swept while waiting in the queue
            tracing::warn!(run_id = %job.id, error = %e, "Dequeued run has no queued record, skipping");
            self.queue.task_done();
            return;
        }
        let _slot = RunSlot {
            store: &self.store,
            queue: &self.queue,
        };

        tracing::info!(
            run_id = %job.id,
            worker,
            lake = %job.params.lake,
            date = %job.params.date_label(),
            "Processing run"
        );
        let started = Instant::now();

        // Resolved outside the per-run boundary: a panic here takes the
        // worker down and leaves the run in `processing`.
        let result = match self.resolve_target(&job).await {
            Ok(target) => self.execute_guarded(&job, target).await,
            Err(e) => {
                tracing::error!(run_id = %job.id, error = %e, "Failed to prepare output directory");
                JobResult::Failed {
                    message: INTERNAL_ERROR_MESSAGE.to_string(),
                }
            }
        };

        match self.store.finish(&job.id, result) {
            Ok(status) => {
                tracing::info!(
                    run_id = %job.id,
                    status = %status,
                    duration_secs = started.elapsed().as_secs_f64(),
                    "Run finished"
                );
                self.reaper.schedule_removal(job.id);
            }
            Err(e) => {
                tracing::warn!(run_id = %job.id, error = %e, "Could not record run result");
            }
        }
    }

    /// Resolve the output directory on the blocking pool. A panic in the
    /// layout is re-raised on the worker.
    async fn resolve_target(&self, job: &QueuedJob) -> std::io::Result<OutputTarget> {
        let layout = self.layout.clone();
        let params = job.params.clone();
        match tokio::task::spawn_blocking(move || layout.resolve(&params)).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(std::io::Error::other(e.to_string())),
        }
    }

    /// Run the execution unit in its own task so neither an error nor a
    /// panic inside it can end the worker.
    async fn execute_guarded(&self, job: &QueuedJob, target: OutputTarget) -> JobResult {
        let unit = self.unit.clone();
        let params = job.params.clone();
        let handle = tokio::spawn(async move { unit.execute(&params, &target).await });

        match handle.await {
            Ok(Ok(location)) => JobResult::Completed(location),
            Ok(Err(ExecutionError::Validation(message))) => {
                tracing::info!(run_id = %job.id, error = %message, "Run rejected by validation");
                JobResult::Failed { message }
            }
            Ok(Err(ExecutionError::Remote(e))) => {
                match &e {
                    RemoteError::Exhausted { attempts, last } => {
                        tracing::error!(run_id = %job.id, attempts, error = %last, "Remote preparation failed");
                    }
                    other => {
                        tracing::error!(run_id = %job.id, error = %other, "Remote preparation failed");
                    }
                }
                JobResult::Failed {
                    message: REMOTE_ERROR_MESSAGE.to_string(),
                }
            }
            Ok(Err(ExecutionError::Internal(detail))) => {
                tracing::error!(run_id = %job.id, error = %detail, "Run failed");
                JobResult::Failed {
                    message: INTERNAL_ERROR_MESSAGE.to_string(),
                }
            }
            Err(join_err) => {
                tracing::error!(run_id = %job.id, error = %join_err, "Execution task aborted");
                JobResult::Failed {
                    message: INTERNAL_ERROR_MESSAGE.to_string(),
                }
            }
        }
    }
}

struct WorkerSlot {
    name: String,
    handle: JoinHandle<()>,
}

/// Fixed-size set of workers draining the queue, with a supervisor that
/// replaces workers that died.
///
/// A replaced worker's in-flight run is not recovered; it stays in
/// `processing` until the hard-ceiling sweep removes it.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    workers: Mutex<Vec<WorkerSlot>>,
    restarts: AtomicU64,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `size` workers.
    pub fn start(ctx: WorkerContext, size: usize, shutdown: CancellationToken) -> Arc<Self> {
        let ctx = Arc::new(ctx);
        tracing::info!(workers = size, "Starting model workers");
        let workers = (0..size)
            .map(|i| {
                let name = format!("model-worker-{}", i);
                WorkerSlot {
                    handle: Self::spawn_worker(&ctx, name.clone(), shutdown.clone()),
                    name,
                }
            })
            .collect();

        Arc::new(Self {
            ctx,
            workers: Mutex::new(workers),
            restarts: AtomicU64::new(0),
            shutdown,
        })
    }

    fn spawn_worker(
        ctx: &Arc<WorkerContext>,
        name: String,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(ctx.clone().worker_loop(name, shutdown))
    }

    fn slots(&self) -> MutexGuard<'_, Vec<WorkerSlot>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> usize {
        self.slots().len()
    }

    pub fn live_workers(&self) -> usize {
        self.slots()
            .iter()
            .filter(|w| !w.handle.is_finished())
            .count()
    }

    /// Total number of workers replaced so far.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Replace every worker that is no longer running. Returns how many were
    /// replaced.
    pub fn check_workers(&self) -> usize {
        if self.shutdown.is_cancelled() {
            return 0;
        }

        let mut replaced = 0;
        for (i, slot) in self.slots().iter_mut().enumerate() {
            if !slot.handle.is_finished() {
                continue;
            }
            tracing::warn!(worker = %slot.name, "Worker died, restarting");
            let name = format!("model-worker-{}-restarted", i);
            slot.handle = Self::spawn_worker(&self.ctx, name.clone(), self.shutdown.clone());
            slot.name = name;
            replaced += 1;
        }

        self.restarts.fetch_add(replaced as u64, Ordering::Relaxed);
        replaced
    }

    /// Check worker liveness every `interval` until shutdown.
    pub fn spawn_supervisor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            tracing::info!(interval_secs = interval.as_secs_f64(), "Worker supervisor started");
            loop {
                tokio::select! {
                    _ = pool.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.check_workers();
                    }
                }
            }
        })
    }

    /// Wait for every worker to exit after shutdown was requested.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .slots()
            .drain(..)
            .map(|slot| slot.handle)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::warn!(error = %e, "Worker ended with a panic");
                }
            }
        }
    }
}

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::ServiceConfig;
use crate::maintenance::{log_system_status, DataJanitor, Reaper, ReaperHandle};
use crate::remote::{HttpRemoteClient, RetryPolicy, RetryingClient};
use crate::scheduler::{Admission, Denylist, JobQueue, MissingDataList, StatusStore};
use crate::worker::{
    CollisionAwareLayout, ExecutionUnit, InferenceExecutor, OutputLayout, WorkerContext,
    WorkerPool,
};

/// Owns the status store, the queue and every long-lived task of the
/// process.
///
/// Lifecycle:
/// 1. [`Service::new`] / [`Service::from_config`] wire the components; nothing runs yet
/// 2. [`Service::start`] spawns the reaper, the workers and their supervisor,
///    the status logger and the data janitor
/// 3. [`Service::shutdown`] cancels them and waits for in-flight runs to end
pub struct Service {
    config: ServiceConfig,
    store: Arc<StatusStore>,
    queue: Arc<JobQueue>,
    admission: Admission,
    unit: Arc<dyn ExecutionUnit>,
    layout: Arc<dyn OutputLayout>,
    shutdown: CancellationToken,
    running: Mutex<Option<Running>>,
}

struct Running {
    pool: Arc<WorkerPool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Service {
    pub fn new(
        config: ServiceConfig,
        unit: Arc<dyn ExecutionUnit>,
        layout: Arc<dyn OutputLayout>,
        denylist: Arc<dyn Denylist>,
    ) -> Self {
        let store = Arc::new(StatusStore::new(config.max_concurrent_runs));
        let queue = Arc::new(JobQueue::new());
        let admission = Admission::new(store.clone(), queue.clone(), denylist);

        Self {
            config,
            store,
            queue,
            admission,
            unit,
            layout,
            shutdown: CancellationToken::new(),
            running: Mutex::new(None),
        }
    }

    /// Production wiring: HTTP preparation client with retries, the model
    /// process, the collision-aware layout and the missing-data file.
    pub fn from_config(config: ServiceConfig) -> Self {
        let denylist: Arc<dyn Denylist> = Arc::new(MissingDataList::new(&config.missing_list));
        let remote = RetryingClient::new(
            Arc::new(HttpRemoteClient::new(&config.remote)),
            RetryPolicy::from(&config.retry),
        );
        let unit = Arc::new(InferenceExecutor::new(
            remote,
            config.model.clone(),
            denylist.clone(),
        ));
        let layout = Arc::new(CollisionAwareLayout::new(
            &config.data_dir,
            config.retention.collision_window,
        ));
        Self::new(config, unit, layout, denylist)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The worker pool, once started.
    pub fn pool(&self) -> Option<Arc<WorkerPool>> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.pool.clone())
    }

    /// Spawn every background task. Calling it again is a no-op.
    pub fn start(&self) -> Arc<WorkerPool> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(r) = running.as_ref() {
            return r.pool.clone();
        }

        let mut tasks = Vec::new();

        let (reaper, reaper_handle) = Reaper::new(self.store.clone(), self.config.retention.clone());
        tasks.push(tokio::spawn(reaper.run(self.shutdown.clone())));

        let pool = self.spawn_workers(reaper_handle);
        tasks.push(pool.spawn_supervisor(self.config.supervisor_interval));

        tasks.push(tokio::spawn(log_system_status(
            self.store.clone(),
            self.queue.clone(),
            self.config.status_log_interval,
            self.shutdown.clone(),
        )));

        if let Some(hour) = self.config.retention.janitor_hour_utc {
            let janitor = DataJanitor::new(&self.config.data_dir, hour);
            tasks.push(tokio::spawn(janitor.run(self.shutdown.clone())));
        }

        tracing::info!(
            workers = self.config.max_concurrent_runs,
            data_dir = %self.config.data_dir.display(),
            "Service started"
        );

        *running = Some(Running {
            pool: pool.clone(),
            tasks,
        });
        pool
    }

    fn spawn_workers(&self, reaper: ReaperHandle) -> Arc<WorkerPool> {
        let ctx = WorkerContext {
            store: self.store.clone(),
            queue: self.queue.clone(),
            unit: self.unit.clone(),
            layout: self.layout.clone(),
            reaper,
        };
        WorkerPool::start(ctx, self.config.max_concurrent_runs, self.shutdown.clone())
    }

    /// Cancel every task and wait for them. Workers finish the run they are
    /// on; queued runs are left in place.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };

        running.pool.join().await;
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!(
            queued = self.queue.size(),
            unacknowledged = self.queue.unfinished(),
            "Service stopped"
        );
    }

    /// Start, serve the HTTP API on `addr` until the shutdown token fires,
    /// then stop.
    pub async fn run(&self, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
        self.start();

        let state = ApiState {
            admission: self.admission.clone(),
            data_dir: Arc::new(self.config.data_dir.clone()),
        };
        let served = run_api(addr, state, self.shutdown.clone()).await;

        self.shutdown().await;
        served?;
        Ok(())
    }
}

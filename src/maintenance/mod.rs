//! Background housekeeping: record reaping, daily artifact cleanup and the
//! periodic status log line.

pub mod janitor;
pub mod reaper;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::scheduler::{JobQueue, StatusStore};

pub use janitor::DataJanitor;
pub use reaper::{sweep_stale, Reaper, ReaperHandle};

/// Log active runs, queue depth and record count every `interval`.
pub async fn log_system_status(
    store: Arc<StatusStore>,
    queue: Arc<JobQueue>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                tracing::info!(
                    active_runs = store.active_runs(),
                    queue_size = queue.size(),
                    status_entries = store.len(),
                    "System status"
                );
            }
        }
    }
}

use std::future::poll_fn;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

use crate::config::RetentionConfig;
use crate::scheduler::StatusStore;

/// Schedules delayed removal of finished runs.
#[derive(Debug, Clone)]
pub struct ReaperHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl ReaperHandle {
    /// Remove `id` once the grace period has passed, if it is still terminal then.
    pub fn schedule_removal(&self, id: String) {
        if self.tx.send(id).is_err() {
            tracing::debug!("Reaper stopped, removal not scheduled");
        }
    }
}

/// Removes stale records from the status store.
///
/// Two overlapping mechanisms:
/// - per-run removal `terminal_grace` after a run finishes, kept in a
///   [`DelayQueue`] keyed by fire time
/// - a periodic sweep of every record by age since submission
pub struct Reaper {
    store: Arc<StatusStore>,
    retention: RetentionConfig,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Reaper {
    pub fn new(store: Arc<StatusStore>, retention: RetentionConfig) -> (Self, ReaperHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                retention,
                rx,
            },
            ReaperHandle { tx },
        )
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut pending: DelayQueue<String> = DelayQueue::new();
        let period = self.retention.sweep_interval;
        let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(id) = self.rx.recv() => {
                    tracing::debug!(run_id = %id, "Scheduled status cleanup");
                    pending.insert(id, self.retention.terminal_grace);
                }
                Some(expired) = poll_fn(|cx| pending.poll_expired(cx)), if !pending.is_empty() => {
                    let id = expired.into_inner();
                    if self.store.remove_if_terminal(&id) {
                        tracing::info!(run_id = %id, "Cleaned up status");
                    } else {
                        tracing::debug!(run_id = %id, "Skipped cleanup, run gone or not terminal");
                    }
                }
                _ = sweep.tick() => {
                    sweep_stale(&self.store, &self.retention, Utc::now());
                }
            }
        }
        tracing::debug!(pending = pending.len(), "Reaper stopped");
    }
}

/// One pass of the global sweep. Returns how many records were removed.
pub fn sweep_stale(store: &StatusStore, retention: &RetentionConfig, now: DateTime<Utc>) -> usize {
    let terminal_ttl = to_chrono(retention.terminal_ttl);
    let hard_ttl = to_chrono(retention.hard_ttl);

    let removed = store.sweep(now, terminal_ttl, hard_ttl);
    for record in removed.iter().filter(|r| !r.is_terminal()) {
        tracing::warn!(
            run_id = %record.id,
            status = %record.status,
            "Cleaning up very old run"
        );
    }
    if !removed.is_empty() {
        tracing::info!(removed = removed.len(), "Cleaned up stale status entries");
    }
    removed.len()
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

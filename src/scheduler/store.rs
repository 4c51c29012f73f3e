use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SnowcastError};
use crate::scheduler::job::{JobParams, JobRecord, JobResult, JobStatus};

/// A record copied out together with the run counters, all read under one lock.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub record: JobRecord,
    pub active_runs: usize,
    pub max_runs: usize,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    next_id: u64,
    active_runs: usize,
}

/// Sole owner of run records, the id counter and the active-run counter.
///
/// Every operation takes the same exclusive lock, so readers never observe a
/// half-applied transition. Records leave the store only as copies.
#[derive(Debug)]
pub struct StatusStore {
    inner: Mutex<Inner>,
    max_runs: usize,
}

impl StatusStore {
    pub fn new(max_runs: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_runs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // All mutations are single assignments, so data behind a poisoned
        // lock is still consistent. Recovering keeps the drop guard in the
        // worker usable while a worker task is unwinding.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_runs(&self) -> usize {
        self.max_runs
    }

    /// Assign the next `run_<n>` id and insert a fresh queued record in one step.
    ///
    /// `queue_position` is evaluated while the lock is held.
    pub fn create(&self, params: JobParams, queue_position: impl FnOnce() -> usize) -> JobRecord {
        let mut inner = self.lock();
        let id = format!("run_{}", inner.next_id);
        inner.next_id += 1;
        let record = JobRecord::new(id.clone(), params, queue_position());
        inner.records.insert(id, record.clone());
        record
    }

    /// Insert a record under its own id, replacing nothing.
    pub fn insert(&self, record: JobRecord) -> Result<()> {
        let mut inner = self.lock();
        if inner.records.contains_key(&record.id) {
            return Err(SnowcastError::Internal(format!(
                "run {} already exists",
                record.id
            )));
        }
        inner.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<JobRecord> {
        self.lock()
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| SnowcastError::NotFound(id.to_string()))
    }

    /// Copy a record along with the current run counters.
    pub fn snapshot(&self, id: &str) -> Result<StatusSnapshot> {
        let inner = self.lock();
        let record = inner
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| SnowcastError::NotFound(id.to_string()))?;
        Ok(StatusSnapshot {
            record,
            active_runs: inner.active_runs,
            max_runs: self.max_runs,
        })
    }

    /// Apply `f` to a record while holding the lock.
    pub fn update<T>(&self, id: &str, f: impl FnOnce(&mut JobRecord) -> T) -> Result<T> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| SnowcastError::NotFound(id.to_string()))?;
        Ok(f(record))
    }

    /// Remove a record. Returns false if it was already gone.
    pub fn delete(&self, id: &str) -> bool {
        self.lock().records.remove(id).is_some()
    }

    pub fn count(&self, predicate: impl Fn(&JobRecord) -> bool) -> usize {
        self.lock().records.values().filter(|r| predicate(r)).count()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_runs(&self) -> usize {
        self.lock().active_runs
    }

    /// `Queued -> Processing`, counting the run as active.
    pub fn begin_processing(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| SnowcastError::NotFound(id.to_string()))?;
        record
            .start()
            .map_err(|e| SnowcastError::Internal(format!("{}: {}", id, e)))?;
        inner.active_runs += 1;
        Ok(())
    }

    /// `Processing -> Completed | Failed`. Returns the terminal status.
    pub fn finish(&self, id: &str, result: JobResult) -> Result<JobStatus> {
        self.update(id, |record| {
            record
                .finish(result)
                .map(|_| record.status)
                .map_err(|e| SnowcastError::Internal(format!("{}: {}", id, e)))
        })?
    }

    /// Give back an active-run slot taken by `begin_processing`.
    pub fn release_run(&self) {
        let mut inner = self.lock();
        inner.active_runs = inner.active_runs.saturating_sub(1);
    }

    /// Delete a record only if it is still terminal.
    pub fn remove_if_terminal(&self, id: &str) -> bool {
        let mut inner = self.lock();
        match inner.records.get(id) {
            Some(record) if record.is_terminal() => {
                inner.records.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Drop terminal records older than `terminal_ttl` and any record older
    /// than `hard_ttl`. Ages run from submission. Returns the removed records.
    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        terminal_ttl: Duration,
        hard_ttl: Duration,
    ) -> Vec<JobRecord> {
        let mut inner = self.lock();
        let stale: Vec<String> = inner
            .records
            .values()
            .filter(|record| {
                let age = now - record.submitted_at;
                (record.is_terminal() && age > terminal_ttl) || age > hard_ttl
            })
            .map(|record| record.id.clone())
            .collect();

        stale
            .iter()
            .filter_map(|id| inner.records.remove(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::ArtifactLocation;

    fn params() -> JobParams {
        JobParams::parse("ontario", "2024-02-01 12:00").unwrap()
    }

    #[test]
    fn create_assigns_increasing_ids() {
        let store = StatusStore::new(1);
        let a = store.create(params(), || 0);
        let b = store.create(params(), || 1);
        assert_eq!(a.id, "run_0");
        assert_eq!(b.id, "run_1");
        assert_eq!(b.queue_position, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn get_returns_copy() {
        let store = StatusStore::new(1);
        let id = store.create(params(), || 0).id;

        let mut copy = store.get(&id).unwrap();
        copy.status = JobStatus::Completed;

        assert_eq!(store.get(&id).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = StatusStore::new(1);
        assert!(matches!(
            store.get("run_99"),
            Err(SnowcastError::NotFound(id)) if id == "run_99"
        ));
    }

    #[test]
    fn insert_refuses_duplicate_ids() {
        let store = StatusStore::new(1);
        let record = JobRecord::new("run_5".to_string(), params(), 0);
        store.insert(record.clone()).unwrap();
        assert!(store.insert(record).is_err());
    }

    #[test]
    fn processing_tracks_active_runs() {
        let store = StatusStore::new(2);
        let id = store.create(params(), || 0).id;

        store.begin_processing(&id).unwrap();
        assert_eq!(store.active_runs(), 1);
        assert_eq!(store.count(|r| r.status == JobStatus::Processing), 1);

        // A second start is rejected and does not bump the counter
        assert!(store.begin_processing(&id).is_err());
        assert_eq!(store.active_runs(), 1);

        let status = store
            .finish(&id, JobResult::Completed(ArtifactLocation::for_folder("x")))
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
        store.release_run();
        assert_eq!(store.active_runs(), 0);

        store.release_run();
        assert_eq!(store.active_runs(), 0);
    }

    #[test]
    fn snapshot_carries_counters() {
        let store = StatusStore::new(3);
        let id = store.create(params(), || 4).id;
        store.begin_processing(&id).unwrap();

        let snap = store.snapshot(&id).unwrap();
        assert_eq!(snap.record.status, JobStatus::Processing);
        assert_eq!(snap.record.queue_position, 4);
        assert_eq!(snap.active_runs, 1);
        assert_eq!(snap.max_runs, 3);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = StatusStore::new(1);
        let id = store.create(params(), || 0).id;
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn remove_if_terminal_keeps_live_runs() {
        let store = StatusStore::new(1);
        let id = store.create(params(), || 0).id;
        assert!(!store.remove_if_terminal(&id));

        store.begin_processing(&id).unwrap();
        assert!(!store.remove_if_terminal(&id));

        store
            .finish(
                &id,
                JobResult::Failed {
                    message: "boom".to_string(),
                },
            )
            .unwrap();
        assert!(store.remove_if_terminal(&id));
        assert!(!store.remove_if_terminal(&id));
    }

    #[test]
    fn sweep_applies_both_thresholds() {
        let store = StatusStore::new(1);
        let now = Utc::now();
        let day = Duration::hours(24);
        let three_days = Duration::hours(72);

        let mut old_done = JobRecord::with_submitted_at(
            "old_done".to_string(),
            params(),
            0,
            now - Duration::hours(25),
        );
        old_done.start().unwrap();
        old_done
            .finish(JobResult::Failed {
                message: "x".to_string(),
            })
            .unwrap();
        store.insert(old_done).unwrap();

        let mut old_stuck = JobRecord::with_submitted_at(
            "old_stuck".to_string(),
            params(),
            0,
            now - Duration::hours(73),
        );
        old_stuck.start().unwrap();
        store.insert(old_stuck).unwrap();

        let mut day_old_running = JobRecord::with_submitted_at(
            "day_old_running".to_string(),
            params(),
            0,
            now - Duration::hours(30),
        );
        day_old_running.start().unwrap();
        store.insert(day_old_running).unwrap();

        store.create(params(), || 0);

        let mut removed: Vec<String> = store
            .sweep(now, day, three_days)
            .into_iter()
            .map(|r| r.id)
            .collect();
        removed.sort();
        assert_eq!(removed, vec!["old_done", "old_stuck"]);
        assert_eq!(store.len(), 2);

        // Nothing new, nothing more to remove
        assert!(store.sweep(now, day, three_days).is_empty());
    }
}

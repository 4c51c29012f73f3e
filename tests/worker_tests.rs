
use std::sync::Arc;
use std::time::Duration;

use snowcast::error::{ExecutionError, RemoteError};
use snowcast::scheduler::{JobResult, JobStatus, RunStatus};
use snowcast::service::Service;
use snowcast::worker::{INTERNAL_ERROR_MESSAGE, REMOTE_ERROR_MESSAGE};
use test_harness::{
    date_at, no_denylist, test_config, test_service, ticks_during, wait_terminal, wait_until,
    GatedUnit, Outcome, PanickingLayout, PlainLayout, ScriptedUnit, SlowLayout,
};

const WAIT: Duration = Duration::from_secs(5);

/// Three runs with one worker: queued behind each other and started in
/// submission order.
#[tokio::test]
async fn test_runs_start_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let unit = Arc::new(GatedUnit::new());
    let service = test_service(
        1,
        dir.path(),
        unit.clone(),
        Arc::new(PlainLayout::new(dir.path())),
    );

    // Submitted before the worker exists so positions are deterministic
    let receipts: Vec<_> = (6..9)
        .map(|h| service.admission().submit("erie", &date_at(h)).unwrap())
        .collect();
    assert_eq!(receipts[1].queue_position, 1);
    assert_eq!(receipts[2].queue_position, 2);

    service.start();
    let store = service.store().clone();

    assert!(wait_until(WAIT, || unit.running() == 1).await);
    assert_eq!(store.get(&receipts[0].id).unwrap().status, JobStatus::Processing);
    assert_eq!(store.get(&receipts[1].id).unwrap().status, JobStatus::Queued);
    assert_eq!(store.get(&receipts[2].id).unwrap().status, JobStatus::Queued);

    unit.release(1);
    assert_eq!(wait_terminal(&store, &receipts[0].id, WAIT).await, JobStatus::Completed);
    assert!(wait_until(WAIT, || unit.started().len() == 2).await);
    assert_eq!(store.get(&receipts[1].id).unwrap().status, JobStatus::Processing);
    assert_eq!(store.get(&receipts[2].id).unwrap().status, JobStatus::Queued);

    unit.release(2);
    assert_eq!(wait_terminal(&store, &receipts[2].id, WAIT).await, JobStatus::Completed);

    assert_eq!(
        unit.started(),
        vec!["20240115_06e", "20240115_07e", "20240115_08e"]
    );
    assert_eq!(unit.peak(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn test_processing_never_exceeds_worker_count() {
    let dir = tempfile::tempdir().unwrap();
    let unit = Arc::new(GatedUnit::new());
    let service = test_service(
        2,
        dir.path(),
        unit.clone(),
        Arc::new(PlainLayout::new(dir.path())),
    );
    service.start();
    let store = service.store().clone();

    let ids: Vec<String> = (0..6)
        .map(|h| service.admission().submit("ontario", &date_at(h)).unwrap().id)
        .collect();

    assert!(wait_until(WAIT, || unit.running() == 2).await);
    for _ in 0..6 {
        let processing = store.count(|r| r.status == JobStatus::Processing);
        assert!(processing <= 2, "{} runs processing", processing);
        assert!(store.active_runs() <= 2);
        unit.release(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for id in &ids {
        assert_eq!(wait_terminal(&store, id, WAIT).await, JobStatus::Completed);
    }
    assert_eq!(unit.peak(), 2);
    assert!(wait_until(WAIT, || store.active_runs() == 0).await);
    service.shutdown().await;
}

#[tokio::test]
async fn test_completed_run_reports_artifact_location() {
    let dir = tempfile::tempdir().unwrap();
    let service = test_service(
        1,
        dir.path(),
        Arc::new(ScriptedUnit::new(Outcome::Succeed)),
        Arc::new(PlainLayout::new(dir.path())),
    );
    service.start();

    let id = service.admission().submit("superior", &date_at(12)).unwrap().id;
    wait_terminal(service.store(), &id, WAIT).await;

    match service.admission().status(&id).unwrap() {
        RunStatus::Finished { status, result, .. } => {
            assert_eq!(status, JobStatus::Completed);
            match result {
                JobResult::Completed(location) => {
                    assert_eq!(location.folder_name, "20240115_12s");
                    assert_eq!(location.data_path, "data/20240115_12s/");
                }
                other => panic!("expected artifact, got {:?}", other),
            }
        }
        other => panic!("expected finished, got {:?}", other),
    }
    service.shutdown().await;
}

#[tokio::test]
async fn test_validation_failure_message_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let message = "The requested date (2024-01-15 06:00 UTC) has missing data for erie and cannot be processed.";
    let service = test_service(
        1,
        dir.path(),
        Arc::new(ScriptedUnit::new(Outcome::Validation(message.to_string()))),
        Arc::new(PlainLayout::new(dir.path())),
    );
    service.start();

    let id = service.admission().submit("erie", &date_at(6)).unwrap().id;
    assert_eq!(wait_terminal(service.store(), &id, WAIT).await, JobStatus::Failed);

    let record = service.store().get(&id).unwrap();
    assert_eq!(
        record.result,
        Some(JobResult::Failed {
            message: message.to_string()
        })
    );
    service.shutdown().await;
}

#[tokio::test]
async fn test_internal_failure_gets_generic_message() {
    let dir = tempfile::tempdir().unwrap();
    let service = test_service(
        1,
        dir.path(),
        Arc::new(ScriptedUnit::new(Outcome::Internal(
            "NetCDF: HDF error at /srv/model/weights.pt".to_string(),
        ))),
        Arc::new(PlainLayout::new(dir.path())),
    );
    service.start();

    let id = service.admission().submit("erie", &date_at(6)).unwrap().id;
    assert_eq!(wait_terminal(service.store(), &id, WAIT).await, JobStatus::Failed);

    match service.store().get(&id).unwrap().result {
        Some(JobResult::Failed { message }) => {
            assert_eq!(message, INTERNAL_ERROR_MESSAGE);
            assert!(!message.contains("weights.pt"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    service.shutdown().await;
}

#[tokio::test]
async fn test_panicking_unit_does_not_kill_worker() {
    let dir = tempfile::tempdir().unwrap();
    let unit = Arc::new(ScriptedUnit::new(Outcome::Panic));
    let service = test_service(
        1,
        dir.path(),
        unit.clone(),
        Arc::new(PlainLayout::new(dir.path())),
    );
    let pool = service.start();

    let first = service.admission().submit("erie", &date_at(6)).unwrap().id;
    let second = service.admission().submit("erie", &date_at(7)).unwrap().id;

    assert_eq!(wait_terminal(service.store(), &first, WAIT).await, JobStatus::Failed);
    assert_eq!(wait_terminal(service.store(), &second, WAIT).await, JobStatus::Failed);
    assert_eq!(unit.calls(), 2);

    match service.store().get(&first).unwrap().result {
        Some(JobResult::Failed { message }) => assert_eq!(message, INTERNAL_ERROR_MESSAGE),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(pool.live_workers(), 1);
    assert_eq!(pool.restarts(), 0);
    assert!(wait_until(WAIT, || service.store().active_runs() == 0).await);
    // Both panicked runs were acknowledged
    assert!(wait_until(WAIT, || service.queue().unfinished() == 0).await);
    service.shutdown().await;
}

/// A worker killed outside the per-run boundary is replaced and the queue
/// keeps draining; its run stays in `processing`.
#[tokio::test]
async fn test_supervisor_replaces_dead_worker() {
    let dir = tempfile::tempdir().unwrap();
    let service = test_service(
        1,
        dir.path(),
        Arc::new(ScriptedUnit::new(Outcome::Succeed)),
        Arc::new(PanickingLayout::new(dir.path(), 1)),
    );
    let pool = service.start();

    let lost = service.admission().submit("michigan", &date_at(6)).unwrap().id;
    assert!(wait_until(WAIT, || pool.restarts() == 1).await);

    let next = service.admission().submit("michigan", &date_at(7)).unwrap().id;
    assert_eq!(wait_terminal(service.store(), &next, WAIT).await, JobStatus::Completed);

    assert_eq!(service.store().get(&lost).unwrap().status, JobStatus::Processing);
    assert_eq!(pool.live_workers(), 1);
    // The slot held by the lost run was given back while unwinding
    assert!(wait_until(WAIT, || service.store().active_runs() == 0).await);
    assert!(wait_until(WAIT, || service.queue().unfinished() == 0).await);
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_detects_dead_worker_within_one_interval() {
    let dir = tempfile::tempdir().unwrap();
    let interval = Duration::from_secs(60);
    let config = test_config(1, dir.path()).with_supervisor_interval(interval);
    let service = Service::new(
        config,
        Arc::new(ScriptedUnit::new(Outcome::Succeed)),
        Arc::new(PanickingLayout::new(dir.path(), 1)),
        Arc::new(no_denylist()),
    );
    let pool = service.start();

    service.admission().submit("huron", &date_at(6)).unwrap();
    assert!(wait_until(WAIT, || pool.live_workers() == 0).await);
    let died = tokio::time::Instant::now();

    tokio::time::sleep_until(died + interval + Duration::from_millis(1)).await;
    assert_eq!(pool.restarts(), 1);
    assert_eq!(pool.live_workers(), 1);

    let next = service.admission().submit("huron", &date_at(7)).unwrap().id;
    assert_eq!(wait_terminal(service.store(), &next, WAIT).await, JobStatus::Completed);
    service.shutdown().await;
}

#[tokio::test]
async fn test_output_layout_runs_off_the_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let service = test_service(
        1,
        dir.path(),
        Arc::new(ScriptedUnit::new(Outcome::Succeed)),
        Arc::new(SlowLayout::new(dir.path(), Duration::from_millis(200))),
    );
    service.start();

    let id = service.admission().submit("erie", &date_at(6)).unwrap().id;
    let (status, ticks) = ticks_during(wait_terminal(service.store(), &id, WAIT)).await;

    assert_eq!(status, JobStatus::Completed);
    assert!(ticks >= 5, "runtime starved while resolving output: {} ticks", ticks);
    service.shutdown().await;
}

#[tokio::test]
async fn test_check_workers_is_noop_when_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let service = test_service(
        3,
        dir.path(),
        Arc::new(ScriptedUnit::new(Outcome::Succeed)),
        Arc::new(PlainLayout::new(dir.path())),
    );
    let pool = service.start();

    assert_eq!(pool.size(), 3);
    assert_eq!(pool.check_workers(), 0);
    assert_eq!(pool.live_workers(), 3);
    service.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let dir = tempfile::tempdir().unwrap();
    let service = test_service(
        2,
        dir.path(),
        Arc::new(ScriptedUnit::new(Outcome::Succeed)),
        Arc::new(PlainLayout::new(dir.path())),
    );
    let pool = service.start();
    assert_eq!(pool.live_workers(), 2);

    test_harness::within(WAIT, service.shutdown()).await;
    assert_eq!(pool.size(), 0);

    // Submissions after shutdown stay queued
    let id = service.admission().submit("erie", &date_at(6)).unwrap().id;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.store().get(&id).unwrap().status, JobStatus::Queued);
    assert_eq!(service.queue().unfinished(), 1);
}

#[test]
fn test_remote_errors_have_a_public_summary() {
    let err = ExecutionError::from(RemoteError::Exhausted {
        attempts: 3,
        last: Box::new(RemoteError::Status(502)),
    });
    assert!(matches!(err, ExecutionError::Remote(_)));
    assert!(!REMOTE_ERROR_MESSAGE.contains("502"));
    assert!(!REMOTE_ERROR_MESSAGE.is_empty());
}

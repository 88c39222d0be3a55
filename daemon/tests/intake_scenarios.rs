//! Queue, command and recovery behavior: admission, the duplicate-job
//! guard, cancellation commands, crash recovery and status snapshots.

mod support;

use std::{sync::Arc, time::Duration};
use support::{job_of, standalone_job, wait_until, Harness};
use upgrade_daemon::{
    common::file,
    device_api::mock::{MockFleet, MockState},
    intake::{commands::CommandIntake, jobs::{self, JobIntake}},
    job::{JobErrorSidecar, JobState, JobType},
    status::{device::UpgradeStatus, writer::StatusWriter, DaemonStatus, WorkersDoc},
    workers::WorkerPool,
};

const SERIAL: &str = "001234567890";
const OTHER: &str = "001234567891";

fn count_files(dir: &std::path::Path) -> usize {
    file::scan_json_files(dir).map(|v| v.len()).unwrap_or(0)
}

#[tokio::test]
async fn pending_job_is_admitted_and_runs_to_completion() {
    let harness = Harness::new();
    harness.write_inventory(&[SERIAL]);
    harness.write_paths(&[("10.5.1", &["11.1.0"])]);

    let fleet = MockFleet::new();
    let device = fleet.insert(MockState::new(SERIAL, "10.5.1"));
    let ctx = harness.ctx(fleet);
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 2, 8));
    let intake = JobIntake::new(Arc::clone(&ctx), Arc::clone(&pool));

    ctx.queue.submit(&standalone_job("j1", SERIAL)).unwrap();
    intake.scan_once().unwrap();

    assert_eq!(count_files(&ctx.queue.dir(JobState::Pending)), 0);
    let done = wait_until(
        || count_files(&ctx.queue.dir(JobState::Completed)) == 1,
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "job did not reach completed/");

    assert_eq!(device.lock().unwrap().version, "11.1.0");
    assert_eq!(ctx.registry.counters().completed, 1);
    assert_eq!(ctx.registry.counters().active, 0);

    ctx.shutdown().cancel();
}

#[tokio::test]
async fn duplicate_device_is_rejected_with_blocking_job_sidecar() {
    let harness = Harness::new();
    harness.write_inventory(&[SERIAL]);
    harness.write_paths(&[("10.5.1", &["11.1.0"])]);

    let fleet = MockFleet::new();
    fleet.insert(MockState::new(SERIAL, "10.5.1"));
    let ctx = harness.ctx(fleet);
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 1, 8));
    let intake = JobIntake::new(Arc::clone(&ctx), Arc::clone(&pool));

    // j1 already owns the device in active/; j2 must bounce.
    let j1 = standalone_job("j1", SERIAL);
    file::write_json_atomic(&ctx.queue.file(JobState::Active, "j1"), &j1).unwrap();
    ctx.queue.submit(&standalone_job("j2", SERIAL)).unwrap();

    intake.scan_once().unwrap();

    assert_eq!(count_files(&ctx.queue.dir(JobState::Pending)), 0);
    let sidecar: JobErrorSidecar = file::read_json_opt(
        &ctx.queue.dir(JobState::Failed).join("j2.error.json"),
    )
    .unwrap()
    .expect("error sidecar present");
    assert_eq!(sidecar.blocking_job_id.as_deref(), Some("j1"));
    assert_eq!(sidecar.blocking_state.as_deref(), Some("active_job"));
    assert!(ctx
        .queue
        .file(JobState::Failed, "j2")
        .exists());

    ctx.shutdown().cancel();
}

#[tokio::test]
async fn conflicting_family_is_rejected() {
    let harness = Harness::new();
    harness.write_inventory(&[SERIAL]);
    harness.write_paths(&[("10.5.1", &["11.1.0"])]);

    let fleet = MockFleet::new();
    fleet.insert(MockState::new(SERIAL, "10.5.1"));
    let ctx = harness.ctx(fleet);
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 1, 8));
    let intake = JobIntake::new(Arc::clone(&ctx), Arc::clone(&pool));

    let blocker = job_of("j1", JobType::DownloadOnly, &[SERIAL]);
    file::write_json_atomic(&ctx.queue.file(JobState::Active, "j1"), &blocker).unwrap();
    ctx.queue.submit(&standalone_job("j2", SERIAL)).unwrap();

    intake.scan_once().unwrap();

    let sidecar: JobErrorSidecar = file::read_json_opt(
        &ctx.queue.dir(JobState::Failed).join("j2.error.json"),
    )
    .unwrap()
    .expect("error sidecar present");
    assert!(sidecar.error.contains("download_only"));

    ctx.shutdown().cancel();
}

#[tokio::test]
async fn unparseable_descriptor_moves_to_failed_with_sidecar() {
    let harness = Harness::new();
    harness.write_inventory(&[SERIAL]);
    harness.write_paths(&[]);

    let fleet = MockFleet::new();
    let ctx = harness.ctx(fleet);
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 1, 8));
    let intake = JobIntake::new(Arc::clone(&ctx), Arc::clone(&pool));

    std::fs::write(
        ctx.queue.dir(JobState::Pending).join("broken.json"),
        b"{ not json",
    )
    .unwrap();
    intake.scan_once().unwrap();

    assert_eq!(count_files(&ctx.queue.dir(JobState::Pending)), 0);
    assert!(ctx
        .queue
        .dir(JobState::Failed)
        .join("broken.json")
        .exists());
    let sidecar: JobErrorSidecar = file::read_json_opt(
        &ctx.queue.dir(JobState::Failed).join("broken.error.json"),
    )
    .unwrap()
    .expect("error sidecar present");
    assert_eq!(sidecar.job_id, "broken");

    ctx.shutdown().cancel();
}

#[tokio::test]
async fn unknown_serial_fails_validation() {
    let harness = Harness::new();
    harness.write_inventory(&[SERIAL]);
    harness.write_paths(&[("10.5.1", &["11.1.0"])]);

    let fleet = MockFleet::new();
    let ctx = harness.ctx(fleet);
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 1, 8));
    let intake = JobIntake::new(Arc::clone(&ctx), Arc::clone(&pool));

    ctx.queue
        .submit(&standalone_job("j1", "not-in-inventory"))
        .unwrap();
    intake.scan_once().unwrap();

    assert!(ctx.queue.file(JobState::Failed, "j1").exists());
    ctx.shutdown().cancel();
}

#[tokio::test]
async fn full_worker_queue_returns_job_to_pending() {
    let harness = Harness::new();
    harness.write_inventory(&[SERIAL, OTHER, "001234567892"]);
    harness.write_paths(&[("10.5.1", &["11.1.0"])]);

    let fleet = MockFleet::new();
    let mut holding = MockState::new(SERIAL, "10.5.1");
    holding.hold_downloads = true;
    fleet.insert(holding);
    let mut holding_b = MockState::new(OTHER, "10.5.1");
    holding_b.hold_downloads = true;
    fleet.insert(holding_b);
    fleet.insert(MockState::new("001234567892", "10.5.1"));
    let ctx = harness.ctx(fleet);

    // One worker, queue depth one.
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 1, 1));
    let intake = JobIntake::new(Arc::clone(&ctx), Arc::clone(&pool));

    // First job occupies the worker.
    ctx.queue.submit(&standalone_job("j1", SERIAL)).unwrap();
    intake.scan_once().unwrap();
    let busy = wait_until(
        || {
            ctx.statuses
                .load(SERIAL)
                .ok()
                .flatten()
                .map(|s| s.upgrade_status == UpgradeStatus::Downloading)
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(busy, "first job never reached its download hold");

    // Second fills the queue slot, third must bounce back to pending.
    ctx.queue.submit(&standalone_job("j2", OTHER)).unwrap();
    ctx.queue
        .submit(&standalone_job("j3", "001234567892"))
        .unwrap();
    intake.scan_once().unwrap();

    assert!(ctx.queue.file(JobState::Active, "j2").exists());
    assert!(ctx.queue.file(JobState::Pending, "j3").exists());
    assert!(!ctx.registry.is_job_active("j3"));

    ctx.shutdown().cancel();
}

#[tokio::test]
async fn s7_cancel_command_moves_job_to_cancelled() {
    let harness = Harness::new();
    harness.write_inventory(&[SERIAL]);
    harness.write_paths(&[("10.5.1", &["11.1.0"])]);

    let fleet = MockFleet::new();
    let mut state = MockState::new(SERIAL, "10.5.1");
    state.hold_downloads = true;
    fleet.insert(state);
    let ctx = harness.ctx(fleet);
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 1, 8));
    let intake = JobIntake::new(Arc::clone(&ctx), Arc::clone(&pool));
    let commands = CommandIntake::new(Arc::clone(&ctx));

    ctx.queue.submit(&standalone_job("j1", SERIAL)).unwrap();
    intake.scan_once().unwrap();
    let held = wait_until(
        || {
            ctx.statuses
                .load(SERIAL)
                .ok()
                .flatten()
                .map(|s| s.upgrade_status == UpgradeStatus::Downloading)
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(held);

    let command = serde_json::json!({
        "command": "cancel_upgrade",
        "target": "job",
        "job_id": "j1",
        "device_serial": "",
        "reason": "maintenance window closed",
        "timestamp": "2026-07-01T10:00:00Z"
    });
    let incoming = ctx.workdir.commands_incoming().join("cancel-1.json");
    file::write_json_atomic(&incoming, &command).unwrap();

    commands.scan_once().unwrap();

    // Consumed exactly once: gone from incoming, present in processed.
    assert!(!incoming.exists());
    assert!(ctx.workdir.commands_processed().join("cancel-1.json").exists());

    let cancelled = wait_until(
        || count_files(&ctx.queue.dir(JobState::Cancelled)) == 1,
        Duration::from_secs(5),
    )
    .await;
    assert!(cancelled, "job did not reach cancelled/");

    let status = ctx.statuses.load(SERIAL).unwrap().unwrap();
    assert_eq!(status.upgrade_status, UpgradeStatus::Cancelled);
    assert_eq!(status.current_phase, "downloading");
    assert_eq!(ctx.registry.counters().cancelled, 1);

    ctx.shutdown().cancel();
}

#[tokio::test]
async fn command_for_inactive_job_is_a_noop_note() {
    let harness = Harness::new();
    harness.write_inventory(&[]);
    harness.write_paths(&[]);

    let fleet = MockFleet::new();
    let ctx = harness.ctx(fleet);
    let commands = CommandIntake::new(Arc::clone(&ctx));

    let command = serde_json::json!({
        "command": "cancel_upgrade",
        "target": "job",
        "job_id": "ghost",
        "device_serial": "",
        "reason": "",
        "timestamp": "2026-07-01T10:00:00Z"
    });
    file::write_json_atomic(
        &ctx.workdir.commands_incoming().join("cancel-9.json"),
        &command,
    )
    .unwrap();

    commands.scan_once().unwrap();

    let result: serde_json::Value = file::read_json_opt(
        &ctx.workdir
            .commands_processed()
            .join("cancel-9.json.result.json"),
    )
    .unwrap()
    .expect("result note present");
    assert!(result["note"].as_str().unwrap_or("").contains("no-op"));
}

#[tokio::test]
async fn recovery_resubmits_active_jobs_idempotently() {
    let harness = Harness::new();
    harness.write_inventory(&[SERIAL]);
    harness.write_paths(&[("10.5.1", &["11.1.0"])]);

    let fleet = MockFleet::new();
    let device = fleet.insert(MockState::new(SERIAL, "10.5.1"));
    let ctx = harness.ctx(fleet);
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 1, 8));

    // The daemon died after admission: the descriptor sits in active/.
    let job = standalone_job("j1", SERIAL);
    file::write_json_atomic(&ctx.queue.file(JobState::Active, "j1"), &job).unwrap();

    jobs::recover_active(&ctx, &pool).await.unwrap();

    let done = wait_until(
        || count_files(&ctx.queue.dir(JobState::Completed)) == 1,
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "recovered job did not complete");
    assert_eq!(device.lock().unwrap().version, "11.1.0");

    ctx.shutdown().cancel();
}

#[tokio::test]
async fn worker_failure_does_not_poison_the_pool() {
    let harness = Harness::new();
    // In the inventory, but the appliance does not answer: connect fails.
    harness.write_inventory(&[SERIAL, OTHER]);
    harness.write_paths(&[("10.5.1", &["11.1.0"])]);

    let fleet = MockFleet::new();
    fleet.insert(MockState::new(OTHER, "10.5.1"));
    let ctx = harness.ctx(fleet);
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 1, 8));
    let intake = JobIntake::new(Arc::clone(&ctx), Arc::clone(&pool));

    ctx.queue.submit(&standalone_job("j1", SERIAL)).unwrap();
    intake.scan_once().unwrap();
    let failed = wait_until(
        || count_files(&ctx.queue.dir(JobState::Failed)) == 1,
        Duration::from_secs(5),
    )
    .await;
    assert!(failed, "broken job did not fail");

    // The same worker then serves a healthy job.
    ctx.queue.submit(&standalone_job("j2", OTHER)).unwrap();
    intake.scan_once().unwrap();
    let done = wait_until(
        || count_files(&ctx.queue.dir(JobState::Completed)) == 1,
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "healthy job did not complete after a failure");

    ctx.shutdown().cancel();
}

#[tokio::test]
async fn status_writer_publishes_wellformed_snapshots() {
    let harness = Harness::new();
    harness.write_inventory(&[SERIAL]);
    harness.write_paths(&[]);

    let fleet = MockFleet::new();
    let ctx = harness.ctx(fleet);
    let pool = Arc::new(WorkerPool::start(Arc::clone(&ctx), 3, 8));
    let writer = StatusWriter::new(Arc::clone(&ctx), pool.statuses());

    ctx.queue.submit(&standalone_job("j1", SERIAL)).unwrap();
    writer.write_once(true).unwrap();

    let daemon: DaemonStatus = file::read_json_opt(&ctx.workdir.daemon_status_file())
        .unwrap()
        .expect("daemon.json present");
    assert!(daemon.running);
    assert_eq!(daemon.workers, 3);
    assert_eq!(daemon.pending_jobs, 1);
    assert_eq!(daemon.pid, std::process::id());

    let workers: WorkersDoc = file::read_json_opt(&ctx.workdir.workers_status_file())
        .unwrap()
        .expect("workers.json present");
    assert_eq!(workers.workers.len(), 3);

    ctx.shutdown().cancel();
}

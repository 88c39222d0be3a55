//! Job execution: fans a job out to its device workflow(s), reduces the
//! outcomes to a terminal job state, and retires the descriptor into its
//! terminal queue directory.

use crate::{
    daemon::DaemonContext,
    device_api::HaState,
    job::{Job, JobState},
    upgrade::engine::DeviceOutcome,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The per-device state machine.
pub mod engine;

/// HA-pair sequencing.
pub mod ha;

/// Execute one job to its terminal state and retire its descriptor.
/// Called by a pool worker; never propagates errors upward.
pub async fn run_job(ctx: &DaemonContext, job: Job, cancel: CancellationToken) -> JobState {
    info!(
        job.id = %job.job_id,
        job.r#type = %job.job_type,
        devices = ?job.devices,
        dry_run = job.dry_run,
        "Job started"
    );

    let outcome = if job.job_type.is_ha() {
        let pair = ha::run_pair(ctx, &job, &cancel).await;
        if pair.is_success() {
            JobState::Completed
        } else if pair.was_cancelled() {
            JobState::Cancelled
        } else {
            JobState::Failed
        }
    } else {
        let serial = job.devices[0].clone();
        let role = ctx
            .inventory
            .lookup(&serial)
            .map(|device| device.ha_state)
            .filter(|state| *state != HaState::Unknown);
        match engine::run_device(ctx, &job, &serial, role, &cancel).await {
            outcome if outcome.is_success() => JobState::Completed,
            DeviceOutcome::Cancelled => JobState::Cancelled,
            _ => JobState::Failed,
        }
    };

    retire(ctx, &job, outcome);
    outcome
}

/// Move the descriptor out of `active/` and settle the registry.
fn retire(ctx: &DaemonContext, job: &Job, outcome: JobState) {
    if let Err(error) = ctx.queue.transition(&job.job_id, JobState::Active, outcome) {
        warn!(
            job.id = %job.job_id,
            %error,
            "Failed to retire job descriptor"
        );
    }
    ctx.registry.complete_job(&job.job_id, outcome);
    info!(job.id = %job.job_id, outcome = %outcome, "Job finished");
}

/// Retire a job that never ran because its worker panicked.
pub fn retire_failed(ctx: &DaemonContext, job: &Job) {
    retire(ctx, job, JobState::Failed);
}

//! Job Intake: scans `queue/pending/` oldest-first, validates each
//! descriptor against the inventory and the duplicate-job guard, renames
//! it into `active/` and submits it to the worker pool. A full pool puts
//! the descriptor back for the next scan; nothing is lost.

use crate::{
    common::{
        error::{ConflictingJobType, DuplicateJob, Error, InvalidJob, Result},
        file,
    },
    daemon::DaemonContext,
    job::{Job, JobErrorSidecar, JobState},
    status::now_rfc3339,
    workers::{WorkItem, WorkerPool},
};
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{info, warn};

pub struct JobIntake {
    ctx: Arc<DaemonContext>,
    pool: Arc<WorkerPool>,
}

impl JobIntake {
    pub fn new(ctx: Arc<DaemonContext>, pool: Arc<WorkerPool>) -> Self {
        Self { ctx, pool }
    }

    /// Scan until the daemon shuts down.
    pub async fn run(self, interval: Duration) {
        let shutdown = self.ctx.shutdown();
        loop {
            if let Err(error) = self.scan_once() {
                warn!(%error, "Pending-queue scan failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One pass over `queue/pending/`, in mtime order.
    pub fn scan_once(&self) -> Result<()> {
        for path in file::scan_json_files(&self.ctx.queue.dir(JobState::Pending))? {
            match file::read_json_opt::<Job>(&path) {
                Ok(Some(job)) => {
                    if let Err(error) = self.admit(&path, job) {
                        if matches!(error, Error::QueueFull) {
                            // Back off until workers drain; the descriptor
                            // stays (or is put back) in pending.
                            break;
                        }
                        return Err(error);
                    }
                }
                Ok(None) => {} // raced with another scan; nothing to do
                Err(parse_error) => self.reject_unparseable(&path, &parse_error),
            }
        }
        Ok(())
    }

    /// Validate, move to `active/`, register and submit one job.
    fn admit(&self, path: &Path, job: Job) -> Result<()> {
        if let Err(error) = self.validate(path, &job) {
            self.reject(path, &job, &error);
            return Ok(());
        }

        self.ctx
            .queue
            .transition(&job.job_id, JobState::Pending, JobState::Active)?;
        let cancel = self.ctx.registry.register_job(&job.job_id, &job.devices);
        info!(job.id = %job.job_id, "Job admitted");

        let item = WorkItem {
            job: job.clone(),
            cancel,
        };
        if self.pool.try_submit(item).is_err() {
            // Undo the admission so the next scan retries.
            self.ctx
                .registry
                .complete_job(&job.job_id, JobState::Pending);
            self.ctx
                .queue
                .transition(&job.job_id, JobState::Active, JobState::Pending)?;
            info!(job.id = %job.job_id, "Worker queue full; job returned to pending");
            return Err(Error::QueueFull);
        }
        Ok(())
    }

    fn validate(&self, path: &Path, job: &Job) -> Result<()> {
        let stem = path.file_stem().and_then(|stem| stem.to_str());
        if stem != Some(job.job_id.as_str()) {
            return InvalidJob {
                path,
                reason: format!(
                    "file name does not match job_id {}; descriptors must be named {{job_id}}.json",
                    job.job_id
                ),
            }
            .fail();
        }

        let expected = job.job_type.expected_device_count();
        if job.devices.is_empty() || job.devices.len() != expected {
            return InvalidJob {
                path,
                reason: format!(
                    "type {} requires {} device(s), got {}",
                    job.job_type,
                    expected,
                    job.devices.len()
                ),
            }
            .fail();
        }
        for serial in &job.devices {
            self.ctx.inventory.require(serial)?;
        }
        guard_duplicates(job, &self.ctx.queue.open_jobs()?)
    }

    /// Move an invalid descriptor to `failed/` with a structured sidecar.
    fn reject(&self, path: &Path, job: &Job, error: &Error) {
        warn!(job.id = %job.job_id, %error, "Job rejected");
        let (blocking_job_id, blocking_state) = match error {
            Error::DuplicateJob {
                blocking_job_id,
                blocking_state,
                ..
            }
            | Error::ConflictingJobType {
                blocking_job_id,
                blocking_state,
                ..
            } => (
                Some(blocking_job_id.clone()),
                Some(blocking_state.clone()),
            ),
            _ => (None, None),
        };
        let sidecar = JobErrorSidecar {
            job_id: job.job_id.clone(),
            error: error.to_string(),
            blocking_job_id,
            blocking_state,
            timestamp: now_rfc3339(),
        };
        let _ = self.ctx.queue.write_error_sidecar(&sidecar);
        self.move_to_failed(path);
    }

    fn reject_unparseable(&self, path: &Path, error: &Error) {
        warn!(path = %path.display(), %error, "Unparseable job descriptor");
        let job_id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("unknown")
            .to_string();
        let sidecar = JobErrorSidecar {
            job_id,
            error: error.to_string(),
            blocking_job_id: None,
            blocking_state: None,
            timestamp: now_rfc3339(),
        };
        let _ = self.ctx.queue.write_error_sidecar(&sidecar);
        self.move_to_failed(path);
    }

    fn move_to_failed(&self, path: &Path) {
        if let Some(name) = path.file_name() {
            let target = self.ctx.queue.dir(JobState::Failed).join(name);
            if let Err(error) = file::move_file(path, &target) {
                warn!(path = %path.display(), %error, "Failed to move descriptor to failed/");
            }
        }
    }
}

/// The Duplicate-Job Guard: a serial may sit in at most one open job, and
/// download-only and full-upgrade jobs never mix on one device.
pub fn guard_duplicates(job: &Job, open_jobs: &[(JobState, Job)]) -> Result<()> {
    for (state, other) in open_jobs {
        if other.job_id == job.job_id {
            continue;
        }
        let overlap = job
            .devices
            .iter()
            .find(|serial| other.devices.contains(serial));
        let Some(serial) = overlap else {
            continue;
        };

        let blocking_state = match state {
            JobState::Pending => "pending_job",
            _ => "active_job",
        };
        if other.job_type.family() != job.job_type.family() {
            return ConflictingJobType {
                serial,
                job_id: &job.job_id,
                job_type: job.job_type.to_string(),
                blocking_job_id: &other.job_id,
                blocking_type: other.job_type.to_string(),
                blocking_state,
            }
            .fail();
        }
        return DuplicateJob {
            serial,
            job_id: &job.job_id,
            blocking_job_id: &other.job_id,
            blocking_state,
        }
        .fail();
    }
    Ok(())
}

/// Startup recovery: every descriptor already in `active/` is resubmitted.
/// Workflows are idempotent against their status records, so this is safe
/// after a crash at any point.
pub async fn recover_active(ctx: &Arc<DaemonContext>, pool: &Arc<WorkerPool>) -> Result<()> {
    let shutdown = ctx.shutdown();
    for (path, job) in ctx.queue.jobs_in(JobState::Active)? {
        info!(job.id = %job.job_id, path = %path.display(), "Recovering active job");
        let cancel = ctx.registry.register_job(&job.job_id, &job.devices);
        let mut item = WorkItem {
            job: job.clone(),
            cancel,
        };
        loop {
            match pool.try_submit(item) {
                Ok(()) => break,
                Err(returned) => {
                    item = returned;
                    if shutdown.is_cancelled() {
                        ctx.registry.complete_job(&job.job_id, JobState::Pending);
                        return Ok(());
                    }
                    tokio::time::sleep(Duration::from_millis(
                        constants::INTAKE_SCAN_INTERVAL_MS,
                    ))
                    .await;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobType;

    fn job(id: &str, job_type: JobType, devices: &[&str]) -> Job {
        Job {
            job_id: id.to_string(),
            job_type,
            devices: devices.iter().map(|s| s.to_string()).collect(),
            ha_pair_name: String::new(),
            dry_run: false,
            created_at: String::new(),
        }
    }

    #[test]
    fn overlapping_serial_is_rejected_with_blocking_job() {
        let open = vec![(JobState::Active, job("j1", JobType::Standalone, &["001"]))];
        let error = guard_duplicates(&job("j2", JobType::Standalone, &["001"]), &open)
            .unwrap_err();
        match error {
            Error::DuplicateJob {
                blocking_job_id,
                blocking_state,
                ..
            } => {
                assert_eq!(blocking_job_id, "j1");
                assert_eq!(blocking_state, "active_job");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn pending_blockers_are_labelled_pending() {
        let open = vec![(JobState::Pending, job("j1", JobType::Standalone, &["001"]))];
        let error = guard_duplicates(&job("j2", JobType::Standalone, &["001"]), &open)
            .unwrap_err();
        assert!(matches!(
            error,
            Error::DuplicateJob { ref blocking_state, .. } if blocking_state == "pending_job"
        ));
    }

    #[test]
    fn family_conflict_is_its_own_rejection() {
        let open = vec![(
            JobState::Active,
            job("j1", JobType::DownloadOnly, &["001"]),
        )];
        let error = guard_duplicates(&job("j2", JobType::Standalone, &["001"]), &open)
            .unwrap_err();
        assert!(matches!(error, Error::ConflictingJobType { .. }));
    }

    #[test]
    fn disjoint_jobs_pass_and_self_is_ignored() {
        let open = vec![
            (JobState::Active, job("j1", JobType::Standalone, &["001"])),
            (JobState::Pending, job("j2", JobType::Standalone, &["002"])),
        ];
        assert!(guard_duplicates(&job("j3", JobType::Standalone, &["003"]), &open).is_ok());
        // A rescan seeing the job's own pending file must not self-reject.
        assert!(guard_duplicates(&job("j2", JobType::Standalone, &["002"]), &open).is_ok());
    }

    #[test]
    fn ha_pair_overlap_on_either_member_is_rejected() {
        let open = vec![(JobState::Active, job("j1", JobType::HaPair, &["a", "b"]))];
        assert!(guard_duplicates(&job("j2", JobType::Standalone, &["b"]), &open).is_err());
        assert!(guard_duplicates(&job("j3", JobType::HaPair, &["c", "a"]), &open).is_err());
    }
}

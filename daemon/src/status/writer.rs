//! Periodic snapshots of daemon and worker state into `status/`.
//! Device-level records are written by their owning workflows; this loop
//! only covers the daemon-wide view.

use crate::{
    common::{error::Result, file},
    daemon::DaemonContext,
    job::JobState,
    status::{now_rfc3339, DaemonStatus, WorkerStatus, WorkersDoc},
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

pub struct StatusWriter {
    ctx: Arc<DaemonContext>,
    worker_statuses: Arc<Mutex<Vec<WorkerStatus>>>,
    started_at: String,
}

impl StatusWriter {
    pub fn new(
        ctx: Arc<DaemonContext>,
        worker_statuses: Arc<Mutex<Vec<WorkerStatus>>>,
    ) -> Self {
        Self {
            ctx,
            worker_statuses,
            started_at: now_rfc3339(),
        }
    }

    pub async fn run(self, interval: Duration) {
        let shutdown = self.ctx.shutdown();
        loop {
            if let Err(error) = self.write_once(true) {
                warn!(%error, "Status snapshot failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        // Final snapshot so readers observe the daemon going down.
        if let Err(error) = self.write_once(false) {
            warn!(%error, "Final status snapshot failed");
        }
    }

    pub fn write_once(&self, running: bool) -> Result<()> {
        let counters = self.ctx.registry.counters();
        let pending_jobs = self.ctx.queue.jobs_in(JobState::Pending)?.len() as u64;
        let workers = self.worker_statuses.lock().unwrap().clone();

        let daemon = DaemonStatus {
            running,
            pid: std::process::id(),
            workers: workers.len(),
            active_jobs: counters.active,
            pending_jobs,
            completed_jobs: counters.completed,
            failed_jobs: counters.failed,
            cancelled_jobs: counters.cancelled,
            started_at: self.started_at.clone(),
            last_updated: now_rfc3339(),
        };
        file::write_json_atomic(&self.ctx.workdir.daemon_status_file(), &daemon)?;
        file::write_json_atomic(
            &self.ctx.workdir.workers_status_file(),
            &WorkersDoc { workers },
        )
    }
}

//! Bounded worker pool. Submission is non-blocking: a full queue hands
//! the item back to Job Intake, which leaves the descriptor in
//! `pending/` for the next scan. A panic in one item retires that job as
//! failed and never takes the pool down.

use crate::{
    daemon::DaemonContext,
    job::Job,
    status::{now_rfc3339, WorkerState, WorkerStatus},
    upgrade,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tokio_util::sync::CancellationToken;

/// One queued unit of work: a whole job plus its cancellation token.
pub struct WorkItem {
    pub job: Job,
    pub cancel: CancellationToken,
}

pub struct WorkerPool {
    tx: mpsc::Sender<WorkItem>,
    statuses: Arc<Mutex<Vec<WorkerStatus>>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(ctx: Arc<DaemonContext>, pool_size: usize, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let statuses = Arc::new(Mutex::new(
            (0..pool_size).map(WorkerStatus::idle).collect::<Vec<_>>(),
        ));

        let handles = (0..pool_size)
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                let rx = Arc::clone(&rx);
                let statuses = Arc::clone(&statuses);
                tokio::spawn(worker_loop(worker_id, ctx, rx, statuses))
            })
            .collect();

        Self {
            tx,
            statuses,
            handles,
        }
    }

    /// Shared view published through `status/workers.json`.
    pub fn statuses(&self) -> Arc<Mutex<Vec<WorkerStatus>>> {
        Arc::clone(&self.statuses)
    }

    /// Non-blocking submit; a full queue returns the item to the caller.
    pub fn try_submit(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.tx.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(item) => item,
            mpsc::error::TrySendError::Closed(item) => item,
        })
    }

    /// Stop accepting work, let in-flight items drain until `deadline`,
    /// then abandon whatever is left. Abandoned workflows keep their
    /// last-written status.
    pub async fn shutdown(self, deadline: std::time::Duration) {
        drop(self.tx);
        let join_all = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(deadline, join_all).await.is_err() {
            error!("Worker pool did not drain before the shutdown deadline; abandoning items");
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<DaemonContext>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    statuses: Arc<Mutex<Vec<WorkerStatus>>>,
) {
    loop {
        let item = { rx.lock().await.recv().await };
        let Some(item) = item else {
            break;
        };

        publish(&statuses, worker_id, WorkerState::Busy, Some(&item.job));
        info!(
            worker.id = worker_id,
            job.id = %item.job.job_id,
            "Worker picked up job"
        );

        // The job runs in its own task so a panic is contained to the
        // item; the worker itself keeps serving the queue.
        let job = item.job.clone();
        let run = {
            let ctx = Arc::clone(&ctx);
            let job = job.clone();
            let cancel = item.cancel.clone();
            tokio::spawn(async move { upgrade::run_job(&ctx, job, cancel).await })
        };
        if let Err(join_error) = run.await {
            error!(
                worker.id = worker_id,
                job.id = %job.job_id,
                %join_error,
                "Job task aborted; retiring job as failed"
            );
            upgrade::retire_failed(&ctx, &job);
        }

        publish(&statuses, worker_id, WorkerState::Idle, None);
    }
}

fn publish(
    statuses: &Arc<Mutex<Vec<WorkerStatus>>>,
    worker_id: usize,
    state: WorkerState,
    job: Option<&Job>,
) {
    let mut statuses = statuses.lock().unwrap();
    if let Some(slot) = statuses.get_mut(worker_id) {
        slot.status = state;
        slot.current_job_id = job.map(|j| j.job_id.clone());
        slot.current_device = job.and_then(|j| j.devices.first().cloned());
        slot.last_updated = now_rfc3339();
    }
}

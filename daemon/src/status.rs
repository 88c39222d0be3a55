//! Status documents published through `status/` for the CLI and the web
//! application.

use serde::{Deserialize, Serialize};

/// Per-device workflow records.
pub mod device;

/// Periodic daemon/worker snapshot loop.
pub mod writer;

/// `status/daemon.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub workers: usize,
    pub active_jobs: u64,
    pub pending_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
    pub started_at: String,
    pub last_updated: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy,
}

/// One executor's entry in `status/workers.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: usize,
    pub status: WorkerState,
    pub current_job_id: Option<String>,
    pub current_device: Option<String>,
    pub last_updated: String,
}

impl WorkerStatus {
    pub fn idle(worker_id: usize) -> Self {
        Self {
            worker_id,
            status: WorkerState::Idle,
            current_job_id: None,
            current_device: None,
            last_updated: crate::status::now_rfc3339(),
        }
    }
}

/// `status/workers.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkersDoc {
    pub workers: Vec<WorkerStatus>,
}

/// RFC3339 stamp shared by every status document.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

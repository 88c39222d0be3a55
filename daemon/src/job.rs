//! Job descriptors and their movement through the queue directories. A
//! job's canonical location encodes its status; the daemon owns a job
//! while it sits in `active/`.

use crate::{
    common::{error::Result, file},
    workdir::WorkDir,
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

/// The four job shapes clients may submit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Standalone,
    HaPair,
    DownloadOnly,
    DownloadOnlyHa,
}

impl JobType {
    pub fn is_ha(&self) -> bool {
        matches!(self, JobType::HaPair | JobType::DownloadOnlyHa)
    }

    pub fn is_download_only(&self) -> bool {
        matches!(self, JobType::DownloadOnly | JobType::DownloadOnlyHa)
    }

    /// Download-only and full-upgrade jobs must never mix on one device.
    pub fn family(&self) -> JobFamily {
        if self.is_download_only() {
            JobFamily::DownloadOnly
        } else {
            JobFamily::FullUpgrade
        }
    }

    pub fn expected_device_count(&self) -> usize {
        if self.is_ha() {
            2
        } else {
            1
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobType::Standalone => "standalone",
            JobType::HaPair => "ha_pair",
            JobType::DownloadOnly => "download_only",
            JobType::DownloadOnlyHa => "download_only_ha",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobFamily {
    FullUpgrade,
    DownloadOnly,
}

/// The job descriptor exchanged through `queue/`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub devices: Vec<String>,
    #[serde(default)]
    pub ha_pair_name: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub created_at: String,
}

/// Directory-encoded job status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Structured error sidecar left beside a rejected descriptor in
/// `queue/failed/`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobErrorSidecar {
    pub job_id: String,
    pub error: String,
    pub blocking_job_id: Option<String>,
    pub blocking_state: Option<String>,
    pub timestamp: String,
}

/// File-system view of the five queue directories.
#[derive(Clone, Debug)]
pub struct JobQueue {
    workdir: WorkDir,
}

impl JobQueue {
    pub fn new(workdir: WorkDir) -> Self {
        Self { workdir }
    }

    pub fn dir(&self, state: JobState) -> PathBuf {
        match state {
            JobState::Pending => self.workdir.queue_pending(),
            JobState::Active => self.workdir.queue_active(),
            JobState::Completed => self.workdir.queue_completed(),
            JobState::Cancelled => self.workdir.queue_cancelled(),
            JobState::Failed => self.workdir.queue_failed(),
        }
    }

    pub fn file(&self, state: JobState, job_id: &str) -> PathBuf {
        self.dir(state).join(format!("{job_id}.json"))
    }

    /// Write a fresh descriptor into `pending/`.
    pub fn submit(&self, job: &Job) -> Result<PathBuf> {
        let path = self.file(JobState::Pending, &job.job_id);
        file::write_json_atomic(&path, job)?;
        Ok(path)
    }

    /// Move a descriptor between queue directories with a single rename.
    pub fn transition(&self, job_id: &str, from: JobState, to: JobState) -> Result<PathBuf> {
        let source = self.file(from, job_id);
        let target = self.file(to, job_id);
        file::move_file(&source, &target)?;
        Ok(target)
    }

    /// Descriptors in one directory, oldest first, with unparseable files
    /// skipped (intake handles those separately).
    pub fn jobs_in(&self, state: JobState) -> Result<Vec<(PathBuf, Job)>> {
        let mut jobs = Vec::new();
        for path in file::scan_json_files(&self.dir(state))? {
            if let Some(job) = file::read_json_opt::<Job>(&path).unwrap_or(None) {
                jobs.push((path, job));
            }
        }
        Ok(jobs)
    }

    /// Every (state, job) pair currently in `pending/` or `active/`.
    pub fn open_jobs(&self) -> Result<Vec<(JobState, Job)>> {
        let mut open = Vec::new();
        for state in [JobState::Pending, JobState::Active] {
            for (_, job) in self.jobs_in(state)? {
                open.push((state, job));
            }
        }
        Ok(open)
    }

    /// Leave a structured rejection record beside a failed descriptor.
    pub fn write_error_sidecar(&self, sidecar: &JobErrorSidecar) -> Result<PathBuf> {
        let path = self
            .dir(JobState::Failed)
            .join(format!("{}.error.json", sidecar.job_id));
        file::write_json_atomic(&path, sidecar)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (tempfile::TempDir, JobQueue) {
        let tmp = tempfile::tempdir().unwrap();
        let workdir = WorkDir::new(tmp.path());
        workdir.ensure_layout().unwrap();
        (tmp, JobQueue::new(workdir))
    }

    fn job(id: &str, job_type: JobType, devices: &[&str]) -> Job {
        Job {
            job_id: id.to_string(),
            job_type,
            devices: devices.iter().map(|s| s.to_string()).collect(),
            ha_pair_name: String::new(),
            dry_run: false,
            created_at: "2026-07-01T10:00:00Z".to_string(),
        }
    }

    #[test]
    fn type_families_separate_download_only_from_full() {
        assert_eq!(JobType::Standalone.family(), JobFamily::FullUpgrade);
        assert_eq!(JobType::HaPair.family(), JobFamily::FullUpgrade);
        assert_eq!(JobType::DownloadOnly.family(), JobFamily::DownloadOnly);
        assert_eq!(JobType::DownloadOnlyHa.family(), JobFamily::DownloadOnly);
    }

    #[test]
    fn descriptor_serializes_with_type_field() {
        let text = serde_json::to_string(&job("j1", JobType::DownloadOnlyHa, &["a", "b"])).unwrap();
        assert!(text.contains(r#""type":"download_only_ha""#));
    }

    #[test]
    fn transition_moves_exactly_one_file() {
        let (_tmp, queue) = queue();
        queue.submit(&job("j1", JobType::Standalone, &["001"])).unwrap();

        queue
            .transition("j1", JobState::Pending, JobState::Active)
            .unwrap();
        assert!(queue.jobs_in(JobState::Pending).unwrap().is_empty());
        assert_eq!(queue.jobs_in(JobState::Active).unwrap().len(), 1);

        queue
            .transition("j1", JobState::Active, JobState::Completed)
            .unwrap();
        assert!(queue.jobs_in(JobState::Active).unwrap().is_empty());
        assert_eq!(queue.jobs_in(JobState::Completed).unwrap().len(), 1);
    }

    #[test]
    fn open_jobs_spans_pending_and_active() {
        let (_tmp, queue) = queue();
        queue.submit(&job("j1", JobType::Standalone, &["001"])).unwrap();
        queue.submit(&job("j2", JobType::Standalone, &["002"])).unwrap();
        queue
            .transition("j2", JobState::Pending, JobState::Active)
            .unwrap();

        let open = queue.open_jobs().unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().any(|(s, j)| *s == JobState::Pending && j.job_id == "j1"));
        assert!(open.iter().any(|(s, j)| *s == JobState::Active && j.job_id == "j2"));
    }
}

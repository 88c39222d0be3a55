use crate::device_api::DeviceApiError;
use snafu::Snafu;
use std::path::PathBuf;

/// For use with multiple fallible operations which may fail for different reasons, but are
/// defined within the same scope and must return to the outer scope (calling scope) using
/// the try operator -- '?'.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    /// Error for when creating a control-plane directory fails.
    #[snafu(display("Failed to create directory {}: {}", path.display(), source))]
    CreateDir {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when reading a control-plane file fails.
    #[snafu(display("Failed to read file {}: {}", path.display(), source))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when writing a temporary file fails.
    #[snafu(display("Failed to write temporary file {}: {}", path.display(), source))]
    WriteTempFile {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when flushing a temporary file to disk fails.
    #[snafu(display("Failed to sync file {}: {}", path.display(), source))]
    SyncFile {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when an atomic rename fails.
    #[snafu(display(
        "Failed to rename {} to {}: {}",
        from.display(),
        to.display(),
        source
    ))]
    RenameFile {
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Error for when removing a file fails.
    #[snafu(display("Failed to remove file {}: {}", path.display(), source))]
    RemoveFile {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when listing a control-plane directory fails.
    #[snafu(display("Failed to scan directory {}: {}", path.display(), source))]
    ScanDir {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when a control-plane document does not parse as JSON.
    #[snafu(display("Failed to parse JSON document {}: {}", path.display(), source))]
    JsonParse {
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Error for when serializing a document for an atomic write fails.
    #[snafu(display("Failed to serialize {}: {}", what, source))]
    JsonSerialize {
        source: serde_json::Error,
        what: String,
    },

    /// Error for when the home directory cannot be determined while resolving
    /// the work directory.
    #[snafu(display("Failed to resolve a work directory: no flag, no {} and no home directory", env_var))]
    WorkDirResolve { env_var: String },

    /// Error for when the configured worker pool size is out of range.
    #[snafu(display("Worker pool size {} is outside the supported 1..={} range", pool_size, max))]
    PoolSizeRange { pool_size: usize, max: usize },

    /// Error for when a serial named by a job is absent from the inventory.
    #[snafu(display("Device {} is not present in the inventory", serial))]
    DeviceNotInInventory { serial: String },

    /// Error for when an inventory entry has no management IP.
    #[snafu(display("Device {} has no management IP", serial))]
    MissingManagementIp { serial: String },

    /// Error for when a Device-API call made on behalf of a device fails.
    #[snafu(display("Device API call failed for {}: {}", serial, source))]
    DeviceApi {
        source: DeviceApiError,
        serial: String,
    },

    /// Error for when the upgrade partition does not have enough free space
    /// for the next image download.
    #[snafu(display(
        "Insufficient disk space on {}: {:.1} GB available, {:.1} GB required",
        serial,
        available_gb,
        required_gb
    ))]
    InsufficientDisk {
        serial: String,
        available_gb: f64,
        required_gb: f64,
    },

    /// Error for when the post-download software inventory is missing
    /// versions the upgrade path requires.
    #[snafu(display(
        "Device {} is missing downloaded images after the download phase: {:?}",
        serial,
        missing
    ))]
    DownloadVerification {
        serial: String,
        missing: Vec<String>,
    },

    /// Error for when the live HA roles of a pair cannot be disambiguated.
    #[snafu(display(
        "HA roles for pair ({}, {}) are ambiguous: {} reports '{}', {} reports '{}'",
        serial_a,
        serial_b,
        serial_a,
        state_a,
        serial_b,
        state_b
    ))]
    HaAmbiguous {
        serial_a: String,
        serial_b: String,
        state_a: String,
        state_b: String,
    },

    /// Error for when an install cycle leaves the device on a version that is
    /// not on its upgrade path.
    #[snafu(display(
        "Device {} reports version {} which is not on its upgrade path",
        serial,
        version
    ))]
    VersionOffPath { serial: String, version: String },

    /// Error for when the install loop has run once per path entry without
    /// converging on the target version.
    #[snafu(display(
        "Device {} did not reach {} after {} install cycles",
        serial,
        target,
        cycles
    ))]
    InstallLoopExhausted {
        serial: String,
        target: String,
        cycles: usize,
    },

    /// Error for when a second workflow would race a recently-active one for
    /// the same serial.
    #[snafu(display(
        "A workflow for {} appears to be active elsewhere (status '{}', last update {})",
        serial,
        status,
        last_updated
    ))]
    WorkflowAlreadyActive {
        serial: String,
        status: String,
        last_updated: String,
    },

    /// Error for when a workflow observes its cancellation token.
    #[snafu(display("Upgrade of {} was cancelled during {}", serial, phase))]
    WorkflowCancelled { serial: String, phase: String },

    /// Error for when a job descriptor fails validation at intake.
    #[snafu(display("Invalid job descriptor {}: {}", path.display(), reason))]
    InvalidJob { path: PathBuf, reason: String },

    /// Error for when a device is already claimed by another pending or
    /// active job.
    #[snafu(display(
        "Device {} in job {} is already claimed by {} job {}",
        serial,
        job_id,
        blocking_state,
        blocking_job_id
    ))]
    DuplicateJob {
        serial: String,
        job_id: String,
        blocking_job_id: String,
        blocking_state: String,
    },

    /// Error for when a job would mix the download-only and full-upgrade
    /// families on one device.
    #[snafu(display(
        "Job {} ({}) conflicts with {} job {} ({}) on device {}",
        job_id,
        job_type,
        blocking_state,
        blocking_job_id,
        blocking_type,
        serial
    ))]
    ConflictingJobType {
        serial: String,
        job_id: String,
        job_type: String,
        blocking_job_id: String,
        blocking_type: String,
        blocking_state: String,
    },

    /// Error for when the worker pool queue cannot take another job.
    #[snafu(display("Worker pool queue is full"))]
    QueueFull,
}

/// A wrapper type to remove repeated Result<T, Error> returns.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True when the underlying cause is a cooperative cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::WorkflowCancelled { .. } => true,
            Error::DeviceApi { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

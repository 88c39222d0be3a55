use snafu::Snafu;
use std::{path::PathBuf, time::Duration};

/// For use with multiple fallible operations which may fail for different reasons, but are
/// defined within the same scope and must return to the outer scope (calling scope) using
/// the try operator -- '?'.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    /// Error bubbling up from the orchestrator core.
    #[snafu(context(false), display("{source}"))]
    Core {
        source: upgrade_daemon::common::error::Error,
    },

    /// Error from a direct Device-API call made by the CLI.
    #[snafu(context(false), display("{source}"))]
    Api {
        source: upgrade_daemon::device_api::DeviceApiError,
    },

    /// Error for when an operation needs a running daemon and there is none.
    #[snafu(display("The daemon is not running"))]
    DaemonNotRunning,

    /// Error for when the daemon does not react to a lifecycle request in time.
    #[snafu(display("The daemon did not {} within {:?}", action, timeout))]
    DaemonTimeout { action: String, timeout: Duration },

    /// Error for when spawning the daemon binary fails.
    #[snafu(display("Failed to spawn {}: {}", bin, source))]
    SpawnDaemon {
        source: std::io::Error,
        bin: String,
    },

    /// Error for when signalling the daemon process fails.
    #[snafu(display("Failed to signal pid {}: {}", pid, message))]
    SignalDaemon { pid: u32, message: String },

    /// Error for when a seed or batch CSV cannot be read.
    #[snafu(display("Failed to read CSV {}: {}", path.display(), source))]
    ReadCsv {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when an export file cannot be written.
    #[snafu(display("Failed to write {}: {}", path.display(), source))]
    WriteFile {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when a CSV row cannot be used.
    #[snafu(display("Invalid CSV row {}: {}", row, reason))]
    CsvRow { row: usize, reason: String },

    /// Error for when a job id cannot be found in any queue directory.
    #[snafu(display("Job {} not found", job_id))]
    JobNotFound { job_id: String },

    /// Error for when a device has not produced a status record yet.
    #[snafu(display("Device {} has no status record yet", serial))]
    NoDeviceStatus { serial: String },

    /// Error for when a `config set` key does not name a config field.
    #[snafu(display("Unknown configuration key '{}'", key))]
    BadConfigKey { key: String },

    /// Error for when the upgrade-path table fails validation.
    #[snafu(display("Upgrade-path table has {} problem(s)", count))]
    PathTableInvalid { count: usize },
}

/// A wrapper type to remove repeated Result<T, Error> returns.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Exit code category surfaced to scripts.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::DaemonNotRunning | Error::DaemonTimeout { .. } => 3,
            Error::JobNotFound { .. } | Error::NoDeviceStatus { .. } => 2,
            Error::CsvRow { .. } | Error::BadConfigKey { .. } | Error::PathTableInvalid { .. } => 4,
            _ => 1,
        }
    }
}

//! The capability interface the upgrade engine drives appliances through.
//!
//! The engine only ever sees `dyn DeviceApi`; the production implementation
//! speaks the appliance XML management API over HTTPS, and the mock is a
//! scripted in-memory appliance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::{fmt, time::Duration};
use tokio_util::sync::CancellationToken;

/// Production XML-over-HTTPS client.
pub mod http;

/// Scripted in-memory appliance for tests.
pub mod mock;

/// Live high-availability role of an appliance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaState {
    Active,
    Passive,
    Standalone,
    Unknown,
}

impl Default for HaState {
    fn default() -> Self {
        HaState::Unknown
    }
}

impl fmt::Display for HaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HaState::Active => "active",
            HaState::Passive => "passive",
            HaState::Standalone => "standalone",
            HaState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Identity block returned by `system_info`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: String,
    pub model: String,
    pub serial: String,
}

/// One forwarding-table entry, canonicalized by (destination, gateway,
/// interface).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: String,
    pub gateway: String,
    pub interface: String,
}

/// One ARP-table entry, canonicalized by (ip, mac).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArpEntry {
    pub ip: String,
    pub mac: String,
    pub interface: String,
}

/// Operational metrics sampled for pre/post-flight validation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub tcp_sessions: u64,
    pub routes: Vec<RouteEntry>,
    pub arp_entries: Vec<ArpEntry>,
    pub disk_available_gb: f64,
}

/// Software images known to the appliance.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SoftwareInfo {
    pub downloaded: Vec<String>,
    pub available: Vec<String>,
}

/// Identifier of an asynchronous job queued on the appliance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiJobId(pub String);

impl fmt::Display for ApiJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure surface of the capability, mirroring how appliances actually
/// misbehave.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[snafu(context(suffix(false)))]
pub enum DeviceApiError {
    /// Error for when the management endpoint cannot be reached.
    #[snafu(display("Device {} is unreachable: {}", endpoint, source))]
    Unreachable {
        source: reqwest::Error,
        endpoint: String,
    },

    /// Error for when the appliance rejects the credentials.
    #[snafu(display("Authentication failed for {}", endpoint))]
    Auth { endpoint: String },

    /// Error for when a request exceeds its configured deadline.
    #[snafu(display("Request to {} timed out after {:?}", endpoint, timeout))]
    Timeout {
        endpoint: String,
        timeout: Duration,
    },

    /// Error for when a response cannot be interpreted.
    #[snafu(display("Failed to parse API response from {}: {}", endpoint, reason))]
    ResponseParse { endpoint: String, reason: String },

    /// Error for when an async job reports no progress for the stall window.
    #[snafu(display("Job {} stalled: no progress for {:?}", job_id, window))]
    Stall { job_id: String, window: Duration },

    /// Error for when the appliance refuses to queue more work.
    #[snafu(display("Device is busy: {}", message))]
    Busy { message: String },

    /// Error for when an image is not present for install.
    #[snafu(display("Version {} is not available on the device", version))]
    VersionMissing { version: String },

    /// Error for when an async job finishes unsuccessfully on the appliance.
    #[snafu(display("Job {} failed on the device: {}", job_id, message))]
    JobFailed { job_id: String, message: String },

    /// Error for when the caller's cancellation token fired mid-wait.
    #[snafu(display("Operation was cancelled"))]
    Cancelled,

    /// Error for when an appliance does not answer health probes in time.
    #[snafu(display("Device did not come back online within {:?}", max_wait))]
    DeadlineExceeded { max_wait: Duration },

    /// Error for when the management endpoint URL cannot be built.
    #[snafu(display("Invalid device endpoint {}: {}", endpoint, source))]
    EndpointParse {
        source: url::ParseError,
        endpoint: String,
    },
}

impl DeviceApiError {
    /// Transport-level failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceApiError::Unreachable { .. }
                | DeviceApiError::Timeout { .. }
                | DeviceApiError::Busy { .. }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, DeviceApiError::Cancelled)
    }
}

/// Everything the upgrade engine needs from an appliance. The `wait_*`
/// operations poll with exponential backoff plus jitter, detect stalls,
/// and return promptly with `Cancelled` when the token fires.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn system_info(&self) -> Result<SystemInfo, DeviceApiError>;

    async fn ha_state(&self) -> Result<HaState, DeviceApiError>;

    async fn metrics(&self) -> Result<DeviceMetrics, DeviceApiError>;

    /// Ask the appliance to refresh its list of available images.
    async fn software_check(&self) -> Result<(), DeviceApiError>;

    async fn software_info(&self) -> Result<SoftwareInfo, DeviceApiError>;

    /// Free space on the upgrade partition, in GB.
    async fn disk_available(&self) -> Result<f64, DeviceApiError>;

    async fn download(&self, version: &str) -> Result<ApiJobId, DeviceApiError>;

    async fn wait_download(
        &self,
        job: &ApiJobId,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError>;

    async fn install(&self, version: &str) -> Result<ApiJobId, DeviceApiError>;

    async fn wait_install(
        &self,
        job: &ApiJobId,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError>;

    /// Acknowledges and drops the management connection.
    async fn reboot(&self) -> Result<(), DeviceApiError>;

    /// Health-probe until the appliance answers again, with backoff capped
    /// at the configured poll interval.
    async fn wait_online(
        &self,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError>;
}

/// Hands a workflow its scoped API session. The daemon installs the HTTPS
/// connector; tests install a mock fleet.
pub trait ApiConnector: Send + Sync {
    fn connect(
        &self,
        device: &crate::inventory::Device,
    ) -> Result<Box<dyn DeviceApi>, DeviceApiError>;
}

//! Daemon configuration, loaded once at startup from
//! `{work_dir}/config/config.json`. Every field has a default so an empty
//! or absent document is a valid configuration.

use crate::{
    common::{
        error::{PoolSizeRange, Result},
        file,
    },
    workdir::WorkDir,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::time::Duration;

static CONFIG: OnceCell<UpgradeConfig> = OnceCell::new();

/// Worker pool sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub pool_size: usize,
    pub queue_size: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            pool_size: constants::DEFAULT_POOL_SIZE,
            queue_size: constants::DEFAULT_QUEUE_SIZE,
        }
    }
}

/// Image download policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub min_disk_gb: f64,
    pub retry_attempts: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            min_disk_gb: constants::DEFAULT_MIN_DISK_GB,
            retry_attempts: constants::DEFAULT_DOWNLOAD_RETRY_ATTEMPTS,
        }
    }
}

/// Margins applied when comparing pre and post-flight metrics.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationMargins {
    pub tcp_session_margin_percent: f64,
    pub route_margin: usize,
    pub arp_margin: usize,
}

impl Default for ValidationMargins {
    fn default() -> Self {
        Self {
            tcp_session_margin_percent: constants::DEFAULT_TCP_SESSION_MARGIN_PERCENT,
            route_margin: constants::DEFAULT_ROUTE_MARGIN,
            arp_margin: constants::DEFAULT_ARP_MARGIN,
        }
    }
}

/// Device-API timing, in seconds. Kept as plain integers so the document
/// stays trivially editable by the web application.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub software_check_secs: u64,
    pub software_info_secs: u64,
    pub job_stall_secs: u64,
    pub reboot_max_wait_secs: u64,
    pub max_reboot_poll_interval_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            software_check_secs: constants::DEFAULT_SOFTWARE_CHECK_SECS,
            software_info_secs: constants::DEFAULT_SOFTWARE_INFO_SECS,
            job_stall_secs: constants::DEFAULT_JOB_STALL_SECS,
            reboot_max_wait_secs: constants::DEFAULT_REBOOT_MAX_WAIT_SECS,
            max_reboot_poll_interval_secs: constants::DEFAULT_MAX_REBOOT_POLL_INTERVAL_SECS,
        }
    }
}

impl TimeoutSettings {
    pub fn software_check(&self) -> Duration {
        Duration::from_secs(self.software_check_secs)
    }

    pub fn software_info(&self) -> Duration {
        Duration::from_secs(self.software_info_secs)
    }

    pub fn job_stall(&self) -> Duration {
        Duration::from_secs(self.job_stall_secs)
    }

    pub fn reboot_max_wait(&self) -> Duration {
        Duration::from_secs(self.reboot_max_wait_secs)
    }

    pub fn max_reboot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.max_reboot_poll_interval_secs)
    }
}

/// Discovery behavior used by the CLI's `device discover` action.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub retry_attempts: u32,
    pub requests_per_minute: u32,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            retry_attempts: constants::DEFAULT_DISCOVERY_RETRY_ATTEMPTS,
            requests_per_minute: constants::DEFAULT_DISCOVERY_REQUESTS_PER_MINUTE,
        }
    }
}

/// Credentials and transport options for the appliance management API.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub port: u16,
    pub verify_tls: bool,
    pub api_key: String,
    pub username: String,
    pub password: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_API_PORT,
            verify_tls: false,
            api_key: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// The daemon configuration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    pub workers: WorkerSettings,
    pub download: DownloadSettings,
    pub validation: ValidationMargins,
    pub timeouts: TimeoutSettings,
    pub discovery: DiscoverySettings,
    pub api: ApiSettings,
    pub status_interval_secs: u64,
    pub active_grace_secs: u64,
    pub shutdown_deadline_secs: u64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            workers: WorkerSettings::default(),
            download: DownloadSettings::default(),
            validation: ValidationMargins::default(),
            timeouts: TimeoutSettings::default(),
            discovery: DiscoverySettings::default(),
            api: ApiSettings::default(),
            status_interval_secs: constants::DEFAULT_STATUS_INTERVAL_SECS,
            active_grace_secs: constants::DEFAULT_ACTIVE_GRACE_SECS,
            shutdown_deadline_secs: constants::DEFAULT_SHUTDOWN_DEADLINE_SECS,
        }
    }
}

impl UpgradeConfig {
    /// Load the config document from the work directory. An absent file
    /// yields the defaults; an out-of-range pool size is rejected.
    pub fn load(workdir: &WorkDir) -> Result<Self> {
        let config: UpgradeConfig =
            file::read_json_opt(&workdir.config_file())?.unwrap_or_default();
        ensure!(
            (1..=constants::MAX_POOL_SIZE).contains(&config.workers.pool_size),
            PoolSizeRange {
                pool_size: config.workers.pool_size,
                max: constants::MAX_POOL_SIZE,
            }
        );
        Ok(config)
    }

    /// Install the process-wide configuration. Later calls are no-ops so
    /// the daemon cannot be reconfigured mid-run.
    pub fn initialize(config: UpgradeConfig) -> &'static UpgradeConfig {
        CONFIG.get_or_init(|| config)
    }

    /// Get the process-wide configuration.
    pub fn get() -> &'static UpgradeConfig {
        CONFIG.get().expect("configuration is not initialized")
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn active_grace(&self) -> Duration {
        Duration::from_secs(self.active_grace_secs)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }
}

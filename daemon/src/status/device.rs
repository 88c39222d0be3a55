//! The per-device workflow record, written by the owning workflow at
//! every phase transition and meaningful sub-step, and read by the CLI,
//! the web application, and resumed workflows.

use crate::{
    common::{error::Result, file},
    status::now_rfc3339,
    workdir::WorkDir,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Workflow position of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStatus {
    Pending,
    Validating,
    Downloading,
    Installing,
    Rebooting,
    Complete,
    Failed,
    Cancelled,
    Skipped,
    DownloadComplete,
}

impl UpgradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpgradeStatus::Complete
                | UpgradeStatus::Failed
                | UpgradeStatus::Cancelled
                | UpgradeStatus::Skipped
                | UpgradeStatus::DownloadComplete
        )
    }

    /// States during which a second workflow must not touch the device.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UpgradeStatus::Validating
                | UpgradeStatus::Downloading
                | UpgradeStatus::Installing
                | UpgradeStatus::Rebooting
        )
    }
}

impl Default for UpgradeStatus {
    fn default() -> Self {
        UpgradeStatus::Pending
    }
}

/// One captured workflow error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceError {
    pub timestamp: String,
    pub phase: String,
    pub message: String,
    #[serde(default)]
    pub details: String,
}

/// Disk gate result recorded before downloads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiskSpace {
    pub available_gb: f64,
    pub required_gb: f64,
    pub check_passed: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub serial: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ha_role: Option<String>,
    /// Captured exactly once per run; never overwritten, even across
    /// daemon restarts.
    #[serde(default)]
    pub starting_version: Option<String>,
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub upgrade_path: Vec<String>,
    #[serde(default)]
    pub current_path_index: usize,
    #[serde(default)]
    pub target_version: String,
    #[serde(default)]
    pub upgrade_status: UpgradeStatus,
    #[serde(default)]
    pub current_phase: String,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub upgrade_message: String,
    #[serde(default)]
    pub downloaded_versions: Vec<String>,
    #[serde(default)]
    pub skipped_versions: Vec<String>,
    #[serde(default)]
    pub ready_for_install: bool,
    #[serde(default)]
    pub errors: Vec<DeviceError>,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub disk_space: Option<DiskSpace>,
}

impl DeviceStatus {
    pub fn new(serial: &str, hostname: &str) -> Self {
        Self {
            serial: serial.to_string(),
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    /// Set the run anchor if this is the first time the workflow touches
    /// the device. An already-set anchor always wins.
    pub fn anchor_starting_version(&mut self, live_version: &str) {
        if self.starting_version.is_none() {
            self.starting_version = Some(live_version.to_string());
        }
    }

    pub fn record_error(&mut self, phase: &str, message: &str, details: &str) {
        self.errors.push(DeviceError {
            timestamp: now_rfc3339(),
            phase: phase.to_string(),
            message: message.to_string(),
            details: details.to_string(),
        });
    }

    /// Whether `last_updated` falls inside `grace` of the current time.
    pub fn updated_within(&self, grace: Duration) -> bool {
        DateTime::parse_from_rfc3339(&self.last_updated)
            .map(|stamp| {
                let age = Utc::now().signed_duration_since(stamp.with_timezone(&Utc));
                age.num_seconds() >= 0 && age.num_seconds() as u64 <= grace.as_secs()
            })
            .unwrap_or(false)
    }
}

/// Persistence for `status/devices/{serial}.json`. All writes are atomic;
/// the on-disk anchor is enforced on every save so no caller can regress
/// `starting_version`.
#[derive(Clone, Debug)]
pub struct DeviceStatusStore {
    dir: PathBuf,
}

impl DeviceStatusStore {
    pub fn new(workdir: &WorkDir) -> Self {
        Self {
            dir: workdir.status_devices_dir(),
        }
    }

    pub fn path(&self, serial: &str) -> PathBuf {
        self.dir.join(format!("{serial}.json"))
    }

    /// `None` when the device has not produced status yet.
    pub fn load(&self, serial: &str) -> Result<Option<DeviceStatus>> {
        file::read_json_opt(&self.path(serial))
    }

    /// Stamp and persist. If the on-disk record already carries an anchor,
    /// it is preserved regardless of what the caller holds.
    pub fn save(&self, status: &mut DeviceStatus) -> Result<()> {
        if let Some(anchor) = self
            .load(&status.serial)?
            .and_then(|existing| existing.starting_version)
        {
            status.starting_version = Some(anchor);
        }
        status.last_updated = now_rfc3339();
        file::write_json_atomic(&self.path(&status.serial), status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, DeviceStatusStore) {
        let tmp = tempfile::tempdir().unwrap();
        let workdir = WorkDir::new(tmp.path());
        workdir.ensure_layout().unwrap();
        (tmp, DeviceStatusStore::new(&workdir))
    }

    #[test]
    fn starting_version_is_written_exactly_once() {
        let (_tmp, store) = store();
        let mut status = DeviceStatus::new("001", "edge-fw-01");
        status.anchor_starting_version("10.5.1");
        store.save(&mut status).unwrap();

        // A later run that lost its in-memory anchor cannot regress it.
        let mut resumed = DeviceStatus::new("001", "edge-fw-01");
        resumed.anchor_starting_version("11.1.0");
        assert_eq!(resumed.starting_version.as_deref(), Some("11.1.0"));

        let mut amnesiac = DeviceStatus::new("001", "edge-fw-01");
        store.save(&mut amnesiac).unwrap();
        let reloaded = store.load("001").unwrap().unwrap();
        assert_eq!(reloaded.starting_version.as_deref(), Some("10.5.1"));
    }

    #[test]
    fn anchor_does_not_overwrite() {
        let mut status = DeviceStatus::new("001", "");
        status.anchor_starting_version("10.5.1");
        status.anchor_starting_version("11.1.0");
        assert_eq!(status.starting_version.as_deref(), Some("10.5.1"));
    }

    #[test]
    fn load_missing_is_none() {
        let (_tmp, store) = store();
        assert!(store.load("absent").unwrap().is_none());
    }

    #[test]
    fn busy_and_terminal_states_are_disjoint() {
        for status in [
            UpgradeStatus::Validating,
            UpgradeStatus::Downloading,
            UpgradeStatus::Installing,
            UpgradeStatus::Rebooting,
        ] {
            assert!(status.is_busy());
            assert!(!status.is_terminal());
        }
        for status in [
            UpgradeStatus::Complete,
            UpgradeStatus::Failed,
            UpgradeStatus::Cancelled,
            UpgradeStatus::Skipped,
            UpgradeStatus::DownloadComplete,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_busy());
        }
    }

    #[test]
    fn updated_within_respects_the_grace_window() {
        let mut status = DeviceStatus::new("001", "");
        status.last_updated = now_rfc3339();
        assert!(status.updated_within(Duration::from_secs(120)));

        status.last_updated = "2020-01-01T00:00:00Z".to_string();
        assert!(!status.updated_within(Duration::from_secs(120)));

        status.last_updated = "not a timestamp".to_string();
        assert!(!status.updated_within(Duration::from_secs(120)));
    }
}

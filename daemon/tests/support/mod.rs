//! Shared scaffolding for the scenario tests: a temp work directory, a
//! scripted fleet, and a daemon context wired to it.

#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};
use upgrade_daemon::{
    common::file,
    config::UpgradeConfig,
    daemon::DaemonContext,
    device_api::{mock::MockFleet, HaState},
    inventory::{Device, DeviceType, InventoryDoc},
    job::{Job, JobType},
    workdir::WorkDir,
};

pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub workdir: WorkDir,
    pub config: UpgradeConfig,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let workdir = WorkDir::new(tmp.path());
        workdir.ensure_layout().unwrap();
        Self {
            tmp,
            workdir,
            config: UpgradeConfig::default(),
        }
    }

    /// Seed `devices/inventory.json` with standalone entries.
    pub fn write_inventory(&self, serials: &[&str]) {
        let mut devices = HashMap::new();
        for (idx, serial) in serials.iter().enumerate() {
            devices.insert(
                serial.to_string(),
                Device {
                    serial: serial.to_string(),
                    hostname: format!("fw-{idx:02}"),
                    mgmt_ip: format!("10.0.0.{}", idx + 10),
                    model: "BX-3200".to_string(),
                    current_version: String::new(),
                    device_type: DeviceType::Standalone,
                    peer_serial: None,
                    ha_state: HaState::Standalone,
                    discovered_at: "2026-07-01T10:00:00Z".to_string(),
                },
            );
        }
        let doc = InventoryDoc {
            device_count: devices.len(),
            devices,
            last_updated: "2026-07-01T10:00:00Z".to_string(),
        };
        file::write_json_atomic(&self.workdir.inventory_file(), &doc).unwrap();
    }

    /// Seed `config/upgrade_paths.json`.
    pub fn write_paths(&self, entries: &[(&str, &[&str])]) {
        let map: HashMap<String, Vec<String>> = entries
            .iter()
            .map(|(from, hops)| {
                (
                    from.to_string(),
                    hops.iter().map(|hop| hop.to_string()).collect(),
                )
            })
            .collect();
        file::write_json_atomic(&self.workdir.upgrade_paths_file(), &map).unwrap();
    }

    /// Build the daemon context around a scripted fleet. Call after the
    /// inventory and path files are in place.
    pub fn ctx(&self, fleet: MockFleet) -> Arc<DaemonContext> {
        DaemonContext::build(
            self.workdir.clone(),
            self.config.clone(),
            Box::new(fleet),
        )
        .unwrap()
    }
}

pub fn standalone_job(job_id: &str, serial: &str) -> Job {
    job_of(job_id, JobType::Standalone, &[serial])
}

pub fn job_of(job_id: &str, job_type: JobType, devices: &[&str]) -> Job {
    Job {
        job_id: job_id.to_string(),
        job_type,
        devices: devices.iter().map(|serial| serial.to_string()).collect(),
        ha_pair_name: String::new(),
        dry_run: false,
        created_at: "2026-07-01T10:00:00Z".to_string(),
    }
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub async fn wait_until<F>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}

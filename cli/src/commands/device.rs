//! `bastionctl device ...` -- inventory views plus the one-shot actions
//! that talk to an appliance directly: validate, metrics, discover.

use crate::{
    error::{CsvRow, NoDeviceStatus, ReadCsv, Result, WriteFile},
    opts::{DiscoverArgs, ExportArgs},
};
use snafu::ResultExt;
use std::{collections::HashMap, io::Write, path::Path};
use upgrade_daemon::{
    common::file,
    config::UpgradeConfig,
    device_api::{http::HttpDeviceApi, DeviceApi, HaState},
    inventory::{Device, DeviceType, Inventory, InventoryDoc},
    limiter::RateLimiter,
    status::{device::DeviceStatusStore, now_rfc3339},
    validator::Validator,
    workdir::WorkDir,
};

pub fn list(workdir: &WorkDir) -> Result<()> {
    let inventory = Inventory::load(&workdir.inventory_file())?;
    if inventory.is_empty() {
        console_logger::warn("Inventory is empty; run:", "bastionctl device discover <csv>");
        return Ok(());
    }

    let mut devices: Vec<&Device> = inventory.iter().collect();
    devices.sort_by(|a, b| a.serial.cmp(&b.serial));
    for device in devices {
        println!(
            "{:<16} {:<20} {:<16} {:<10} {:<10} {}",
            device.serial,
            device.hostname,
            device.mgmt_ip,
            device.model,
            device.current_version,
            device.ha_state
        );
    }
    Ok(())
}

pub fn status(workdir: &WorkDir, serial: &str) -> Result<()> {
    let store = DeviceStatusStore::new(workdir);
    let Some(status) = store.load(serial)? else {
        return NoDeviceStatus { serial }.fail();
    };
    println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
    Ok(())
}

/// Collect and persist a pre-flight snapshot for one device.
pub async fn validate(workdir: &WorkDir, serial: &str) -> Result<()> {
    let config = UpgradeConfig::load(workdir)?;
    let api = connect(workdir, &config, serial)?;
    let validator = Validator::new(workdir, config.validation.clone());

    let record = validator.collect(serial, api.as_ref()).await?;
    console_logger::info_with_data("Validation snapshot written for:", serial);
    println!("  tcp sessions: {}", record.tcp_sessions);
    println!("  routes:       {}", record.route_count);
    println!("  arp entries:  {}", record.arp_count);
    println!("  disk free:    {:.1} GB", record.disk_available_gb);
    Ok(())
}

pub async fn metrics(workdir: &WorkDir, serial: &str) -> Result<()> {
    let config = UpgradeConfig::load(workdir)?;
    let api = connect(workdir, &config, serial)?;

    let metrics = api.metrics().await?;
    println!("  tcp sessions: {}", metrics.tcp_sessions);
    println!("  routes:       {}", metrics.routes.len());
    println!("  arp entries:  {}", metrics.arp_entries.len());
    println!("  disk free:    {:.1} GB", metrics.disk_available_gb);
    Ok(())
}

/// Query every appliance in the seed CSV and atomically rewrite
/// `devices/inventory.json`. Calls are gated by the configured
/// requests-per-minute bucket and retried per the discovery budget.
pub async fn discover(workdir: &WorkDir, args: &DiscoverArgs) -> Result<()> {
    let config = UpgradeConfig::load(workdir)?;
    let limiter = RateLimiter::per_minute(config.discovery.requests_per_minute);

    let mut devices: HashMap<String, Device> = HashMap::new();
    let mut pair_members: HashMap<String, Vec<String>> = HashMap::new();
    let mut failures = 0usize;

    for (row, fields) in read_rows(&args.csv)? {
        let mgmt_ip = fields.first().map(String::as_str).unwrap_or("").trim();
        if mgmt_ip.is_empty() {
            return CsvRow {
                row,
                reason: "missing management IP",
            }
            .fail();
        }
        let pair_name = fields.get(1).map(String::as_str).unwrap_or("").trim();

        match probe(mgmt_ip, &config, &limiter).await {
            Ok(mut device) => {
                console_logger::info_with_data("Discovered:", &device.serial);
                if !pair_name.is_empty() {
                    device.device_type = DeviceType::HaPair;
                    pair_members
                        .entry(pair_name.to_string())
                        .or_default()
                        .push(device.serial.clone());
                }
                devices.insert(device.serial.clone(), device);
            }
            Err(error) => {
                console_logger::error("Failed to discover device:", &error.to_string());
                failures += 1;
            }
        }
    }

    // Devices sharing a pair name become each other's peers.
    for members in pair_members.values() {
        if let [a, b] = members.as_slice() {
            if let Some(device) = devices.get_mut(a) {
                device.peer_serial = Some(b.clone());
            }
            if let Some(device) = devices.get_mut(b) {
                device.peer_serial = Some(a.clone());
            }
        }
    }

    let doc = InventoryDoc {
        device_count: devices.len(),
        devices,
        last_updated: now_rfc3339(),
    };
    file::write_json_atomic(&workdir.inventory_file(), &doc)?;
    console_logger::info_with_data(
        "Inventory written, devices:",
        &format!("{} ({} failed)", doc.device_count, failures),
    );
    Ok(())
}

/// Render the inventory as CSV, to stdout or a file.
pub fn export(workdir: &WorkDir, args: &ExportArgs) -> Result<()> {
    let inventory = Inventory::load(&workdir.inventory_file())?;
    let mut out = String::from(
        "serial,hostname,mgmt_ip,model,current_version,device_type,ha_state,peer_serial\n",
    );
    let mut devices: Vec<&Device> = inventory.iter().collect();
    devices.sort_by(|a, b| a.serial.cmp(&b.serial));
    for device in devices {
        out.push_str(&format!(
            "{},{},{},{},{},{:?},{},{}\n",
            device.serial,
            device.hostname,
            device.mgmt_ip,
            device.model,
            device.current_version,
            device.device_type,
            device.ha_state,
            device.peer_serial.as_deref().unwrap_or("")
        ));
    }

    match &args.output {
        Some(path) => {
            let mut handle =
                std::fs::File::create(path).context(WriteFile { path: path.clone() })?;
            handle
                .write_all(out.as_bytes())
                .context(WriteFile { path: path.clone() })?;
            console_logger::info_with_data("Inventory exported to:", &path.display().to_string());
        }
        None => print!("{out}"),
    }
    Ok(())
}

fn connect(
    workdir: &WorkDir,
    config: &UpgradeConfig,
    serial: &str,
) -> Result<Box<dyn DeviceApi>> {
    let inventory = Inventory::load(&workdir.inventory_file())?;
    let device = inventory.require(serial)?;
    Ok(Box::new(HttpDeviceApi::new(
        &device.mgmt_ip,
        &config.api,
        config.timeouts.clone(),
    )?))
}

async fn probe(
    mgmt_ip: &str,
    config: &UpgradeConfig,
    limiter: &RateLimiter,
) -> Result<Device> {
    let api = HttpDeviceApi::new(mgmt_ip, &config.api, config.timeouts.clone())?;
    let budget = config.discovery.retry_attempts.max(1);

    let mut attempt = 0u32;
    let info = loop {
        attempt += 1;
        limiter.acquire().await;
        match api.system_info().await {
            Ok(info) => break info,
            Err(error) if error.is_retryable() && attempt < budget => continue,
            Err(error) => return Err(error.into()),
        }
    };

    limiter.acquire().await;
    let ha_state = api.ha_state().await.unwrap_or(HaState::Unknown);
    let device_type = match ha_state {
        HaState::Active | HaState::Passive => DeviceType::HaPair,
        HaState::Standalone => DeviceType::Standalone,
        HaState::Unknown => DeviceType::Unknown,
    };

    Ok(Device {
        serial: info.serial,
        hostname: String::new(),
        mgmt_ip: mgmt_ip.to_string(),
        model: info.model,
        current_version: info.version,
        device_type,
        peer_serial: None,
        ha_state,
        discovered_at: now_rfc3339(),
    })
}

/// Rows of a CSV file with blanks, comments and a leading header skipped.
pub fn read_rows(path: &Path) -> Result<Vec<(usize, Vec<String>)>> {
    let text = std::fs::read_to_string(path).context(ReadCsv {
        path: path.to_path_buf(),
    })?;
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if idx == 0 && (line.starts_with("serial") || line.starts_with("mgmt_ip")) {
            continue;
        }
        rows.push((
            idx + 1,
            line.split(',').map(|field| field.trim().to_string()).collect(),
        ));
    }
    Ok(rows)
}

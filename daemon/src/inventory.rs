//! Read-only lookup over the inventory document written by the discovery
//! tool. The core never mutates it.

use crate::{
    common::{
        error::{DeviceNotInInventory, MissingManagementIp, Result},
        file,
    },
    device_api::HaState,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};

/// Kind of appliance deployment a serial belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Standalone,
    HaPair,
    Unknown,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Unknown
    }
}

/// One inventory entry. Immutable for the lifetime of a job; the live
/// software version is always re-read from the appliance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Device {
    pub serial: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub mgmt_ip: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub peer_serial: Option<String>,
    #[serde(default)]
    pub ha_state: HaState,
    #[serde(default)]
    pub discovered_at: String,
}

/// The inventory document shape shared with the discovery tool and the
/// web application.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InventoryDoc {
    pub devices: HashMap<String, Device>,
    #[serde(default)]
    pub device_count: usize,
    #[serde(default)]
    pub last_updated: String,
}

/// In-memory index over the inventory document.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    devices: HashMap<String, Device>,
}

impl Inventory {
    /// Load `devices/inventory.json`. An absent file is an empty fleet,
    /// not an error; jobs will then fail validation individually.
    pub fn load(path: &Path) -> Result<Self> {
        let doc: InventoryDoc = file::read_json_opt(path)?.unwrap_or_default();
        Ok(Self {
            devices: doc.devices,
        })
    }

    pub fn from_doc(doc: InventoryDoc) -> Self {
        Self {
            devices: doc.devices,
        }
    }

    pub fn lookup(&self, serial: &str) -> Option<&Device> {
        self.devices.get(serial)
    }

    /// Resolve a serial for an upgrade job. A missing entry or a missing
    /// management IP is fatal for any job touching the device.
    pub fn require(&self, serial: &str) -> Result<&Device> {
        let device = self
            .devices
            .get(serial)
            .ok_or_else(|| DeviceNotInInventory { serial }.build())?;
        if device.mgmt_ip.trim().is_empty() {
            return MissingManagementIp { serial }.fail();
        }
        Ok(device)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> InventoryDoc {
        let mut devices = HashMap::new();
        devices.insert(
            "001234567890".to_string(),
            Device {
                serial: "001234567890".to_string(),
                hostname: "edge-fw-01".to_string(),
                mgmt_ip: "10.20.0.11".to_string(),
                model: "BX-3200".to_string(),
                current_version: "10.5.1".to_string(),
                device_type: DeviceType::Standalone,
                peer_serial: None,
                ha_state: HaState::Standalone,
                discovered_at: "2026-07-01T10:00:00Z".to_string(),
            },
        );
        devices.insert(
            "001234567891".to_string(),
            Device {
                serial: "001234567891".to_string(),
                hostname: "edge-fw-02".to_string(),
                mgmt_ip: String::new(),
                model: "BX-3200".to_string(),
                current_version: "10.5.1".to_string(),
                device_type: DeviceType::Standalone,
                peer_serial: None,
                ha_state: HaState::Standalone,
                discovered_at: "2026-07-01T10:00:00Z".to_string(),
            },
        );
        InventoryDoc {
            device_count: devices.len(),
            devices,
            last_updated: "2026-07-01T10:00:00Z".to_string(),
        }
    }

    #[test]
    fn lookup_misses_return_none() {
        let inventory = Inventory::from_doc(sample_doc());
        assert!(inventory.lookup("nope").is_none());
        assert!(inventory.lookup("001234567890").is_some());
    }

    #[test]
    fn require_rejects_missing_management_ip() {
        let inventory = Inventory::from_doc(sample_doc());
        assert!(inventory.require("001234567890").is_ok());
        assert!(inventory.require("001234567891").is_err());
        assert!(inventory.require("absent").is_err());
    }

    #[test]
    fn absent_inventory_file_is_an_empty_fleet() {
        let tmp = tempfile::tempdir().unwrap();
        let inventory = Inventory::load(&tmp.path().join("inventory.json")).unwrap();
        assert!(inventory.is_empty());
    }
}

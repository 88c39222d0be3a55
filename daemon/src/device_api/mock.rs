//! A scripted in-memory appliance. Tests seed a `MockFleet`, hand it to
//! the daemon context as the connector, and assert against each device's
//! call log afterwards.

use crate::{
    device_api::{
        ApiConnector, ApiJobId, DeviceApi, DeviceApiError, DeviceMetrics, HaState, SoftwareInfo,
        SystemInfo,
    },
    inventory::Device,
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// Scripted failure injected into a download or install submission.
#[derive(Clone, Copy, Debug)]
pub enum MockFailure {
    Busy,
    Stall,
    JobFailed,
    VersionMissing,
}

impl MockFailure {
    fn into_error(self, what: &str) -> DeviceApiError {
        match self {
            MockFailure::Busy => DeviceApiError::Busy {
                message: format!("{what} queue is busy"),
            },
            MockFailure::Stall => DeviceApiError::Stall {
                job_id: what.to_string(),
                window: Duration::from_secs(1),
            },
            MockFailure::JobFailed => DeviceApiError::JobFailed {
                job_id: what.to_string(),
                message: "scripted failure".to_string(),
            },
            MockFailure::VersionMissing => DeviceApiError::VersionMissing {
                version: what.to_string(),
            },
        }
    }
}

/// The scripted state of one appliance.
#[derive(Debug, Default)]
pub struct MockState {
    pub serial: String,
    pub model: String,
    pub version: String,
    /// Roles returned by successive `ha_state` calls; the last one repeats
    /// once the queue drains.
    pub ha_states: VecDeque<HaState>,
    pub downloaded: Vec<String>,
    pub available: Vec<String>,
    pub disk_available_gb: f64,
    pub metrics: DeviceMetrics,
    /// Version staged by the last `install`; applied on reboot unless
    /// `apply_on_reboot` overrides it.
    pub staged_install: Option<String>,
    /// Versions the appliance lands on after successive reboots, for
    /// scripting installers that do not auto-chain.
    pub apply_on_reboot: VecDeque<String>,
    /// Failures popped per `download` submission.
    pub download_failures: VecDeque<MockFailure>,
    /// Failures popped per `install` submission.
    pub install_failures: VecDeque<MockFailure>,
    /// When set, `wait_download` blocks until the workflow is cancelled.
    pub hold_downloads: bool,
    /// Every capability call, in order, e.g. `download 11.1.0`.
    pub calls: Vec<String>,
    last_ha: HaState,
}

impl MockState {
    pub fn new(serial: &str, version: &str) -> Self {
        Self {
            serial: serial.to_string(),
            model: "BX-3200".to_string(),
            version: version.to_string(),
            disk_available_gb: 50.0,
            last_ha: HaState::Standalone,
            ..Default::default()
        }
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(name))
            .count()
    }

    fn next_ha(&mut self) -> HaState {
        if let Some(state) = self.ha_states.pop_front() {
            self.last_ha = state;
        }
        self.last_ha
    }
}

/// One scripted appliance session.
pub struct MockDeviceApi {
    state: Arc<Mutex<MockState>>,
}

impl MockDeviceApi {
    pub fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self { state }
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl DeviceApi for MockDeviceApi {
    async fn system_info(&self) -> Result<SystemInfo, DeviceApiError> {
        let state = self.state.lock().unwrap();
        Ok(SystemInfo {
            version: state.version.clone(),
            model: state.model.clone(),
            serial: state.serial.clone(),
        })
    }

    async fn ha_state(&self) -> Result<HaState, DeviceApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("ha_state".to_string());
        Ok(state.next_ha())
    }

    async fn metrics(&self) -> Result<DeviceMetrics, DeviceApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("metrics".to_string());
        let mut metrics = state.metrics.clone();
        metrics.disk_available_gb = state.disk_available_gb;
        Ok(metrics)
    }

    async fn software_check(&self) -> Result<(), DeviceApiError> {
        self.record("software_check".to_string());
        Ok(())
    }

    async fn software_info(&self) -> Result<SoftwareInfo, DeviceApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("software_info".to_string());
        Ok(SoftwareInfo {
            downloaded: state.downloaded.clone(),
            available: state.available.clone(),
        })
    }

    async fn disk_available(&self) -> Result<f64, DeviceApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("disk_available".to_string());
        Ok(state.disk_available_gb)
    }

    async fn download(&self, version: &str) -> Result<ApiJobId, DeviceApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("download {version}"));
        if let Some(failure) = state.download_failures.pop_front() {
            return Err(failure.into_error(version));
        }
        Ok(ApiJobId(format!("dl-{version}")))
    }

    async fn wait_download(
        &self,
        job: &ApiJobId,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError> {
        let hold = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("wait_download {job}"));
            state.hold_downloads
        };
        if hold {
            cancel.cancelled().await;
            return Err(DeviceApiError::Cancelled);
        }
        if cancel.is_cancelled() {
            return Err(DeviceApiError::Cancelled);
        }
        let version = job.0.trim_start_matches("dl-").to_string();
        let mut state = self.state.lock().unwrap();
        if !state.downloaded.contains(&version) {
            state.downloaded.push(version);
        }
        Ok(())
    }

    async fn install(&self, version: &str) -> Result<ApiJobId, DeviceApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("install {version}"));
        if let Some(failure) = state.install_failures.pop_front() {
            return Err(failure.into_error(version));
        }
        state.staged_install = Some(version.to_string());
        Ok(ApiJobId(format!("in-{version}")))
    }

    async fn wait_install(
        &self,
        job: &ApiJobId,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError> {
        self.record(format!("wait_install {job}"));
        if cancel.is_cancelled() {
            return Err(DeviceApiError::Cancelled);
        }
        Ok(())
    }

    async fn reboot(&self) -> Result<(), DeviceApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("reboot".to_string());
        if let Some(version) = state.apply_on_reboot.pop_front() {
            state.version = version;
            state.staged_install = None;
        } else if let Some(version) = state.staged_install.take() {
            state.version = version;
        }
        Ok(())
    }

    async fn wait_online(
        &self,
        _max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError> {
        self.record("wait_online".to_string());
        if cancel.is_cancelled() {
            return Err(DeviceApiError::Cancelled);
        }
        Ok(())
    }
}

/// A fleet of scripted appliances, installable as the daemon's connector.
#[derive(Default)]
pub struct MockFleet {
    devices: Mutex<HashMap<String, Arc<Mutex<MockState>>>>,
}

impl MockFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scripted appliance and keep a handle for assertions.
    pub fn insert(&self, state: MockState) -> Arc<Mutex<MockState>> {
        let serial = state.serial.clone();
        let shared = Arc::new(Mutex::new(state));
        self.devices
            .lock()
            .unwrap()
            .insert(serial, Arc::clone(&shared));
        shared
    }

    pub fn handle(&self, serial: &str) -> Option<Arc<Mutex<MockState>>> {
        self.devices.lock().unwrap().get(serial).cloned()
    }
}

impl ApiConnector for MockFleet {
    fn connect(&self, device: &Device) -> Result<Box<dyn DeviceApi>, DeviceApiError> {
        let state = self
            .devices
            .lock()
            .unwrap()
            .get(&device.serial)
            .cloned()
            .ok_or_else(|| DeviceApiError::Auth {
                endpoint: device.mgmt_ip.clone(),
            })?;
        Ok(Box::new(MockDeviceApi::new(state)))
    }
}

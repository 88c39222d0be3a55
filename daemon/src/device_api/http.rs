//! Production Device-API client speaking the appliance XML management API
//! over HTTPS. One instance is scoped to one workflow and one appliance.

use crate::{
    config::{ApiSettings, TimeoutSettings},
    device_api::{
        ApiConnector, ApiJobId, ArpEntry, Auth, DeviceApi, DeviceApiError, DeviceMetrics,
        EndpointParse, HaState, JobFailed, ResponseParse, RouteEntry, SoftwareInfo, Stall,
        SystemInfo, Unreachable,
    },
    inventory::Device,
};
use async_trait::async_trait;
use serde::Deserialize;
use snafu::ResultExt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Deadline for short management operations that have no dedicated
/// configured timeout.
const OP_TIMEOUT: Duration = Duration::from_secs(30);

/// First delay of the job-poll backoff. Doubles per attempt, capped at
/// `POLL_CAP`, with ±20% jitter.
const POLL_BASE: Duration = Duration::from_secs(2);
const POLL_CAP: Duration = Duration::from_secs(30);

/// First delay of the post-reboot health probe backoff.
const ONLINE_POLL_BASE: Duration = Duration::from_secs(5);

/// Consecutive transport failures tolerated while polling an async job
/// before the phase is failed.
const MAX_TRANSIENT_POLLS: u32 = 3;

#[derive(Clone)]
enum Credentials {
    ApiKey(String),
    Basic { username: String, password: String },
}

/// XML-over-HTTPS session with one appliance.
pub struct HttpDeviceApi {
    client: reqwest::Client,
    base_url: Url,
    endpoint: String,
    credentials: Credentials,
    timeouts: TimeoutSettings,
}

impl HttpDeviceApi {
    pub fn new(
        mgmt_ip: &str,
        api: &ApiSettings,
        timeouts: TimeoutSettings,
    ) -> Result<Self, DeviceApiError> {
        let endpoint = format!("https://{}:{}", mgmt_ip, api.port);
        let base_url = Url::parse(&endpoint).context(EndpointParse {
            endpoint: endpoint.clone(),
        })?;

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!api.verify_tls)
            .build()
            .context(Unreachable {
                endpoint: endpoint.clone(),
            })?;

        let credentials = if api.api_key.is_empty() {
            Credentials::Basic {
                username: api.username.clone(),
                password: api.password.clone(),
            }
        } else {
            Credentials::ApiKey(api.api_key.clone())
        };

        Ok(Self {
            client,
            base_url,
            endpoint,
            credentials,
            timeouts,
        })
    }

    /// Issue one management-API request and unwrap the response envelope.
    async fn op<T>(
        &self,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<T, DeviceApiError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self
            .base_url
            .join("api/")
            .context(EndpointParse {
                endpoint: self.endpoint.clone(),
            })?;

        let mut request = self.client.get(url).timeout(timeout).query(params);
        request = match &self.credentials {
            Credentials::ApiKey(key) => request.query(&[("key", key.as_str())]),
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        };

        let response = request.send().await.map_err(|source| {
            if source.is_timeout() {
                DeviceApiError::Timeout {
                    endpoint: self.endpoint.clone(),
                    timeout,
                }
            } else {
                DeviceApiError::Unreachable {
                    source,
                    endpoint: self.endpoint.clone(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Auth {
                endpoint: self.endpoint.clone(),
            }
            .fail();
        }

        let body = response.text().await.map_err(|source| {
            DeviceApiError::Unreachable {
                source,
                endpoint: self.endpoint.clone(),
            }
        })?;

        let envelope: Envelope<T> =
            quick_xml::de::from_str(&body).map_err(|error| DeviceApiError::ResponseParse {
                endpoint: self.endpoint.clone(),
                reason: error.to_string(),
            })?;

        if envelope.status != "success" {
            let msg = envelope.msg.unwrap_or_else(|| "unspecified error".to_string());
            return Err(classify_api_failure(&msg, &self.endpoint));
        }

        envelope.result.ok_or_else(|| {
            ResponseParse {
                endpoint: self.endpoint.clone(),
                reason: "response envelope carried no result".to_string(),
            }
            .build()
        })
    }

    async fn show_job(&self, job: &ApiJobId) -> Result<JobStatus, DeviceApiError> {
        let result: JobResult = self
            .op(&[("type", "op"), ("cmd", "show-job"), ("id", &job.0)], OP_TIMEOUT)
            .await?;
        Ok(result.job)
    }

    /// Shared poll loop for download and install jobs: exponential backoff
    /// with jitter, stall detection on unchanged progress, cooperative
    /// cancellation inside every iteration.
    async fn wait_job(
        &self,
        job: &ApiJobId,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError> {
        let stall_window = self.timeouts.job_stall();
        let mut last_progress: Option<u8> = None;
        let mut last_change = Instant::now();
        let mut transient_failures = 0u32;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(DeviceApiError::Cancelled);
            }

            match self.show_job(job).await {
                Ok(status) => {
                    transient_failures = 0;
                    if status.is_finished() {
                        return if status.succeeded() {
                            Ok(())
                        } else {
                            JobFailed {
                                job_id: job.0.clone(),
                                message: status.details.unwrap_or_default(),
                            }
                            .fail()
                        };
                    }
                    if last_progress != Some(status.progress) {
                        last_progress = Some(status.progress);
                        last_change = Instant::now();
                    } else if last_change.elapsed() > stall_window {
                        return Stall {
                            job_id: job.0.clone(),
                            window: stall_window,
                        }
                        .fail();
                    }
                }
                Err(error) if error.is_retryable() => {
                    transient_failures += 1;
                    if transient_failures > MAX_TRANSIENT_POLLS {
                        return Err(error);
                    }
                }
                Err(error) => return Err(error),
            }

            let delay = backoff_delay(attempt, POLL_BASE, POLL_CAP);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => return Err(DeviceApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[async_trait]
impl DeviceApi for HttpDeviceApi {
    async fn system_info(&self) -> Result<SystemInfo, DeviceApiError> {
        let result: SystemInfoResult = self
            .op(&[("type", "op"), ("cmd", "show-system-info")], OP_TIMEOUT)
            .await?;
        Ok(SystemInfo {
            version: result.system.sw_version,
            model: result.system.model,
            serial: result.system.serial,
        })
    }

    async fn ha_state(&self) -> Result<HaState, DeviceApiError> {
        let result: HaStateResult = self
            .op(&[("type", "op"), ("cmd", "show-ha-state")], OP_TIMEOUT)
            .await?;
        Ok(match result.ha.state.as_str() {
            "active" => HaState::Active,
            "passive" => HaState::Passive,
            "standalone" => HaState::Standalone,
            _ => HaState::Unknown,
        })
    }

    async fn metrics(&self) -> Result<DeviceMetrics, DeviceApiError> {
        let sessions: SessionInfoResult = self
            .op(&[("type", "op"), ("cmd", "show-session-info")], OP_TIMEOUT)
            .await?;
        let routes: RouteTableResult = self
            .op(&[("type", "op"), ("cmd", "show-routes")], OP_TIMEOUT)
            .await?;
        let arp: ArpTableResult = self
            .op(&[("type", "op"), ("cmd", "show-arp")], OP_TIMEOUT)
            .await?;
        let disk = self.disk_available().await?;

        Ok(DeviceMetrics {
            tcp_sessions: sessions.session.tcp,
            routes: routes
                .routes
                .entries
                .into_iter()
                .map(|e| RouteEntry {
                    destination: e.destination,
                    gateway: e.gateway,
                    interface: e.interface,
                })
                .collect(),
            arp_entries: arp
                .arp
                .entries
                .into_iter()
                .map(|e| ArpEntry {
                    ip: e.ip,
                    mac: e.mac,
                    interface: e.interface,
                })
                .collect(),
            disk_available_gb: disk,
        })
    }

    async fn software_check(&self) -> Result<(), DeviceApiError> {
        let _: AckResult = self
            .op(
                &[("type", "op"), ("cmd", "refresh-software")],
                self.timeouts.software_check(),
            )
            .await?;
        Ok(())
    }

    async fn software_info(&self) -> Result<SoftwareInfo, DeviceApiError> {
        let result: SoftwareResult = self
            .op(
                &[("type", "op"), ("cmd", "show-software")],
                self.timeouts.software_info(),
            )
            .await?;

        let mut info = SoftwareInfo::default();
        for entry in result.versions.entries {
            info.available.push(entry.version.clone());
            if entry.downloaded == "yes" {
                info.downloaded.push(entry.version);
            }
        }
        Ok(info)
    }

    async fn disk_available(&self) -> Result<f64, DeviceApiError> {
        let result: DiskResult = self
            .op(&[("type", "op"), ("cmd", "show-disk")], OP_TIMEOUT)
            .await?;
        Ok(result.disk.available_gb)
    }

    async fn download(&self, version: &str) -> Result<ApiJobId, DeviceApiError> {
        let result: EnqueuedResult = self
            .op(
                &[
                    ("type", "job"),
                    ("action", "download"),
                    ("version", version),
                ],
                OP_TIMEOUT,
            )
            .await?;
        Ok(ApiJobId(result.job))
    }

    async fn wait_download(
        &self,
        job: &ApiJobId,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError> {
        self.wait_job(job, cancel).await
    }

    async fn install(&self, version: &str) -> Result<ApiJobId, DeviceApiError> {
        let result: EnqueuedResult = self
            .op(
                &[
                    ("type", "job"),
                    ("action", "install"),
                    ("version", version),
                ],
                OP_TIMEOUT,
            )
            .await?;
        Ok(ApiJobId(result.job))
    }

    async fn wait_install(
        &self,
        job: &ApiJobId,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError> {
        self.wait_job(job, cancel).await
    }

    async fn reboot(&self) -> Result<(), DeviceApiError> {
        let result: Result<AckResult, DeviceApiError> = self
            .op(&[("type", "op"), ("cmd", "request-restart")], OP_TIMEOUT)
            .await;
        match result {
            Ok(_) => Ok(()),
            // The appliance drops the management connection while going
            // down; that is an acknowledgement, not a failure.
            Err(DeviceApiError::Unreachable { .. }) | Err(DeviceApiError::Timeout { .. }) => {
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn wait_online(
        &self,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceApiError> {
        let deadline = Instant::now() + max_wait;
        let cap = self.timeouts.max_reboot_poll_interval();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(DeviceApiError::Cancelled);
            }
            if self.system_info().await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DeviceApiError::DeadlineExceeded { max_wait });
            }

            let delay = backoff_delay(attempt, ONLINE_POLL_BASE, cap);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => return Err(DeviceApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Builds per-workflow HTTPS sessions from inventory entries.
pub struct HttpConnector {
    api: ApiSettings,
    timeouts: TimeoutSettings,
}

impl HttpConnector {
    pub fn new(api: ApiSettings, timeouts: TimeoutSettings) -> Self {
        Self { api, timeouts }
    }
}

impl ApiConnector for HttpConnector {
    fn connect(&self, device: &Device) -> Result<Box<dyn DeviceApi>, DeviceApiError> {
        Ok(Box::new(HttpDeviceApi::new(
            &device.mgmt_ip,
            &self.api,
            self.timeouts.clone(),
        )?))
    }
}

/// Exponential backoff with ±20% jitter.
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let capped = exp.min(cap);
    let jitter = capped.as_secs_f64() * (fastrand::f64() * 0.4 - 0.2);
    Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.1))
}

fn classify_api_failure(msg: &str, endpoint: &str) -> DeviceApiError {
    let lowered = msg.to_ascii_lowercase();
    if lowered.contains("busy") || lowered.contains("queue") {
        DeviceApiError::Busy {
            message: msg.to_string(),
        }
    } else if lowered.contains("invalid credential") || lowered.contains("unauthorized") {
        DeviceApiError::Auth {
            endpoint: endpoint.to_string(),
        }
    } else if lowered.contains("unknown version") || lowered.contains("not downloaded") {
        let version = msg.split_whitespace().last().unwrap_or("").to_string();
        DeviceApiError::VersionMissing { version }
    } else {
        DeviceApiError::ResponseParse {
            endpoint: endpoint.to_string(),
            reason: msg.to_string(),
        }
    }
}

// Wire shapes of the management API responses.

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "@status")]
    status: String,
    #[serde(default)]
    msg: Option<String>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct SystemInfoResult {
    system: SystemBlock,
}

#[derive(Deserialize)]
struct SystemBlock {
    #[serde(rename = "sw-version")]
    sw_version: String,
    model: String,
    serial: String,
}

#[derive(Deserialize)]
struct HaStateResult {
    ha: HaBlock,
}

#[derive(Deserialize)]
struct HaBlock {
    state: String,
}

#[derive(Deserialize)]
struct SessionInfoResult {
    session: SessionBlock,
}

#[derive(Deserialize)]
struct SessionBlock {
    tcp: u64,
}

#[derive(Deserialize)]
struct RouteTableResult {
    routes: RouteEntries,
}

#[derive(Deserialize, Default)]
struct RouteEntries {
    #[serde(rename = "entry", default)]
    entries: Vec<RouteXml>,
}

#[derive(Deserialize)]
struct RouteXml {
    destination: String,
    gateway: String,
    interface: String,
}

#[derive(Deserialize)]
struct ArpTableResult {
    arp: ArpEntries,
}

#[derive(Deserialize, Default)]
struct ArpEntries {
    #[serde(rename = "entry", default)]
    entries: Vec<ArpXml>,
}

#[derive(Deserialize)]
struct ArpXml {
    ip: String,
    mac: String,
    interface: String,
}

#[derive(Deserialize)]
struct DiskResult {
    disk: DiskBlock,
}

#[derive(Deserialize)]
struct DiskBlock {
    #[serde(rename = "available-gb")]
    available_gb: f64,
}

#[derive(Deserialize)]
struct SoftwareResult {
    versions: SoftwareEntries,
}

#[derive(Deserialize, Default)]
struct SoftwareEntries {
    #[serde(rename = "entry", default)]
    entries: Vec<SoftwareXml>,
}

#[derive(Deserialize)]
struct SoftwareXml {
    version: String,
    #[serde(default)]
    downloaded: String,
}

#[derive(Deserialize)]
struct AckResult {
    #[serde(default)]
    #[allow(dead_code)]
    line: Option<String>,
}

#[derive(Deserialize)]
struct EnqueuedResult {
    job: String,
}

#[derive(Deserialize)]
struct JobResult {
    job: JobStatus,
}

#[derive(Deserialize)]
struct JobStatus {
    #[allow(dead_code)]
    id: String,
    status: String,
    #[serde(default)]
    result: String,
    #[serde(default)]
    progress: u8,
    #[serde(default)]
    details: Option<String>,
}

impl JobStatus {
    fn is_finished(&self) -> bool {
        self.status == "FIN"
    }

    fn succeeded(&self) -> bool {
        self.result == "OK"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_success_payload() {
        let xml = r#"
            <response status="success">
              <result>
                <system>
                  <sw-version>10.5.1</sw-version>
                  <model>BX-3200</model>
                  <serial>001234567890</serial>
                </system>
              </result>
            </response>"#;
        let envelope: Envelope<SystemInfoResult> = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(envelope.status, "success");
        assert_eq!(envelope.result.unwrap().system.sw_version, "10.5.1");
    }

    #[test]
    fn envelope_parses_error_payload() {
        let xml = r#"<response status="error"><msg>device is busy</msg></response>"#;
        let envelope: Envelope<AckResult> = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(envelope.status, "error");
        let classified = classify_api_failure(envelope.msg.as_deref().unwrap(), "x");
        assert!(matches!(classified, DeviceApiError::Busy { .. }));
    }

    #[test]
    fn job_status_parses_progress() {
        let xml = r#"
            <response status="success">
              <result>
                <job><id>42</id><status>ACT</status><result>PEND</result><progress>37</progress></job>
              </result>
            </response>"#;
        let envelope: Envelope<JobResult> = quick_xml::de::from_str(xml).unwrap();
        let job = envelope.result.unwrap().job;
        assert!(!job.is_finished());
        assert_eq!(job.progress, 37);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(30);
        let early = backoff_delay(0, base, cap);
        let late = backoff_delay(10, base, cap);
        assert!(early <= Duration::from_secs(3));
        assert!(late <= Duration::from_secs(36));
        assert!(late >= Duration::from_secs(24));
    }
}

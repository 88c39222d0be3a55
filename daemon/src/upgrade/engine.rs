//! The per-device upgrade workflow: a crash-recoverable state machine
//! driving one appliance through plan, pre-flight, download, install,
//! reboot and post-flight. The workflow owns all writes to its
//! `DeviceStatus` file and checks its cancellation token between phases
//! and inside every wait.

use crate::{
    common::error::{
        DeviceApi as DeviceApiCtx, DownloadVerification, Error, InstallLoopExhausted, Result,
        VersionOffPath, WorkflowAlreadyActive, WorkflowCancelled,
    },
    daemon::DaemonContext,
    device_api::{DeviceApi, HaState},
    inventory::Device,
    job::Job,
    status::device::{DeviceStatus, DiskSpace, UpgradeStatus},
    validator::{MetricsRecord, Validator},
};
use snafu::ResultExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Simulated durations substituted for mutating calls in dry-run mode.
const DRY_RUN_DOWNLOAD: Duration = Duration::from_secs(2);
const DRY_RUN_INSTALL: Duration = Duration::from_secs(3);
const DRY_RUN_REBOOT: Duration = Duration::from_secs(5);

/// Terminal result of one device workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceOutcome {
    Complete,
    DownloadComplete,
    Skipped,
    Failed,
    Cancelled,
}

impl DeviceOutcome {
    /// Skipped devices count as successful: nothing needed doing.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DeviceOutcome::Complete | DeviceOutcome::DownloadComplete | DeviceOutcome::Skipped
        )
    }
}

/// Index of `live` inside `path`, by string equality.
fn position_in(path: &[String], live: &str) -> Option<usize> {
    path.iter().position(|hop| hop == live)
}

/// Run one device through its workflow. Every failure is captured into
/// the device's status record; this function never panics the worker.
pub async fn run_device(
    ctx: &DaemonContext,
    job: &Job,
    serial: &str,
    ha_role: Option<HaState>,
    cancel: &CancellationToken,
) -> DeviceOutcome {
    let mut workflow = match DeviceWorkflow::start(ctx, job, serial, ha_role, cancel) {
        Ok(workflow) => workflow,
        Err(error) => {
            warn!(device.serial = %serial, %error, "Workflow could not start");
            // A status record owned by a live workflow elsewhere must not
            // be touched from here.
            if !matches!(error, Error::WorkflowAlreadyActive { .. }) {
                record_startup_failure(ctx, serial, &error);
            }
            return DeviceOutcome::Failed;
        }
    };
    workflow.drive().await
}

/// Leave a failed status record even when the workflow never got as far
/// as owning one.
fn record_startup_failure(ctx: &DaemonContext, serial: &str, error: &Error) {
    let mut status = match ctx.statuses.load(serial) {
        Ok(Some(status)) => status,
        _ => DeviceStatus::new(serial, ""),
    };
    status.upgrade_status = UpgradeStatus::Failed;
    status.current_phase = "startup".to_string();
    status.upgrade_message = error.to_string();
    status.record_error("startup", &error.to_string(), "");
    let _ = ctx.statuses.save(&mut status);
}

struct DeviceWorkflow<'a> {
    ctx: &'a DaemonContext,
    job: &'a Job,
    serial: String,
    api: Box<dyn DeviceApi>,
    validator: Validator,
    cancel: CancellationToken,
    status: DeviceStatus,
}

impl<'a> DeviceWorkflow<'a> {
    fn start(
        ctx: &'a DaemonContext,
        job: &'a Job,
        serial: &str,
        ha_role: Option<HaState>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let device: &Device = ctx.inventory.require(serial)?;

        let status = match ctx.statuses.load(serial)? {
            // A busy record with a fresh heartbeat means another daemon
            // instance is driving this serial; refuse to race it.
            Some(existing)
                if existing.upgrade_status.is_busy()
                    && existing.updated_within(ctx.config.active_grace()) =>
            {
                return WorkflowAlreadyActive {
                    serial,
                    status: format!("{:?}", existing.upgrade_status),
                    last_updated: existing.last_updated,
                }
                .fail();
            }
            // An interrupted run resumes with its bookkeeping intact.
            Some(existing) if !existing.upgrade_status.is_terminal() => existing,
            // A finished record starts a fresh run; only the anchor
            // survives, and only through the store's enforcement.
            Some(existing) => {
                let mut fresh = DeviceStatus::new(serial, &device.hostname);
                fresh.starting_version = existing.starting_version;
                fresh
            }
            None => DeviceStatus::new(serial, &device.hostname),
        };

        let api = ctx
            .connector
            .connect(device)
            .context(DeviceApiCtx { serial })?;

        let mut workflow = Self {
            ctx,
            job,
            serial: serial.to_string(),
            api,
            validator: ctx.validator(),
            cancel: cancel.clone(),
            status,
        };
        workflow.status.hostname = device.hostname.clone();
        workflow.status.ha_role = ha_role.map(|role| role.to_string());
        Ok(workflow)
    }

    async fn drive(&mut self) -> DeviceOutcome {
        match self.execute().await {
            Ok(outcome) => outcome,
            Err(error) if error.is_cancellation() => {
                info!(
                    device.serial = %self.serial,
                    phase = %self.status.current_phase,
                    "Workflow cancelled"
                );
                self.status.upgrade_status = UpgradeStatus::Cancelled;
                self.status.upgrade_message = format!(
                    "cancelled during {}",
                    self.status.current_phase
                );
                let _ = self.ctx.statuses.save(&mut self.status);
                DeviceOutcome::Cancelled
            }
            Err(error) => {
                warn!(device.serial = %self.serial, %error, "Workflow failed");
                let phase = self.status.current_phase.clone();
                self.status
                    .record_error(&phase, &error.to_string(), &format!("{error:?}"));
                self.status.upgrade_status = UpgradeStatus::Failed;
                self.status.upgrade_message = error.to_string();
                let _ = self.ctx.statuses.save(&mut self.status);
                DeviceOutcome::Failed
            }
        }
    }

    async fn execute(&mut self) -> Result<DeviceOutcome> {
        let (path, start_index) = match self.plan().await? {
            Planned::Skip => return Ok(DeviceOutcome::Skipped),
            Planned::AlreadyAtTarget => return Ok(DeviceOutcome::Complete),
            Planned::Work { path, index } => (path, index),
        };

        self.check_cancelled("planning")?;

        let pre_flight = self.pre_flight().await?;
        self.check_cancelled("pre_flight")?;

        self.download_phase(&path, start_index).await?;

        if self.job.job_type.is_download_only() {
            self.status.ready_for_install = true;
            self.status.current_path_index = path.len();
            self.set_phase(
                UpgradeStatus::DownloadComplete,
                "download_complete",
                100,
                "all images staged; ready for install",
            )?;
            return Ok(DeviceOutcome::DownloadComplete);
        }

        self.check_cancelled("downloading")?;
        self.install_cycles(&path).await?;

        self.post_flight(&pre_flight).await?;

        self.status.current_path_index = path.len();
        self.set_phase(
            UpgradeStatus::Complete,
            "complete",
            100,
            format!("upgraded to {}", self.status.current_version),
        )?;
        info!(
            device.serial = %self.serial,
            version = %self.status.current_version,
            "Upgrade complete"
        );
        Ok(DeviceOutcome::Complete)
    }

    /// Anchor the run, look up the path, and place the live version on it.
    async fn plan(&mut self) -> Result<Planned> {
        self.status.current_phase = "planning".to_string();
        let live = self
            .api
            .system_info()
            .await
            .context(DeviceApiCtx {
                serial: &self.serial,
            })?
            .version;

        self.status.anchor_starting_version(&live);
        self.status.current_version = live.clone();
        let anchor = self
            .status
            .starting_version
            .clone()
            .unwrap_or_else(|| live.clone());

        let path = match self.ctx.paths.plan(&anchor) {
            Some(path) => path.to_vec(),
            None => {
                info!(
                    device.serial = %self.serial,
                    version = %anchor,
                    "No upgrade path; skipping device"
                );
                self.status.skip_reason =
                    Some(format!("version {anchor} has no entry in the upgrade-path table"));
                self.set_phase(
                    UpgradeStatus::Skipped,
                    "planning",
                    0,
                    format!("no upgrade path from {anchor}"),
                )?;
                return Ok(Planned::Skip);
            }
        };

        let target = path.last().cloned().unwrap_or_default();
        self.status.upgrade_path = path.clone();
        self.status.target_version = target.clone();

        if live == target {
            self.status.current_path_index = path.len();
            self.set_phase(
                UpgradeStatus::Complete,
                "planning",
                100,
                format!("already at target {target}"),
            )?;
            return Ok(Planned::AlreadyAtTarget);
        }

        // The path was designed for the anchor; a live version that is on
        // it resumes mid-path, anything else re-plans from the start.
        let index = position_in(&path, &live).unwrap_or(0);
        self.status.current_path_index = index;
        self.ctx.statuses.save(&mut self.status)?;

        Ok(Planned::Work { path, index })
    }

    async fn pre_flight(&mut self) -> Result<MetricsRecord> {
        self.set_phase(
            UpgradeStatus::Validating,
            "pre_flight",
            5,
            "collecting baseline metrics",
        )?;
        self.validator.collect(&self.serial, self.api.as_ref()).await
    }

    /// Download every remaining image before anything is installed. The
    /// disk gate runs before each download, already-present images are
    /// skipped, and the phase ends with a hard verification that the
    /// appliance holds everything the path needs.
    async fn download_phase(&mut self, path: &[String], start_index: usize) -> Result<()> {
        let remaining = &path[start_index..];
        self.set_phase(
            UpgradeStatus::Downloading,
            "downloading",
            10,
            format!("{} image(s) to stage", remaining.len()),
        )?;

        self.api
            .software_check()
            .await
            .context(DeviceApiCtx {
                serial: &self.serial,
            })?;

        for (done, version) in remaining.iter().enumerate() {
            self.check_cancelled("downloading")?;

            let available_gb = self
                .validator
                .disk_precheck(
                    &self.serial,
                    self.api.as_ref(),
                    self.ctx.config.download.min_disk_gb,
                )
                .await;
            self.status.disk_space = Some(DiskSpace {
                available_gb: *available_gb.as_ref().unwrap_or(&0.0),
                required_gb: self.ctx.config.download.min_disk_gb,
                check_passed: available_gb.is_ok(),
            });
            self.ctx.statuses.save(&mut self.status)?;
            available_gb?;

            let software = self
                .api
                .software_info()
                .await
                .context(DeviceApiCtx {
                    serial: &self.serial,
                })?;
            if software.downloaded.iter().any(|v| v == version) {
                info!(
                    device.serial = %self.serial,
                    version = %version,
                    "Image already on device; skipping download"
                );
                self.status.skipped_versions.push(version.clone());
                self.ctx.statuses.save(&mut self.status)?;
                continue;
            }

            let progress = 10 + (50 * done / remaining.len().max(1)) as u8;
            self.set_phase(
                UpgradeStatus::Downloading,
                "downloading",
                progress,
                format!("downloading {version}"),
            )?;

            if self.job.dry_run {
                self.cancellable_sleep(DRY_RUN_DOWNLOAD, "downloading").await?;
            } else {
                self.download_with_retry(version).await?;
            }

            self.status.downloaded_versions.push(version.clone());
            self.ctx.statuses.save(&mut self.status)?;
        }

        // Hard gate: the device must now hold every remaining image. A
        // dry run staged nothing, so there is nothing to verify.
        if !self.job.dry_run {
            let software = self
                .api
                .software_info()
                .await
                .context(DeviceApiCtx {
                    serial: &self.serial,
                })?;
            let missing: Vec<String> = remaining
                .iter()
                .filter(|v| !software.downloaded.contains(v))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return DownloadVerification {
                    serial: &self.serial,
                    missing,
                }
                .fail();
            }
        }
        Ok(())
    }

    /// One download submission plus its wait, retried with exponential
    /// backoff within the configured budget.
    async fn download_with_retry(&mut self, version: &str) -> Result<()> {
        let budget = self.ctx.config.download.retry_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result: std::result::Result<(), crate::device_api::DeviceApiError> = async {
                let job = self.api.download(version).await?;
                self.api.wait_download(&job, &self.cancel).await
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(error) if error.is_cancellation() => {
                    return Err(error).context(DeviceApiCtx {
                        serial: &self.serial,
                    })
                }
                Err(error) if attempt < budget => {
                    warn!(
                        device.serial = %self.serial,
                        version = %version,
                        attempt,
                        %error,
                        "Download attempt failed; retrying"
                    );
                    let delay = Duration::from_secs(5u64.saturating_mul(1 << attempt.min(6)));
                    self.cancellable_sleep(delay, "downloading").await?;
                }
                Err(error) => {
                    return Err(error).context(DeviceApiCtx {
                        serial: &self.serial,
                    })
                }
            }
        }
    }

    /// Install toward the target, rebooting and re-reading the live
    /// version after each cycle. Installers that auto-chain finish in one
    /// cycle; others advance one hop per cycle, bounded by the path
    /// length.
    async fn install_cycles(&mut self, path: &[String]) -> Result<()> {
        let target = path.last().cloned().unwrap_or_default();
        let mut install_target = target.clone();
        let mut cycles = 0usize;

        loop {
            self.check_cancelled("installing")?;
            self.set_phase(
                UpgradeStatus::Installing,
                "installing",
                70,
                format!("installing {install_target}"),
            )?;

            if self.job.dry_run {
                self.cancellable_sleep(DRY_RUN_INSTALL, "installing").await?;
            } else {
                let job = self
                    .api
                    .install(&install_target)
                    .await
                    .context(DeviceApiCtx {
                        serial: &self.serial,
                    })?;
                self.api
                    .wait_install(&job, &self.cancel)
                    .await
                    .context(DeviceApiCtx {
                        serial: &self.serial,
                    })?;
            }

            self.check_cancelled("installing")?;
            self.set_phase(
                UpgradeStatus::Rebooting,
                "rebooting",
                85,
                "rebooting into the new image",
            )?;

            if self.job.dry_run {
                self.cancellable_sleep(DRY_RUN_REBOOT, "rebooting").await?;
                self.status.current_version = target.clone();
                self.status.current_path_index = path.len();
                self.ctx.statuses.save(&mut self.status)?;
                return Ok(());
            }

            self.api.reboot().await.context(DeviceApiCtx {
                serial: &self.serial,
            })?;
            self.api
                .wait_online(self.ctx.config.timeouts.reboot_max_wait(), &self.cancel)
                .await
                .context(DeviceApiCtx {
                    serial: &self.serial,
                })?;

            let live = self
                .api
                .system_info()
                .await
                .context(DeviceApiCtx {
                    serial: &self.serial,
                })?
                .version;
            self.status.current_version = live.clone();

            if live == target {
                self.status.current_path_index = path.len();
                self.ctx.statuses.save(&mut self.status)?;
                return Ok(());
            }

            let landed = position_in(path, &live).ok_or_else(|| {
                VersionOffPath {
                    serial: &self.serial,
                    version: &live,
                }
                .build()
            })?;
            self.status.current_path_index = landed + 1;
            self.ctx.statuses.save(&mut self.status)?;

            cycles += 1;
            if cycles >= path.len() {
                return InstallLoopExhausted {
                    serial: &self.serial,
                    target,
                    cycles,
                }
                .fail();
            }
            install_target = path[landed + 1].clone();
            info!(
                device.serial = %self.serial,
                landed = %live,
                next = %install_target,
                "Installer did not chain; continuing along the path"
            );
        }
    }

    async fn post_flight(&mut self, pre_flight: &MetricsRecord) -> Result<()> {
        self.set_phase(
            UpgradeStatus::Validating,
            "post_flight",
            95,
            "comparing post-upgrade metrics",
        )?;
        let post = self
            .validator
            .collect(&self.serial, self.api.as_ref())
            .await?;
        let report = self.validator.compare(pre_flight, &post);
        self.validator
            .persist_post_flight(pre_flight, &post, &report)?;

        // Margin failures are operator-review material, never fatal.
        if !report.validation_passed {
            warn!(
                device.serial = %self.serial,
                "Post-flight validation outside margins; continuing"
            );
            self.status.upgrade_message =
                "post-flight validation outside margins; see validation artifacts".to_string();
            self.ctx.statuses.save(&mut self.status)?;
        }
        Ok(())
    }

    fn set_phase(
        &mut self,
        status: UpgradeStatus,
        phase: &str,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<()> {
        self.status.upgrade_status = status;
        self.status.current_phase = phase.to_string();
        self.status.progress = progress;
        self.status.upgrade_message = message.into();
        self.ctx.statuses.save(&mut self.status)
    }

    fn check_cancelled(&self, phase: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return WorkflowCancelled {
                serial: &self.serial,
                phase,
            }
            .fail();
        }
        Ok(())
    }

    /// Every blocking sleep is a cancellable wait.
    async fn cancellable_sleep(&self, duration: Duration, phase: &str) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => WorkflowCancelled {
                serial: &self.serial,
                phase,
            }
            .fail(),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

enum Planned {
    Skip,
    AlreadyAtTarget,
    Work { path: Vec<String>, index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_in_uses_string_equality() {
        let path = vec![
            "10.1.0".to_string(),
            "10.5.1".to_string(),
            "11.1.0".to_string(),
        ];
        assert_eq!(position_in(&path, "10.5.1"), Some(1));
        assert_eq!(position_in(&path, "9.0.0"), None);
    }

    #[test]
    fn skipped_devices_count_as_success() {
        assert!(DeviceOutcome::Skipped.is_success());
        assert!(DeviceOutcome::DownloadComplete.is_success());
        assert!(!DeviceOutcome::Failed.is_success());
        assert!(!DeviceOutcome::Cancelled.is_success());
    }
}

use clap::{Parser, Subcommand};
use std::{path::PathBuf, time::Duration};

/// Operator CLI for the Bastion fleet upgrade orchestrator. Every
/// subcommand works through the file-system control plane; status is
/// always also readable directly from the files.
#[derive(Parser, Debug)]
#[clap(author, version, about, name = "bastionctl")]
pub struct CliArgs {
    /// Work directory holding the file-system control plane.
    #[clap(long, global = true, env = "BASTION_UPGRADE_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub operation: Operation,
}

#[derive(Subcommand, Debug)]
pub enum Operation {
    /// Manage the orchestrator daemon.
    #[clap(subcommand)]
    Daemon(DaemonOps),

    /// Submit and inspect upgrade jobs.
    #[clap(subcommand)]
    Job(JobOps),

    /// Inspect and query fleet devices.
    #[clap(subcommand)]
    Device(DeviceOps),

    /// Submit full upgrades for the standalone devices listed in a CSV.
    Upgrade(BatchArgs),

    /// Submit full upgrades for the HA pairs listed in a CSV.
    UpgradeHaPairs(BatchArgs),

    /// Pre-stage images for the standalone devices listed in a CSV.
    Download(BatchArgs),

    /// Pre-stage images for the HA pairs listed in a CSV.
    DownloadHaPairs(BatchArgs),

    /// Show or edit the daemon configuration document.
    #[clap(subcommand)]
    Config(ConfigOps),

    /// Inspect the upgrade-path table.
    #[clap(subcommand)]
    Path(PathOps),
}

#[derive(Subcommand, Debug)]
pub enum DaemonOps {
    /// Spawn the daemon in the background.
    Start,
    /// Signal the daemon to drain and stop.
    Stop(StopArgs),
    /// Stop, then start again.
    Restart(StopArgs),
    /// Print the daemon status snapshot.
    Status,
}

#[derive(clap::Args, Debug)]
pub struct StopArgs {
    /// How long to wait for the daemon to drain.
    #[clap(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub wait: Duration,
}

#[derive(Subcommand, Debug)]
pub enum JobOps {
    /// Submit one job for one device or one HA pair.
    Submit(SubmitArgs),
    /// List jobs across every queue directory.
    List,
    /// Print one job and its device status records.
    Status { job_id: String },
    /// Request cancellation of an active job.
    Cancel(CancelArgs),
}

#[derive(clap::Args, Debug)]
pub struct SubmitArgs {
    /// Device serial; pass twice for an HA pair.
    #[clap(long = "device", required = true)]
    pub devices: Vec<String>,

    /// Stage images only; do not install or reboot.
    #[clap(long)]
    pub download_only: bool,

    /// Display name for an HA pair.
    #[clap(long, default_value = "")]
    pub ha_pair_name: String,

    /// Walk the full pipeline with mutating calls replaced by sleeps.
    #[clap(long)]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug)]
pub struct CancelArgs {
    pub job_id: String,

    /// Free-text reason recorded with the cancellation.
    #[clap(long, default_value = "")]
    pub reason: String,
}

#[derive(Subcommand, Debug)]
pub enum DeviceOps {
    /// List the inventory.
    List,
    /// Print one device's workflow status record.
    Status { serial: String },
    /// Collect and persist a pre-flight validation snapshot.
    Validate { serial: String },
    /// Print live operational metrics.
    Metrics { serial: String },
    /// Query the appliances in a seed CSV and rewrite the inventory.
    Discover(DiscoverArgs),
    /// Render the inventory as CSV.
    Export(ExportArgs),
}

#[derive(clap::Args, Debug)]
pub struct DiscoverArgs {
    /// Seed CSV: `mgmt_ip[,ha_pair_name]` per row.
    pub csv: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct ExportArgs {
    /// Output file; stdout when omitted.
    #[clap(long)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    /// CSV of serials (one per row) or pairs (`serial_a,serial_b[,name]`).
    pub csv: PathBuf,

    /// Walk the full pipeline with mutating calls replaced by sleeps.
    #[clap(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigOps {
    /// Set one configuration field by dotted key, e.g.
    /// `workers.pool_size 8`.
    Set { key: String, value: String },
    /// Print the effective configuration.
    Show,
}

#[derive(Subcommand, Debug)]
pub enum PathOps {
    /// Print the upgrade-path table.
    Show,
    /// Check the table for empty sequences, repeats and cycles.
    Validate,
}

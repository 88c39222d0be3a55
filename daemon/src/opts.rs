use clap::Parser;
use std::path::PathBuf;

/// Arguments of the `bastion-upgraded` binary.
#[derive(Parser, Debug)]
#[clap(author, version, about = "Fleet upgrade orchestrator daemon")]
pub struct CliArgs {
    /// Work directory holding the file-system control plane. Falls back
    /// to the environment, the user config file, then the default.
    #[clap(long, env = "BASTION_UPGRADE_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `upgrade_daemon=debug`.
    #[clap(long, default_value = "info")]
    log_level: String,
}

impl CliArgs {
    pub fn work_dir(&self) -> Option<PathBuf> {
        self.work_dir.clone()
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

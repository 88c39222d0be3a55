//! Command Intake: consumes cancellation commands dropped into
//! `commands/incoming/` by the CLI or the web application. Every file is
//! consumed exactly once and lands in `commands/processed/` with a result
//! note beside it.

use crate::{
    common::{error::Result, file},
    daemon::DaemonContext,
    status::now_rfc3339,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandTarget {
    Job,
    Device,
}

/// The command descriptor shared with the CLI and the web application.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    pub target: CommandTarget,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub device_serial: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Result note written beside the consumed command file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandResult {
    pub processed_at: String,
    pub note: String,
}

pub struct CommandIntake {
    ctx: Arc<DaemonContext>,
}

impl CommandIntake {
    pub fn new(ctx: Arc<DaemonContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(self, interval: Duration) {
        let shutdown = self.ctx.shutdown();
        loop {
            if let Err(error) = self.scan_once() {
                warn!(%error, "Command scan failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One pass over `commands/incoming/`, oldest first.
    pub fn scan_once(&self) -> Result<()> {
        for path in file::scan_json_files(&self.ctx.workdir.commands_incoming())? {
            let note = match file::read_json_opt::<Command>(&path) {
                Ok(Some(command)) => self.dispatch(&command),
                Ok(None) => continue,
                Err(error) => format!("invalid command file: {error}"),
            };
            self.retire(&path, note)?;
        }
        Ok(())
    }

    fn dispatch(&self, command: &Command) -> String {
        if command.command != constants::CANCEL_UPGRADE_COMMAND {
            return format!("unsupported command '{}'", command.command);
        }
        match command.target {
            CommandTarget::Job => {
                let signalled = self.ctx.registry.cancel_job(&command.job_id);
                if signalled == 0 {
                    format!("no-op: job {} is not active", command.job_id)
                } else {
                    info!(
                        job.id = %command.job_id,
                        devices = signalled,
                        reason = %command.reason,
                        "Cancellation signalled for job"
                    );
                    format!("cancellation signalled to {signalled} device workflow(s)")
                }
            }
            CommandTarget::Device => {
                if self.ctx.registry.cancel_device(&command.device_serial) {
                    info!(
                        device.serial = %command.device_serial,
                        reason = %command.reason,
                        "Cancellation signalled for device"
                    );
                    "cancellation signalled".to_string()
                } else {
                    format!(
                        "no-op: device {} is not active",
                        command.device_serial
                    )
                }
            }
        }
    }

    /// Move the consumed file to `processed/` and leave the result note.
    fn retire(&self, path: &Path, note: String) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("command.json")
            .to_string();
        let processed = self.ctx.workdir.commands_processed();

        let result = CommandResult {
            processed_at: now_rfc3339(),
            note,
        };
        file::write_json_atomic(&processed.join(format!("{name}.result.json")), &result)?;
        file::move_file(path, &processed.join(&name))
    }
}

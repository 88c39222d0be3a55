//! Typed access to the control-plane directory layout.

use crate::common::{
    error::{Result, WorkDirResolve},
    file,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// User config file consulted while resolving the work directory.
#[derive(Deserialize)]
struct UserConfig {
    work_dir: Option<PathBuf>,
}

/// The root of the file-system control plane shared with the CLI and the
/// web application.
#[derive(Clone, Debug)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Wrap an already-resolved root.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the work directory: CLI flag, then environment variable,
    /// then the user config file, then the built-in default.
    pub fn resolve(flag: Option<PathBuf>) -> Result<Self> {
        if let Some(root) = flag {
            return Ok(Self::new(root));
        }
        if let Ok(root) = std::env::var(constants::WORK_DIR_ENV) {
            if !root.is_empty() {
                return Ok(Self::new(root));
            }
        }
        if let Some(home) = std::env::var_os("HOME") {
            let user_config = Path::new(&home).join(constants::USER_CONFIG_RELPATH);
            if let Some(UserConfig {
                work_dir: Some(root),
            }) = file::read_json_opt(&user_config).unwrap_or(None)
            {
                return Ok(Self::new(root));
            }
            return Ok(Self::new(constants::DEFAULT_WORK_DIR));
        }
        WorkDirResolve {
            env_var: constants::WORK_DIR_ENV,
        }
        .fail()
    }

    /// Create every control-plane directory that does not exist yet.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            constants::CONFIG_DIR,
            constants::DEVICES_DIR,
            constants::QUEUE_PENDING_DIR,
            constants::QUEUE_ACTIVE_DIR,
            constants::QUEUE_COMPLETED_DIR,
            constants::QUEUE_CANCELLED_DIR,
            constants::QUEUE_FAILED_DIR,
            constants::COMMANDS_INCOMING_DIR,
            constants::COMMANDS_PROCESSED_DIR,
            constants::STATUS_DIR,
            constants::STATUS_DEVICES_DIR,
            constants::VALIDATION_PRE_FLIGHT_DIR,
            constants::VALIDATION_POST_FLIGHT_DIR,
            constants::LOGS_TEXT_DIR,
            constants::LOGS_STRUCTURED_DIR,
        ] {
            file::ensure_dir(&self.root.join(dir))?;
        }
        Ok(())
    }

    /// Unlink temp files abandoned by a crashed writer in the directories
    /// that receive atomic writes.
    pub fn gc_temp_files(&self, max_age: std::time::Duration) -> Result<usize> {
        let mut collected = 0;
        for dir in [
            self.queue_pending(),
            self.queue_active(),
            self.queue_completed(),
            self.queue_cancelled(),
            self.queue_failed(),
            self.commands_incoming(),
            self.commands_processed(),
            self.status_dir(),
            self.status_devices_dir(),
            self.validation_pre_flight_dir(),
            self.validation_post_flight_dir(),
        ] {
            collected += file::gc_temp_files(&dir, max_age)?;
        }
        Ok(collected)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(constants::CONFIG_FILE)
    }

    pub fn upgrade_paths_file(&self) -> PathBuf {
        self.root.join(constants::UPGRADE_PATHS_FILE)
    }

    pub fn inventory_file(&self) -> PathBuf {
        self.root.join(constants::INVENTORY_FILE)
    }

    pub fn queue_pending(&self) -> PathBuf {
        self.root.join(constants::QUEUE_PENDING_DIR)
    }

    pub fn queue_active(&self) -> PathBuf {
        self.root.join(constants::QUEUE_ACTIVE_DIR)
    }

    pub fn queue_completed(&self) -> PathBuf {
        self.root.join(constants::QUEUE_COMPLETED_DIR)
    }

    pub fn queue_cancelled(&self) -> PathBuf {
        self.root.join(constants::QUEUE_CANCELLED_DIR)
    }

    pub fn queue_failed(&self) -> PathBuf {
        self.root.join(constants::QUEUE_FAILED_DIR)
    }

    pub fn commands_incoming(&self) -> PathBuf {
        self.root.join(constants::COMMANDS_INCOMING_DIR)
    }

    pub fn commands_processed(&self) -> PathBuf {
        self.root.join(constants::COMMANDS_PROCESSED_DIR)
    }

    pub fn status_dir(&self) -> PathBuf {
        self.root.join(constants::STATUS_DIR)
    }

    pub fn daemon_status_file(&self) -> PathBuf {
        self.root.join(constants::DAEMON_STATUS_FILE)
    }

    pub fn workers_status_file(&self) -> PathBuf {
        self.root.join(constants::WORKERS_STATUS_FILE)
    }

    pub fn status_devices_dir(&self) -> PathBuf {
        self.root.join(constants::STATUS_DEVICES_DIR)
    }

    pub fn device_status_file(&self, serial: &str) -> PathBuf {
        self.status_devices_dir().join(format!("{serial}.json"))
    }

    pub fn validation_pre_flight_dir(&self) -> PathBuf {
        self.root.join(constants::VALIDATION_PRE_FLIGHT_DIR)
    }

    pub fn validation_post_flight_dir(&self) -> PathBuf {
        self.root.join(constants::VALIDATION_POST_FLIGHT_DIR)
    }

    pub fn logs_text_dir(&self) -> PathBuf {
        self.root.join(constants::LOGS_TEXT_DIR)
    }

    pub fn logs_structured_dir(&self) -> PathBuf {
        self.root.join(constants::LOGS_STRUCTURED_DIR)
    }
}

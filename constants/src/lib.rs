/// Name of the product.
pub const PRODUCT: &str = "Bastion";

/// Name of the daemon binary, used by `bastionctl daemon start`.
pub const DAEMON_BIN: &str = "bastion-upgraded";

/// Environment variable that overrides the work directory.
pub const WORK_DIR_ENV: &str = "BASTION_UPGRADE_WORK_DIR";

/// Work directory used when no flag, environment variable or user
/// config file names one.
pub const DEFAULT_WORK_DIR: &str = "/var/lib/bastion-upgrade";

/// User config file (relative to the home directory) consulted while
/// resolving the work directory.
pub const USER_CONFIG_RELPATH: &str = ".config/bastion-upgrade/config.json";

/// Control-plane directories, relative to the work directory.
pub const CONFIG_DIR: &str = "config";
pub const DEVICES_DIR: &str = "devices";
pub const QUEUE_PENDING_DIR: &str = "queue/pending";
pub const QUEUE_ACTIVE_DIR: &str = "queue/active";
pub const QUEUE_COMPLETED_DIR: &str = "queue/completed";
pub const QUEUE_CANCELLED_DIR: &str = "queue/cancelled";
pub const QUEUE_FAILED_DIR: &str = "queue/failed";
pub const COMMANDS_INCOMING_DIR: &str = "commands/incoming";
pub const COMMANDS_PROCESSED_DIR: &str = "commands/processed";
pub const STATUS_DIR: &str = "status";
pub const STATUS_DEVICES_DIR: &str = "status/devices";
pub const VALIDATION_PRE_FLIGHT_DIR: &str = "validation/pre_flight";
pub const VALIDATION_POST_FLIGHT_DIR: &str = "validation/post_flight";
pub const LOGS_TEXT_DIR: &str = "logs/text";
pub const LOGS_STRUCTURED_DIR: &str = "logs/structured";

/// Well-known control-plane file names.
pub const CONFIG_FILE: &str = "config/config.json";
pub const UPGRADE_PATHS_FILE: &str = "config/upgrade_paths.json";
pub const INVENTORY_FILE: &str = "devices/inventory.json";
pub const DAEMON_STATUS_FILE: &str = "status/daemon.json";
pub const WORKERS_STATUS_FILE: &str = "status/workers.json";

/// The only command verb the daemon understands.
pub const CANCEL_UPGRADE_COMMAND: &str = "cancel_upgrade";

/// Suffix appended to in-progress temporary files. Temp files also carry
/// a leading dot so directory scans skip them.
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Default worker pool sizing.
pub const DEFAULT_POOL_SIZE: usize = 4;
pub const MAX_POOL_SIZE: usize = 50;
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// Default free space required on the upgrade partition before each
/// image download.
pub const DEFAULT_MIN_DISK_GB: f64 = 5.0;

/// Default per-version download retry budget.
pub const DEFAULT_DOWNLOAD_RETRY_ATTEMPTS: u32 = 3;

/// Default post-upgrade validation margins.
pub const DEFAULT_TCP_SESSION_MARGIN_PERCENT: f64 = 10.0;
pub const DEFAULT_ROUTE_MARGIN: usize = 5;
pub const DEFAULT_ARP_MARGIN: usize = 5;

/// Default Device-API timing, in seconds.
pub const DEFAULT_SOFTWARE_CHECK_SECS: u64 = 120;
pub const DEFAULT_SOFTWARE_INFO_SECS: u64 = 60;
pub const DEFAULT_JOB_STALL_SECS: u64 = 600;
pub const DEFAULT_REBOOT_MAX_WAIT_SECS: u64 = 1800;
pub const DEFAULT_MAX_REBOOT_POLL_INTERVAL_SECS: u64 = 60;

/// Default discovery behavior.
pub const DEFAULT_DISCOVERY_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_DISCOVERY_REQUESTS_PER_MINUTE: u32 = 30;

/// Default cadence of the daemon/worker status snapshots, in seconds.
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;

/// Default window during which an existing busy DeviceStatus blocks a
/// second workflow from starting on the same serial, in seconds.
pub const DEFAULT_ACTIVE_GRACE_SECS: u64 = 120;

/// How long the daemon waits for in-flight workflows on shutdown before
/// abandoning them, in seconds.
pub const DEFAULT_SHUTDOWN_DEADLINE_SECS: u64 = 30;

/// Cadence of the pending-queue and command-directory scans, in
/// milliseconds.
pub const INTAKE_SCAN_INTERVAL_MS: u64 = 500;

/// Age past which an orphaned temp file is garbage-collected, in seconds.
pub const TEMP_FILE_GC_AGE_SECS: u64 = 3600;

/// Default management API port on the appliances.
pub const DEFAULT_API_PORT: u16 = 443;

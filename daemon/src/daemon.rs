//! Daemon wiring: the shared context every subsystem hangs off, startup
//! recovery, and the control loop that runs intake, command processing
//! and status snapshots until a shutdown signal arrives.

use crate::{
    common::error::Result,
    config::UpgradeConfig,
    device_api::ApiConnector,
    intake::{commands::CommandIntake, jobs::JobIntake},
    inventory::Inventory,
    job::JobQueue,
    registry::WorkflowRegistry,
    status::{device::DeviceStatusStore, writer::StatusWriter},
    upgrade_path::UpgradePathTable,
    validator::Validator,
    workdir::WorkDir,
    workers::WorkerPool,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Read-mostly state shared by every subsystem. The registry carries the
/// only lock-guarded mutable pieces.
pub struct DaemonContext {
    pub workdir: WorkDir,
    pub config: UpgradeConfig,
    pub inventory: Inventory,
    pub paths: UpgradePathTable,
    pub queue: JobQueue,
    pub statuses: DeviceStatusStore,
    pub registry: WorkflowRegistry,
    pub connector: Box<dyn ApiConnector>,
}

impl DaemonContext {
    /// Bootstrap the control-plane layout and load the read-only tables.
    pub fn build(
        workdir: WorkDir,
        config: UpgradeConfig,
        connector: Box<dyn ApiConnector>,
    ) -> Result<Arc<Self>> {
        workdir.ensure_layout()?;
        let inventory = Inventory::load(&workdir.inventory_file())?;
        let paths = UpgradePathTable::load(&workdir.upgrade_paths_file())?;
        info!(
            devices = inventory.len(),
            upgrade_paths = paths.len(),
            "Loaded inventory and upgrade-path table"
        );

        Ok(Arc::new(Self {
            queue: JobQueue::new(workdir.clone()),
            statuses: DeviceStatusStore::new(&workdir),
            registry: WorkflowRegistry::new(CancellationToken::new()),
            workdir,
            config,
            inventory,
            paths,
            connector,
        }))
    }

    pub fn validator(&self) -> Validator {
        Validator::new(&self.workdir, self.config.validation.clone())
    }

    /// The daemon-wide shutdown token.
    pub fn shutdown(&self) -> CancellationToken {
        self.registry.shutdown_token()
    }
}

pub struct Daemon {
    ctx: Arc<DaemonContext>,
}

impl Daemon {
    pub fn new(ctx: Arc<DaemonContext>) -> Self {
        Self { ctx }
    }

    /// Run until SIGTERM/SIGINT. Recovery happens before the first scan so
    /// jobs interrupted by a crash resume ahead of new submissions.
    pub async fn run(self) -> Result<()> {
        let ctx = self.ctx;

        match ctx
            .workdir
            .gc_temp_files(Duration::from_secs(constants::TEMP_FILE_GC_AGE_SECS))
        {
            Ok(0) => {}
            Ok(collected) => info!(collected, "Garbage-collected stale temp files"),
            Err(error) => warn!(%error, "Temp-file garbage collection failed"),
        }

        let pool = Arc::new(WorkerPool::start(
            Arc::clone(&ctx),
            ctx.config.workers.pool_size,
            ctx.config.workers.queue_size,
        ));
        let status_writer = StatusWriter::new(Arc::clone(&ctx), pool.statuses());
        status_writer.write_once(true)?;

        crate::intake::jobs::recover_active(&ctx, &pool).await?;

        let scan_interval = Duration::from_millis(constants::INTAKE_SCAN_INTERVAL_MS);
        let job_intake = JobIntake::new(Arc::clone(&ctx), Arc::clone(&pool));
        let command_intake = CommandIntake::new(Arc::clone(&ctx));

        let intake_task = tokio::spawn(job_intake.run(scan_interval));
        let command_task = tokio::spawn(command_intake.run(scan_interval));
        let status_task = tokio::spawn(status_writer.run(ctx.config.status_interval()));

        info!(
            work_dir = %ctx.workdir.root().display(),
            workers = ctx.config.workers.pool_size,
            "{} upgrade daemon running",
            constants::PRODUCT
        );
        wait_for_shutdown_signal(&ctx.shutdown()).await;
        info!("Shutdown requested; draining workers");

        // Stop intake, cancel all in-flight workflows through the shared
        // token, and give the pool its deadline.
        ctx.shutdown().cancel();
        let _ = intake_task.await;
        let _ = command_task.await;
        match Arc::try_unwrap(pool) {
            Ok(pool) => pool.shutdown(ctx.config.shutdown_deadline()).await,
            Err(_) => warn!("Worker pool still referenced at shutdown; abandoning in-flight items"),
        }
        let _ = status_task.await;

        info!("Daemon stopped");
        Ok(())
    }
}

async fn wait_for_shutdown_signal(shutdown: &CancellationToken) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "Failed to install SIGTERM handler");
            shutdown.cancelled().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
        _ = shutdown.cancelled() => {}
    }
}

//! `bastionctl job {submit|list|status|cancel}` -- descriptors in,
//! status files out. The daemon re-validates everything; the checks here
//! only give operators fast feedback.

use crate::{
    error::{JobNotFound, Result},
    opts::{CancelArgs, SubmitArgs},
};
use upgrade_daemon::{
    common::file,
    intake::{commands::{Command, CommandTarget}, jobs::guard_duplicates},
    inventory::Inventory,
    job::{Job, JobQueue, JobState, JobType},
    status::{device::DeviceStatusStore, now_rfc3339},
    workdir::WorkDir,
};

/// Build and submit one descriptor into `queue/pending/`.
pub fn submit(workdir: &WorkDir, args: &SubmitArgs) -> Result<()> {
    let inventory = Inventory::load(&workdir.inventory_file())?;
    for serial in &args.devices {
        inventory.require(serial)?;
    }

    let job_type = match (args.devices.len(), args.download_only) {
        (2, true) => JobType::DownloadOnlyHa,
        (2, false) => JobType::HaPair,
        (_, true) => JobType::DownloadOnly,
        (_, false) => JobType::Standalone,
    };
    let job = Job {
        job_id: format!("job-{}", uuid::Uuid::new_v4()),
        job_type,
        devices: args.devices.clone(),
        ha_pair_name: args.ha_pair_name.clone(),
        dry_run: args.dry_run,
        created_at: now_rfc3339(),
    };

    let queue = JobQueue::new(workdir.clone());
    guard_duplicates(&job, &queue.open_jobs()?)?;
    let path = queue.submit(&job)?;

    console_logger::info_with_data("Submitted job:", &job.job_id);
    println!("  type:    {}", job.job_type);
    println!("  devices: {}", job.devices.join(", "));
    println!("  file:    {}", path.display());
    Ok(())
}

/// One line per job across every queue directory.
pub fn list(workdir: &WorkDir) -> Result<()> {
    let queue = JobQueue::new(workdir.clone());
    let mut total = 0usize;
    for state in [
        JobState::Pending,
        JobState::Active,
        JobState::Completed,
        JobState::Cancelled,
        JobState::Failed,
    ] {
        for (_, job) in queue.jobs_in(state)? {
            println!(
                "{:<10} {:<42} {:<17} {}",
                state.to_string(),
                job.job_id,
                job.job_type.to_string(),
                job.devices.join(",")
            );
            total += 1;
        }
    }
    if total == 0 {
        console_logger::info("No jobs");
    }
    Ok(())
}

/// The descriptor plus each member device's workflow record.
pub fn status(workdir: &WorkDir, job_id: &str) -> Result<()> {
    let queue = JobQueue::new(workdir.clone());
    let found = [
        JobState::Pending,
        JobState::Active,
        JobState::Completed,
        JobState::Cancelled,
        JobState::Failed,
    ]
    .into_iter()
    .find_map(|state| {
        file::read_json_opt::<Job>(&queue.file(state, job_id))
            .ok()
            .flatten()
            .map(|job| (state, job))
    });

    let Some((state, job)) = found else {
        return JobNotFound { job_id }.fail();
    };

    console_logger::info_with_data("Job:", &job.job_id);
    println!("  state:   {state}");
    println!("  type:    {}", job.job_type);
    println!("  dry run: {}", job.dry_run);
    println!("  created: {}", job.created_at);

    let statuses = DeviceStatusStore::new(workdir);
    for serial in &job.devices {
        match statuses.load(serial)? {
            Some(device) => {
                println!(
                    "  device {serial}: {:?} ({}%, {}) {}",
                    device.upgrade_status,
                    device.progress,
                    device.current_phase,
                    device.upgrade_message
                );
            }
            None => println!("  device {serial}: no status yet"),
        }
    }
    Ok(())
}

/// Drop a cancel command into `commands/incoming/`.
pub fn cancel(workdir: &WorkDir, args: &CancelArgs) -> Result<()> {
    let command = Command {
        command: constants::CANCEL_UPGRADE_COMMAND.to_string(),
        target: CommandTarget::Job,
        job_id: args.job_id.clone(),
        device_serial: String::new(),
        reason: args.reason.clone(),
        timestamp: now_rfc3339(),
    };
    let path = workdir
        .commands_incoming()
        .join(format!("cancel-{}.json", uuid::Uuid::new_v4()));
    file::write_json_atomic(&path, &command)?;
    console_logger::info_with_data("Cancellation requested for job:", &args.job_id);
    Ok(())
}

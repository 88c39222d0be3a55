//! CSV batch submissions: one job per row. Rows that fail validation are
//! reported and skipped; the rest of the batch still goes in.

use crate::{
    commands::device::read_rows,
    error::{CsvRow, Result},
    opts::BatchArgs,
};
use upgrade_daemon::{
    intake::jobs::guard_duplicates,
    inventory::Inventory,
    job::{Job, JobQueue, JobType},
    status::now_rfc3339,
    workdir::WorkDir,
};

/// Submit one job per CSV row. Standalone types take one serial per row;
/// HA types take `serial_a,serial_b[,pair_name]`.
pub fn submit_batch(workdir: &WorkDir, args: &BatchArgs, job_type: JobType) -> Result<()> {
    let inventory = Inventory::load(&workdir.inventory_file())?;
    let queue = JobQueue::new(workdir.clone());

    let mut submitted = 0usize;
    let mut skipped = 0usize;

    for (row, fields) in read_rows(&args.csv)? {
        match build_job(&inventory, &queue, job_type, args.dry_run, row, &fields) {
            Ok(job) => {
                queue.submit(&job)?;
                console_logger::info_with_data("Submitted:", &format!(
                    "{} ({})",
                    job.job_id,
                    job.devices.join(",")
                ));
                submitted += 1;
            }
            Err(error) => {
                console_logger::error("Skipped row:", &error.to_string());
                skipped += 1;
            }
        }
    }

    console_logger::info_with_data(
        "Batch done, jobs submitted:",
        &format!("{submitted} ({skipped} skipped)"),
    );
    Ok(())
}

fn build_job(
    inventory: &Inventory,
    queue: &JobQueue,
    job_type: JobType,
    dry_run: bool,
    row: usize,
    fields: &[String],
) -> Result<Job> {
    let expected = job_type.expected_device_count();
    let devices: Vec<String> = fields
        .iter()
        .take(expected)
        .filter(|field| !field.is_empty())
        .cloned()
        .collect();
    if devices.len() != expected {
        return CsvRow {
            row,
            reason: format!("expected {expected} serial(s)"),
        }
        .fail();
    }
    for serial in &devices {
        inventory.require(serial)?;
    }

    let ha_pair_name = if job_type.is_ha() {
        fields
            .get(2)
            .cloned()
            .unwrap_or_else(|| devices.join("/"))
    } else {
        String::new()
    };

    let job = Job {
        job_id: format!("job-{}", uuid::Uuid::new_v4()),
        job_type,
        devices,
        ha_pair_name,
        dry_run,
        created_at: now_rfc3339(),
    };
    guard_duplicates(&job, &queue.open_jobs()?)?;
    Ok(job)
}

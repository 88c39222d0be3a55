use clap::Parser;
use opts::{CliArgs, ConfigOps, DaemonOps, DeviceOps, JobOps, Operation, PathOps};
use upgrade_daemon::{job::JobType, workdir::WorkDir};

mod commands;
mod error;
mod opts;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    if let Err(error) = run(args).await {
        console_logger::error("Error:", &error.to_string());
        std::process::exit(error.exit_code());
    }
}

async fn run(args: CliArgs) -> error::Result<()> {
    let workdir = WorkDir::resolve(args.work_dir)?;
    workdir.ensure_layout()?;

    match args.operation {
        Operation::Daemon(op) => match op {
            DaemonOps::Start => commands::daemon::start(&workdir).await,
            DaemonOps::Stop(stop) => commands::daemon::stop(&workdir, stop.wait).await,
            DaemonOps::Restart(stop) => commands::daemon::restart(&workdir, stop.wait).await,
            DaemonOps::Status => commands::daemon::status(&workdir),
        },
        Operation::Job(op) => match op {
            JobOps::Submit(submit) => commands::job::submit(&workdir, &submit),
            JobOps::List => commands::job::list(&workdir),
            JobOps::Status { job_id } => commands::job::status(&workdir, &job_id),
            JobOps::Cancel(cancel) => commands::job::cancel(&workdir, &cancel),
        },
        Operation::Device(op) => match op {
            DeviceOps::List => commands::device::list(&workdir),
            DeviceOps::Status { serial } => commands::device::status(&workdir, &serial),
            DeviceOps::Validate { serial } => {
                commands::device::validate(&workdir, &serial).await
            }
            DeviceOps::Metrics { serial } => commands::device::metrics(&workdir, &serial).await,
            DeviceOps::Discover(discover) => {
                commands::device::discover(&workdir, &discover).await
            }
            DeviceOps::Export(export) => commands::device::export(&workdir, &export),
        },
        Operation::Upgrade(batch) => {
            commands::batch::submit_batch(&workdir, &batch, JobType::Standalone)
        }
        Operation::UpgradeHaPairs(batch) => {
            commands::batch::submit_batch(&workdir, &batch, JobType::HaPair)
        }
        Operation::Download(batch) => {
            commands::batch::submit_batch(&workdir, &batch, JobType::DownloadOnly)
        }
        Operation::DownloadHaPairs(batch) => {
            commands::batch::submit_batch(&workdir, &batch, JobType::DownloadOnlyHa)
        }
        Operation::Config(op) => match op {
            ConfigOps::Set { key, value } => commands::config::set(&workdir, &key, &value),
            ConfigOps::Show => commands::config::show(&workdir),
        },
        Operation::Path(op) => match op {
            PathOps::Show => commands::path::show(&workdir),
            PathOps::Validate => commands::path::validate(&workdir),
        },
    }
}

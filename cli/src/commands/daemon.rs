//! `bastionctl daemon {start|stop|restart|status}` -- lifecycle of the
//! `bastion-upgraded` process, coordinated through `status/daemon.json`.

use crate::error::{DaemonNotRunning, DaemonTimeout, Result, SignalDaemon, SpawnDaemon};
use snafu::ResultExt;
use std::time::{Duration, Instant};
use upgrade_daemon::{common::file, status::DaemonStatus, workdir::WorkDir};

const START_WAIT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(500);

fn read_status(workdir: &WorkDir) -> Result<Option<DaemonStatus>> {
    Ok(file::read_json_opt(&workdir.daemon_status_file())?)
}

fn pid_alive(pid: u32) -> bool {
    // Signal 0 probes the process without touching it.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// The daemon counts as running when its snapshot says so and the pid
/// still answers; a stale file left by a crash does not.
fn running_pid(workdir: &WorkDir) -> Result<Option<u32>> {
    Ok(read_status(workdir)?
        .filter(|status| status.running && pid_alive(status.pid))
        .map(|status| status.pid))
}

pub async fn start(workdir: &WorkDir) -> Result<()> {
    if let Some(pid) = running_pid(workdir)? {
        console_logger::info_with_data("Daemon already running, pid:", &pid.to_string());
        return Ok(());
    }

    workdir.ensure_layout()?;
    std::process::Command::new(constants::DAEMON_BIN)
        .arg("--work-dir")
        .arg(workdir.root())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context(SpawnDaemon {
            bin: constants::DAEMON_BIN,
        })?;

    let deadline = Instant::now() + START_WAIT;
    while Instant::now() < deadline {
        if let Some(pid) = running_pid(workdir)? {
            console_logger::info_with_data("Daemon started, pid:", &pid.to_string());
            return Ok(());
        }
        tokio::time::sleep(POLL).await;
    }
    DaemonTimeout {
        action: "start",
        timeout: START_WAIT,
    }
    .fail()
}

pub async fn stop(workdir: &WorkDir, wait: Duration) -> Result<()> {
    let Some(pid) = running_pid(workdir)? else {
        console_logger::info("Daemon is not running");
        return Ok(());
    };

    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        return SignalDaemon {
            pid,
            message: std::io::Error::last_os_error().to_string(),
        }
        .fail();
    }

    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if running_pid(workdir)?.is_none() {
            console_logger::info("Daemon stopped");
            return Ok(());
        }
        tokio::time::sleep(POLL).await;
    }
    DaemonTimeout {
        action: "stop",
        timeout: wait,
    }
    .fail()
}

pub async fn restart(workdir: &WorkDir, wait: Duration) -> Result<()> {
    stop(workdir, wait).await?;
    start(workdir).await
}

pub fn status(workdir: &WorkDir) -> Result<()> {
    let Some(status) = read_status(workdir)? else {
        return DaemonNotRunning.fail();
    };
    let alive = status.running && pid_alive(status.pid);

    if alive {
        console_logger::info_with_data("Daemon running, pid:", &status.pid.to_string());
    } else {
        console_logger::warn("Daemon not running, last seen:", &status.last_updated);
    }
    println!("  workers:        {}", status.workers);
    println!("  active jobs:    {}", status.active_jobs);
    println!("  pending jobs:   {}", status.pending_jobs);
    println!("  completed jobs: {}", status.completed_jobs);
    println!("  failed jobs:    {}", status.failed_jobs);
    println!("  cancelled jobs: {}", status.cancelled_jobs);
    println!("  started at:     {}", status.started_at);
    if !alive {
        return DaemonNotRunning.fail();
    }
    Ok(())
}

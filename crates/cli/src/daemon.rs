//! Detached background sessions.
//!
//! The one OS-facing component of port forwarding: spawn a child process
//! detached from the invoking terminal, point its output at a log file,
//! and record its pid so a later stop can find it. Kept isolated so the
//! detach mechanism can be swapped per platform without touching the
//! forwarding logic.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::{Command, Stdio};

use sysinfo::{Pid, System};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Spawn `program args...` as a detached child, redirecting its output to
/// `log_path` and recording its pid to `pid_path`. Returns the pid.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened, the child cannot be
/// spawned, or the pid file cannot be written.
pub fn spawn_background(
    program: &Path,
    args: &[String],
    log_path: &Path,
    pid_path: &Path,
) -> Result<u32> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new().create(true).append(true).open(log_path)?;
    let err_log = log.try_clone()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err_log));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd.spawn()?;
    let pid = child.id();
    fs::write(pid_path, pid.to_string())?;
    info!(pid, log = %log_path.display(), "background session started");
    Ok(pid)
}

/// Read the pid recorded for a background session.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no pid.
pub fn read_pid(pid_path: &Path) -> Result<u32> {
    let text = fs::read_to_string(pid_path)?;
    text.trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid pid file {}", pid_path.display())))
}

/// Terminate the session recorded in `pid_path` and remove the file.
/// A pid whose process is already gone is a warning, not an error.
///
/// # Errors
///
/// Returns an error if the pid file cannot be read or removed.
pub fn stop(pid_path: &Path) -> Result<()> {
    let pid = read_pid(pid_path)?;
    let system = System::new_all();
    match system.process(Pid::from_u32(pid)) {
        Some(process) => {
            process.kill();
            info!(pid, "terminated background session");
        }
        None => warn!(pid, "process already gone, removing stale pid file"),
    }
    fs::remove_file(pid_path)?;
    Ok(())
}

//! Workload invocation.
//!
//! The [`WorkloadRunner`] trait decouples job orchestration from actually
//! spawning the workload. Tests use scripted runners that return a
//! predetermined exit without spawning processes.
//!
//! On unix the workload leads its own process group. When the run ends, by
//! exit or by timeout, the whole group is killed so no descendant can write to
//! the log after the terminal marker.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::WorkloadExit;

/// Parameters for one workload invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRequest {
    /// Interpreter chosen by runtime activation.
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Variables set on the child, applied in order.
    pub env: Vec<(OsString, OsString)>,
    /// Variables removed from the inherited environment.
    pub env_remove: Vec<OsString>,
    /// Lifecycle log; stdout and stderr are appended here verbatim.
    pub log_path: PathBuf,
    /// Kill the workload after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// Abstraction over how the workload is executed.
pub trait WorkloadRunner {
    /// Run the workload to completion and report how it ended.
    ///
    /// A workload that cannot be started is reported as
    /// [`WorkloadExit::LaunchFailed`], not as an error.
    fn run(&self, request: &WorkloadRequest) -> Result<WorkloadExit>;
}

/// Runner that spawns the workload as a foreground child process.
pub struct ProcessRunner;

impl WorkloadRunner for ProcessRunner {
    #[instrument(
        skip_all,
        fields(
            program = %request.program.display(),
            timeout_secs = request.timeout.map(|t| t.as_secs()),
        )
    )]
    fn run(&self, request: &WorkloadRequest) -> Result<WorkloadExit> {
        let log = open_append(&request.log_path)?;
        let stdout = log
            .try_clone()
            .with_context(|| format!("clone log handle {}", request.log_path.display()))?;

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(log));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        for name in &request.env_remove {
            cmd.env_remove(name);
        }
        for (name, value) in &request.env {
            cmd.env(name, value);
        }

        debug!(args = ?request.args, workdir = %request.workdir.display(), "spawning workload");
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(err = %err, "failed to spawn workload");
                return Ok(WorkloadExit::LaunchFailed(format!(
                    "spawn {}: {err}",
                    request.program.display()
                )));
            }
        };
        info!(pid = child.id(), "workload started");

        let exit = wait_for_exit(child, request.timeout)?;
        debug!(exit = ?exit, "workload finished");
        Ok(exit)
    }
}

fn wait_for_exit(mut child: Child, timeout: Option<Duration>) -> Result<WorkloadExit> {
    let Some(timeout) = timeout else {
        let status = child.wait().context("wait for workload")?;
        kill_descendants(&child)?;
        return Ok(WorkloadExit::from_status(status));
    };

    match child
        .wait_timeout(timeout)
        .context("wait for workload timeout")?
    {
        Some(status) => {
            kill_descendants(&child)?;
            Ok(WorkloadExit::from_status(status))
        }
        None => {
            warn!(timeout_secs = timeout.as_secs(), "workload timed out, killing");
            kill_workload(&mut child)?;
            child.wait().context("wait workload after kill")?;
            Ok(WorkloadExit::TimedOut(timeout))
        }
    }
}

/// SIGKILL every process in the workload's group. A group that is already
/// empty is not an error.
#[cfg(unix)]
fn kill_group(child: &Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("workload pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err).context("kill workload process group"),
    }
}

#[cfg(unix)]
fn kill_workload(child: &mut Child) -> Result<()> {
    kill_group(child)
}

#[cfg(not(unix))]
fn kill_workload(child: &mut Child) -> Result<()> {
    child.kill().context("kill workload")
}

/// Stop processes the workload left running after it exited.
#[cfg(unix)]
fn kill_descendants(child: &Child) -> Result<()> {
    kill_group(child)
}

#[cfg(not(unix))]
fn kill_descendants(_child: &Child) -> Result<()> {
    Ok(())
}

/// Open `path` for appending, creating it if needed.
pub fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))
}

//! Shared deterministic types for the job wrapper core.
//!
//! These types define stable contracts between the resolver, activator,
//! invoker and reporter. They carry no I/O and render identically across runs
//! given the same inputs.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, SecondsFormat};

/// Line written between consecutive run blocks in the lifecycle log.
pub const SEPARATOR: &str = "------------------------------------------------------------";

/// Text appended to the `[END]` entry of a successful run.
pub const SUCCESS_MARKER: &str = "OK job completed successfully";

/// Kind of a lifecycle log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Start,
    Info,
    Warn,
    Error,
    End,
}

impl Marker {
    pub fn tag(self) -> &'static str {
        match self {
            Marker::Start => "[START]",
            Marker::Info => "[INFO]",
            Marker::Warn => "[WARN]",
            Marker::Error => "[ERROR]",
            Marker::End => "[END]",
        }
    }

    /// `END` and `ERROR` close a run block.
    pub fn is_terminal(self) -> bool {
        matches!(self, Marker::End | Marker::Error)
    }
}

/// One line of the lifecycle log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub marker: Marker,
    pub text: String,
}

impl LogEntry {
    pub fn start(at: DateTime<FixedOffset>) -> Self {
        Self {
            marker: Marker::Start,
            text: format_timestamp(at),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            marker: Marker::Info,
            text: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            marker: Marker::Warn,
            text: message.into(),
        }
    }

    pub fn end(at: DateTime<FixedOffset>) -> Self {
        Self {
            marker: Marker::End,
            text: format!("{} {SUCCESS_MARKER}", format_timestamp(at)),
        }
    }

    pub fn error(at: DateTime<FixedOffset>, message: &str) -> Self {
        Self {
            marker: Marker::Error,
            text: format!("{} {message}", format_timestamp(at)),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pad tags to the width of `[START]`/`[ERROR]` so message columns line up.
        write!(f, "{:<7} {}", self.marker.tag(), self.text)
    }
}

/// RFC 3339 timestamp with explicit UTC offset, second precision.
pub fn format_timestamp(at: DateTime<FixedOffset>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// How the workload subprocess ended, as observed by the invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadExit {
    /// Process exited normally with this status code.
    Code(i32),
    /// Process was terminated by a signal (unix), if known.
    Signal(Option<i32>),
    /// The wrapper killed the process after the configured timeout.
    TimedOut(Duration),
    /// The process could not be started or waited on.
    LaunchFailed(String),
}

impl WorkloadExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => WorkloadExit::Code(code),
            None => WorkloadExit::Signal(signal_of(status)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkloadExit::Code(0))
    }

    /// Human-readable failure description used in the `[ERROR]` entry.
    pub fn describe(&self) -> String {
        match self {
            WorkloadExit::Code(0) => "job exited successfully".to_string(),
            WorkloadExit::Code(code) => format!("job failed with exit code {code}"),
            WorkloadExit::Signal(Some(signal)) => format!("job terminated by signal {signal}"),
            WorkloadExit::Signal(None) => "job terminated without an exit code".to_string(),
            WorkloadExit::TimedOut(after) => {
                format!("job timed out after {}s and was killed", after.as_secs())
            }
            WorkloadExit::LaunchFailed(reason) => format!("job failed to run: {reason}"),
        }
    }
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> Option<i32> {
    None
}

/// Success or failure of one invocation, derived only from the workload exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(WorkloadExit),
}

impl RunOutcome {
    pub fn from_exit(exit: WorkloadExit) -> Self {
        if exit.is_success() {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed(exit)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

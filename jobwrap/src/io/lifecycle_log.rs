//! Append-only lifecycle log and the status reporter that drives it.
//!
//! # Separation of Concerns
//!
//! - **Lifecycle log (this module)**: product output read by operators and
//!   schedulers. Always written, unaffected by `RUST_LOG`.
//! - **Tracing (`logging`)**: dev diagnostics on stderr.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local};
use tracing::debug;

use crate::core::lifecycle::{Lifecycle, LifecycleState};
use crate::core::types::{LogEntry, RunOutcome};

/// Handle to the lifecycle log, opened in append mode.
pub struct LifecycleLog {
    path: PathBuf,
    file: File,
}

impl LifecycleLog {
    pub fn open(path: &Path) -> Result<Self> {
        // Read access is only used to inspect the final byte.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `lines` as one write and flush, so a block's markers stay
    /// contiguous relative to workload output.
    ///
    /// Markers always start a line: if the log ends mid-line (workload output
    /// without a trailing newline), the line is terminated first.
    pub fn append(&mut self, lines: &[String]) -> Result<()> {
        let mut buf = String::new();
        if self.ends_mid_line()? {
            buf.push('\n');
        }
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }
        self.file
            .write_all(buf.as_bytes())
            .with_context(|| format!("append to log {}", self.path.display()))?;
        self.file
            .flush()
            .with_context(|| format!("flush log {}", self.path.display()))
    }

    fn ends_mid_line(&mut self) -> Result<bool> {
        let len = self
            .file
            .metadata()
            .with_context(|| format!("stat log {}", self.path.display()))?
            .len();
        if len == 0 {
            return Ok(false);
        }
        let mut last = [0u8; 1];
        self.file
            .seek(SeekFrom::End(-1))
            .and_then(|_| self.file.read_exact(&mut last))
            .with_context(|| format!("read tail of log {}", self.path.display()))?;
        Ok(last[0] != b'\n')
    }
}

/// Sole owner of lifecycle transitions for one run.
///
/// Every transition is written to the log before the state is observable to
/// callers, and the terminal transition yields the wrapper exit code.
pub struct Reporter {
    lifecycle: Lifecycle,
    log: LifecycleLog,
}

impl Reporter {
    pub fn new(log: LifecycleLog) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            log,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// `NotStarted -> Running`: separator, `[START]`, then `notices`.
    pub fn start(&mut self, notices: &[LogEntry]) -> Result<()> {
        let lines = self.lifecycle.start(now(), notices)?;
        self.log.append(&lines)?;
        debug!(log = %self.log.path().display(), "run block opened");
        Ok(())
    }

    /// `Running -> Succeeded | Failed`. Returns the wrapper exit code.
    pub fn finish(&mut self, outcome: &RunOutcome) -> Result<i32> {
        let termination = self.lifecycle.finish(now(), outcome)?;
        self.log.append(&termination.lines)?;
        debug!(
            state = ?self.lifecycle.state(),
            exit_code = termination.exit_code,
            "run block closed"
        );
        Ok(termination.exit_code)
    }
}

fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SEPARATOR, WorkloadExit};
    use crate::exit_codes;
    use std::fs;

    #[test]
    fn reporter_writes_one_block_per_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("job.log");

        let mut reporter = Reporter::new(LifecycleLog::open(&path).expect("open"));
        reporter
            .start(&[LogEntry::warn("Runtime env not found")])
            .expect("start");
        let code = reporter
            .finish(&RunOutcome::Failed(WorkloadExit::Code(2)))
            .expect("finish");
        assert_eq!(code, exit_codes::FAILURE);
        assert_eq!(reporter.state(), LifecycleState::Failed);

        let log = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], SEPARATOR);
        assert!(lines[1].starts_with("[START] "));
        assert_eq!(lines[2], "[WARN]  Runtime env not found");
        assert!(lines[3].starts_with("[ERROR] "));
        assert!(log.ends_with("job failed with exit code 2\n\n"));
    }

    #[test]
    fn second_run_appends_after_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("job.log");

        for _ in 0..2 {
            let mut reporter = Reporter::new(LifecycleLog::open(&path).expect("open"));
            reporter.start(&[]).expect("start");
            let code = reporter.finish(&RunOutcome::Succeeded).expect("finish");
            assert_eq!(code, exit_codes::OK);
        }

        let log = fs::read_to_string(&path).expect("read");
        assert_eq!(log.matches("[START] ").count(), 2);
        assert_eq!(log.matches("[END]   ").count(), 2);
        assert_eq!(log.matches(SEPARATOR).count(), 2);
    }

    #[test]
    fn markers_start_on_a_fresh_line_after_partial_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("job.log");
        fs::write(&path, "left over from a killed run").expect("seed");

        let mut reporter = Reporter::new(LifecycleLog::open(&path).expect("open"));
        reporter.start(&[]).expect("start");
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(b"progress 100%"))
            .expect("partial output");
        reporter.finish(&RunOutcome::Succeeded).expect("finish");

        let log = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], "left over from a killed run");
        assert_eq!(lines[1], SEPARATOR);
        assert!(lines[2].starts_with("[START] "));
        assert_eq!(lines[3], "progress 100%");
        assert!(lines[4].starts_with("[END]   "));
        assert!(log.ends_with("\n\n"));
    }
}

//! Run lifecycle state machine.
//!
//! `NotStarted -> Running -> {Succeeded, Failed}`. Each transition returns the
//! exact lines to append to the lifecycle log, and the terminal transition also
//! returns the wrapper exit code, so the log and the exit status are always
//! derived from the same decision.

use anyhow::{Result, bail};
use chrono::{DateTime, FixedOffset};

use crate::core::types::{LogEntry, RunOutcome, SEPARATOR};
use crate::exit_codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Succeeded | LifecycleState::Failed)
    }
}

/// Lines for the terminal transition plus the exit code it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub lines: Vec<String>,
    pub exit_code: i32,
}

#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::NotStarted,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Open a run block: separator, `[START]`, then any buffered notices.
    pub fn start(
        &mut self,
        at: DateTime<FixedOffset>,
        notices: &[LogEntry],
    ) -> Result<Vec<String>> {
        if self.state != LifecycleState::NotStarted {
            bail!("cannot start run from state {:?}", self.state);
        }
        if let Some(entry) = notices.iter().find(|entry| entry.marker.is_terminal()) {
            bail!("notice must not be a terminal entry: {entry}");
        }
        self.state = LifecycleState::Running;

        let mut lines = Vec::with_capacity(notices.len() + 2);
        lines.push(SEPARATOR.to_string());
        lines.push(LogEntry::start(at).to_string());
        lines.extend(notices.iter().map(ToString::to_string));
        Ok(lines)
    }

    /// Close the run block with exactly one terminal marker and a blank line.
    pub fn finish(
        &mut self,
        at: DateTime<FixedOffset>,
        outcome: &RunOutcome,
    ) -> Result<Termination> {
        if self.state != LifecycleState::Running {
            bail!("cannot finish run from state {:?}", self.state);
        }
        let (entry, next, exit_code) = match outcome {
            RunOutcome::Succeeded => (
                LogEntry::end(at),
                LifecycleState::Succeeded,
                exit_codes::OK,
            ),
            RunOutcome::Failed(exit) => (
                LogEntry::error(at, &exit.describe()),
                LifecycleState::Failed,
                exit_codes::FAILURE,
            ),
        };
        self.state = next;
        Ok(Termination {
            lines: vec![entry.to_string(), String::new()],
            exit_code,
        })
    }
}

//! Scheduled batch-job wrapper.
//!
//! Runs one workload per invocation and records an append-only lifecycle log
//! that an external scheduler can audit. The architecture follows a strict
//! split:
//!
//! - **[`core`]**: Pure, deterministic logic (config resolution, the run
//!   lifecycle state machine, log entry rendering). No I/O.
//! - **[`io`]**: Side-effecting steps (directories, runtime activation,
//!   subprocess execution, the log file, the run lock).
//!
//! [`job`] sequences the steps for `jobwrap run`.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod job;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

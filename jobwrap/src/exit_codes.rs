//! Stable exit codes for the `jobwrap` binary.
//!
//! Schedulers only need to distinguish success from failure, so the wrapper
//! never forwards the workload's own nonzero code.

/// Workload completed with exit status 0.
pub const OK: i32 = 0;
/// Workload failed (nonzero, signal, timeout, launch error) or setup failed before START.
pub const FAILURE: i32 = 1;

//! Side-effecting steps of a job run: config sources, runtime activation,
//! workload invocation, the lifecycle log and the optional run lock.

pub mod activator;
pub mod config;
pub mod lifecycle_log;
pub mod lock;
pub mod process;

//! Deterministic, pure logic shared by the job wrapper.
//!
//! Core modules must be free of I/O side effects. They resolve configuration,
//! model the run lifecycle and render log entries from in-memory values.

pub mod config;
pub mod lifecycle;
pub mod types;

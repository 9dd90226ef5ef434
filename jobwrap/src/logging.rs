//! Diagnostic tracing for the wrapper itself.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, so a scheduler's journal captures it if anything does.
//!
//! - **Lifecycle log (`io/lifecycle_log`)**: the `[START]`/`[END]` transcript in
//!   the job log file. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `verbose` selects `jobwrap=debug`, and
/// the default is `warn`.
///
/// # Example
/// ```bash
/// RUST_LOG=jobwrap=debug jobwrap run
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "jobwrap=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

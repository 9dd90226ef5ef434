//! Orchestration for a single `jobwrap run`.
//!
//! Steps run strictly in order: resolve (done by the caller), prepare
//! directories and the optional lock, activate the runtime, open the run block,
//! invoke the workload, close the run block. Errors before the block opens are
//! fatal setup errors and leave the log untouched; once `[START]` is written,
//! every path ends in exactly one terminal marker.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, instrument};

use crate::core::config::RunConfig;
use crate::core::types::{RunOutcome, WorkloadExit};
use crate::io::activator::{RuntimeHandle, activate};
use crate::io::config::prepare_run_dirs;
use crate::io::lifecycle_log::{LifecycleLog, Reporter};
use crate::io::lock::try_acquire;
use crate::io::process::{WorkloadRequest, WorkloadRunner};

/// Result of one wrapper invocation that reached a terminal marker.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub outcome: RunOutcome,
    /// Exit code the wrapper process should exit with.
    pub exit_code: i32,
    pub runtime: RuntimeHandle,
    pub duration: Duration,
}

/// Run the workload once under `cfg`.
///
/// Returns `Err` only for setup failures before `[START]` or when the log
/// itself cannot be written.
#[instrument(skip_all, fields(log_file = %cfg.log_file.display()))]
pub fn run_job<R: WorkloadRunner>(cfg: &RunConfig, runner: &R) -> Result<JobReport> {
    let started = Instant::now();

    prepare_run_dirs(cfg)?;
    let _lock = cfg.lock_file.as_deref().map(try_acquire).transpose()?;
    let mut reporter = Reporter::new(LifecycleLog::open(&cfg.log_file)?);

    let activation = activate(
        &cfg.runtime_env_dir,
        &cfg.runtime_env_fallback_dir,
        &cfg.runtime_binary,
    );
    reporter.start(std::slice::from_ref(&activation.notice))?;

    let exit = match build_request(cfg, &activation.handle).and_then(|req| runner.run(&req)) {
        Ok(exit) => exit,
        Err(err) => {
            error!(err = %format!("{err:#}"), "workload invocation failed");
            WorkloadExit::LaunchFailed(format!("{err:#}"))
        }
    };
    let outcome = RunOutcome::from_exit(exit);
    let exit_code = reporter.finish(&outcome)?;

    let duration = started.elapsed();
    info!(
        outcome = ?outcome,
        exit_code,
        duration_ms = millis(duration),
        isolated = activation.handle.is_isolated(),
        "job finished"
    );
    Ok(JobReport {
        outcome,
        exit_code,
        runtime: activation.handle,
        duration,
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Build the subprocess request: activation env first, then the run config's
/// own variables so `DATA_DIR` and friends always reflect the resolved values.
pub fn build_request(cfg: &RunConfig, runtime: &RuntimeHandle) -> Result<WorkloadRequest> {
    let inherited_path = std::env::var_os("PATH");
    let activation = runtime.activation_env(inherited_path.as_deref())?;
    let mut env = activation.set;
    env.extend(cfg.workload_env());

    Ok(WorkloadRequest {
        program: runtime.interpreter().to_path_buf(),
        args: cfg.workload.clone(),
        workdir: cfg.base_dir.clone(),
        env,
        env_remove: activation.remove,
        log_path: cfg.log_file.clone(),
        timeout: cfg.timeout(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ConfigLayer, DATA_DIR_VAR};
    use crate::exit_codes;
    use crate::test_support::ScriptedRunner;
    use std::ffi::OsString;
    use std::fs;
    use std::path::PathBuf;

    fn config(base: &std::path::Path) -> RunConfig {
        let layer = ConfigLayer {
            runtime_binary: Some(PathBuf::from("/usr/bin/python3")),
            ..ConfigLayer::default()
        };
        RunConfig::resolve(base, &[&layer]).expect("resolve")
    }

    #[test]
    fn request_carries_resolved_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        let runtime = RuntimeHandle::Ambient {
            interpreter: cfg.runtime_binary.clone(),
        };

        let request = build_request(&cfg, &runtime).expect("request");
        assert_eq!(request.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(request.args, cfg.workload);
        assert_eq!(request.workdir, cfg.base_dir);
        assert_eq!(request.log_path, cfg.log_file);
        assert!(request.env.contains(&(
            OsString::from(DATA_DIR_VAR),
            cfg.data_dir.clone().into_os_string()
        )));
        assert!(request.env_remove.is_empty());
    }

    #[test]
    fn runner_error_still_closes_block_with_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        let runner = ScriptedRunner::failing("log handle vanished");

        let report = run_job(&cfg, &runner).expect("run");
        assert_eq!(report.exit_code, exit_codes::FAILURE);
        assert!(!report.outcome.is_success());

        let log = fs::read_to_string(&cfg.log_file).expect("read log");
        assert_eq!(log.matches("[START] ").count(), 1);
        assert_eq!(log.matches("[ERROR] ").count(), 1);
        assert!(log.contains("log handle vanished"));
        assert!(!log.contains("[END]"));
    }

    #[test]
    fn duration_millis_saturate() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn setup_failure_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        fs::write(&cfg.data_dir, "blocks the data dir").expect("write");
        let runner = ScriptedRunner::new(vec![WorkloadExit::Code(0)]);

        assert!(run_job(&cfg, &runner).is_err());
        assert!(runner.requests().is_empty());
        let log = fs::read_to_string(&cfg.log_file).unwrap_or_default();
        assert!(!log.contains("[START]"));
    }
}

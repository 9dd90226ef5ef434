//! Scheduled batch-job wrapper.
//!
//! Resolves paths from flags, environment overrides and `jobwrap.toml`,
//! activates the runtime environment, runs the workload once with its output
//! appended to the job log, and exits 0 on success or 1 on any failure.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use jobwrap::core::config::ConfigLayer;
use jobwrap::exit_codes;
use jobwrap::io::config::resolve_run_config;
use jobwrap::io::process::ProcessRunner;
use jobwrap::job::run_job;
use jobwrap::logging;

#[derive(Parser)]
#[command(
    name = "jobwrap",
    version,
    about = "Run a scheduled batch job and record its lifecycle"
)]
struct Cli {
    /// Debug diagnostics on stderr (ignored when `RUST_LOG` is set).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workload once and append a run block to the job log.
    Run(RunArgs),
    /// Print the resolved run config as JSON without creating anything.
    Config(BaseArgs),
}

#[derive(Args)]
struct BaseArgs {
    /// Directory defaults are computed from (default: the executable's directory).
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    base: BaseArgs,

    /// Kill the workload and fail the run after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Refuse to run while another invocation holds this lock file.
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// Interpreter arguments, replacing the configured workload.
    #[arg(last = true)]
    workload: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("jobwrap: {:#}", err);
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Config(args) => cmd_config(&args),
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let base_dir = resolve_base_dir(args.base.base_dir.as_deref())?;
    let cli_layer = ConfigLayer {
        timeout_secs: args.timeout_secs,
        lock_file: args.lock_file,
        workload: (!args.workload.is_empty()).then_some(args.workload),
        ..ConfigLayer::default()
    };
    let cfg = resolve_run_config(&base_dir, &cli_layer)?;
    let report = run_job(&cfg, &ProcessRunner)?;
    Ok(report.exit_code)
}

fn cmd_config(args: &BaseArgs) -> Result<i32> {
    let base_dir = resolve_base_dir(args.base_dir.as_deref())?;
    let cfg = resolve_run_config(&base_dir, &ConfigLayer::default())?;
    let json = serde_json::to_string_pretty(&cfg).context("serialize run config")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

/// Absolute base directory: the `--base-dir` flag, else the executable's directory.
fn resolve_base_dir(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return std::path::absolute(dir)
            .with_context(|| format!("resolve base dir {}", dir.display()));
    }
    let exe = std::env::current_exe().context("locate jobwrap executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("executable {} has no parent directory", exe.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_trailing_workload() {
        let cli = Cli::parse_from([
            "jobwrap",
            "run",
            "--timeout-secs",
            "600",
            "--",
            "motion/motion.py",
            "--once",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.timeout_secs, Some(600));
        assert_eq!(args.workload, vec!["motion/motion.py", "--once"]);
        assert!(args.base.base_dir.is_none());
    }

    #[test]
    fn parse_config_with_base_dir() {
        let cli = Cli::parse_from(["jobwrap", "-v", "config", "--base-dir", "/opt/cctv"]);
        assert!(cli.verbose);
        let Command::Config(args) = cli.command else {
            panic!("expected config");
        };
        assert_eq!(args.base_dir, Some(PathBuf::from("/opt/cctv")));
    }

    #[test]
    fn relative_base_dir_becomes_absolute() {
        let dir = resolve_base_dir(Some(Path::new("jobs/motion"))).expect("base dir");
        assert!(dir.is_absolute());
        assert!(dir.ends_with("jobs/motion"));
    }

    #[test]
    fn default_base_dir_is_executable_dir() {
        let dir = resolve_base_dir(None).expect("base dir");
        let exe = std::env::current_exe().expect("exe");
        assert_eq!(Some(dir.as_path()), exe.parent());
    }
}

//! Runtime activation: pick the isolated environment, its fallback, or the
//! ambient system interpreter.
//!
//! Activation never fails a run. A missing environment is reported as a
//! `[WARN]` notice and the workload runs on the system interpreter.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::types::LogEntry;

#[cfg(not(windows))]
const ENV_BIN_DIR: &str = "bin";
#[cfg(windows)]
const ENV_BIN_DIR: &str = "Scripts";

#[cfg(not(windows))]
const ENV_INTERPRETER: &str = "python";
#[cfg(windows)]
const ENV_INTERPRETER: &str = "python.exe";

/// Which runtime will execute the workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeHandle {
    Isolated {
        env_dir: PathBuf,
        interpreter: PathBuf,
        /// The configured directory was missing and the fallback was used.
        fallback: bool,
    },
    Ambient {
        interpreter: PathBuf,
    },
}

/// Variables to set and remove on the workload so it behaves as if the
/// environment had been activated in its shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationEnv {
    pub set: Vec<(OsString, OsString)>,
    pub remove: Vec<OsString>,
}

impl RuntimeHandle {
    pub fn interpreter(&self) -> &Path {
        match self {
            RuntimeHandle::Isolated { interpreter, .. }
            | RuntimeHandle::Ambient { interpreter } => interpreter,
        }
    }

    pub fn is_isolated(&self) -> bool {
        matches!(self, RuntimeHandle::Isolated { .. })
    }

    /// Environment changes implied by activation, given the inherited `PATH`.
    pub fn activation_env(&self, inherited_path: Option<&OsStr>) -> Result<ActivationEnv> {
        let RuntimeHandle::Isolated { env_dir, .. } = self else {
            return Ok(ActivationEnv::default());
        };
        let bin_dir = env_dir.join(ENV_BIN_DIR);
        let mut entries = vec![bin_dir];
        if let Some(path) = inherited_path {
            entries.extend(std::env::split_paths(path));
        }
        let path = std::env::join_paths(entries)
            .with_context(|| format!("build PATH for runtime env {}", env_dir.display()))?;
        Ok(ActivationEnv {
            set: vec![
                ("VIRTUAL_ENV".into(), env_dir.clone().into_os_string()),
                ("PATH".into(), path),
            ],
            remove: vec!["PYTHONHOME".into()],
        })
    }
}

/// Result of activation: the handle plus the notice for the run block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub handle: RuntimeHandle,
    pub notice: LogEntry,
}

/// Interpreter inside an environment directory, if the environment exists.
pub fn env_interpreter(env_dir: &Path) -> Option<PathBuf> {
    let interpreter = env_dir.join(ENV_BIN_DIR).join(ENV_INTERPRETER);
    interpreter.is_file().then_some(interpreter)
}

/// Probe `env_dir`, then `fallback_dir`, then settle on `system_binary`.
pub fn activate(env_dir: &Path, fallback_dir: &Path, system_binary: &Path) -> Activation {
    if let Some(interpreter) = env_interpreter(env_dir) {
        info!(env_dir = %env_dir.display(), "activating runtime env");
        let notice = LogEntry::info(format!(
            "Using runtime env {} ({})",
            env_dir.display(),
            interpreter.display()
        ));
        return Activation {
            handle: RuntimeHandle::Isolated {
                env_dir: env_dir.to_path_buf(),
                interpreter,
                fallback: false,
            },
            notice,
        };
    }

    if let Some(interpreter) = env_interpreter(fallback_dir) {
        info!(
            env_dir = %env_dir.display(),
            fallback_dir = %fallback_dir.display(),
            "runtime env missing, activating fallback"
        );
        let notice = LogEntry::info(format!(
            "Runtime env {} not found; using fallback env {} ({})",
            env_dir.display(),
            fallback_dir.display(),
            interpreter.display()
        ));
        return Activation {
            handle: RuntimeHandle::Isolated {
                env_dir: fallback_dir.to_path_buf(),
                interpreter,
                fallback: true,
            },
            notice,
        };
    }

    warn!(
        env_dir = %env_dir.display(),
        fallback_dir = %fallback_dir.display(),
        "no runtime env found, using system runtime"
    );
    Activation {
        handle: RuntimeHandle::Ambient {
            interpreter: system_binary.to_path_buf(),
        },
        notice: LogEntry::warn(format!(
            "Runtime env not found at {} or {}; using system runtime {}",
            env_dir.display(),
            fallback_dir.display(),
            system_binary.display()
        )),
    }
}

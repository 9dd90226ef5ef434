//! Run configuration resolution.
//!
//! Every field comes from the first layer that sets it (CLI flags, then
//! environment overrides, then `jobwrap.toml`), falling back to a default
//! computed from the base directory. The result is an immutable [`RunConfig`]
//! that is passed explicitly to every later step.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

pub const RUNTIME_ENV_DIR_VAR: &str = "RUNTIME_ENV_DIR";
pub const RUNTIME_ENV_FALLBACK_DIR_VAR: &str = "RUNTIME_ENV_FALLBACK_DIR";
pub const LOG_FILE_VAR: &str = "LOG_FILE";
pub const DATA_DIR_VAR: &str = "DATA_DIR";
pub const RUNTIME_BINARY_VAR: &str = "PYTHON";
pub const TIMEOUT_VAR: &str = "JOB_TIMEOUT_SECS";
pub const LOCK_FILE_VAR: &str = "JOB_LOCK_FILE";
/// Exported to the workload alongside `DATA_DIR` and `LOG_FILE`.
pub const BASE_DIR_VAR: &str = "JOB_BASE_DIR";

/// Variables the wrapper always sets itself; `extra_env` may not shadow them.
pub const RESERVED_WORKLOAD_VARS: [&str; 3] = [DATA_DIR_VAR, LOG_FILE_VAR, BASE_DIR_VAR];

pub const DEFAULT_RUNTIME_ENV_DIR: &str = ".venv";
pub const DEFAULT_RUNTIME_ENV_FALLBACK_DIR: &str = "venv";
pub const DEFAULT_LOG_FILE: &str = "logs/motion_job.log";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_RUNTIME_BINARY: &str = "python3";
pub const DEFAULT_WORKLOAD: [&str; 2] = ["-m", "image_processing.pipeline_orchestrator"];

/// One source of partial configuration.
///
/// The same shape is used for CLI flags, environment overrides and the TOML
/// file, so precedence is just "first `Some` wins".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub runtime_env_dir: Option<PathBuf>,
    pub runtime_env_fallback_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    /// Interpreter used when no isolated environment is found.
    pub runtime_binary: Option<PathBuf>,
    /// Arguments passed to the interpreter.
    pub workload: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub lock_file: Option<PathBuf>,
    /// Additional variables exported to the workload.
    pub extra_env: BTreeMap<String, String>,
}

impl ConfigLayer {
    /// Build a layer from named environment variables.
    ///
    /// Empty values count as unset, matching `${VAR:-default}` in a shell.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let timeout_secs = match get(TIMEOUT_VAR) {
            Some(raw) => {
                let raw = raw
                    .into_string()
                    .map_err(|_| anyhow!("{TIMEOUT_VAR} is not valid UTF-8"))?;
                let secs = raw
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("parse {TIMEOUT_VAR}={raw:?}"))?;
                Some(secs)
            }
            None => None,
        };

        let layer = Self {
            runtime_env_dir: get(RUNTIME_ENV_DIR_VAR).map(PathBuf::from),
            runtime_env_fallback_dir: get(RUNTIME_ENV_FALLBACK_DIR_VAR).map(PathBuf::from),
            log_file: get(LOG_FILE_VAR).map(PathBuf::from),
            data_dir: get(DATA_DIR_VAR).map(PathBuf::from),
            runtime_binary: get(RUNTIME_BINARY_VAR).map(PathBuf::from),
            workload: None,
            timeout_secs,
            lock_file: get(LOCK_FILE_VAR).map(PathBuf::from),
            extra_env: BTreeMap::new(),
        };
        layer.validate()?;
        Ok(layer)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == Some(0) {
            bail!("timeout_secs must be > 0");
        }
        if let Some(workload) = &self.workload
            && workload.is_empty()
        {
            bail!("workload must be a non-empty array");
        }
        for key in self.extra_env.keys() {
            if key.is_empty() || key.contains('=') {
                bail!("extra_env key {key:?} is not a valid variable name");
            }
            if RESERVED_WORKLOAD_VARS.contains(&key.as_str()) {
                bail!("extra_env must not set {key}; it is derived from the run config");
            }
        }
        Ok(())
    }
}

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub base_dir: PathBuf,
    pub runtime_env_dir: PathBuf,
    pub runtime_env_fallback_dir: PathBuf,
    pub log_file: PathBuf,
    pub data_dir: PathBuf,
    pub runtime_binary: PathBuf,
    pub workload: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub lock_file: Option<PathBuf>,
    pub extra_env: BTreeMap<String, String>,
}

impl RunConfig {
    /// Resolve a config from `layers`, highest precedence first.
    ///
    /// `base_dir` must be absolute; relative paths in any layer are anchored
    /// to it so the caller's working directory never matters.
    pub fn resolve(base_dir: &Path, layers: &[&ConfigLayer]) -> Result<Self> {
        if !base_dir.is_absolute() {
            bail!("base directory must be absolute: {}", base_dir.display());
        }
        for layer in layers {
            layer.validate()?;
        }

        // A bare command name is left to `PATH` lookup; anything with a
        // directory part is a path like every other override.
        let runtime_binary = layers
            .iter()
            .find_map(|layer| layer.runtime_binary.clone())
            .map(|binary| {
                if binary.components().count() > 1 {
                    anchor(base_dir, binary)
                } else {
                    binary
                }
            })
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNTIME_BINARY));
        let workload = layers
            .iter()
            .find_map(|layer| layer.workload.clone())
            .unwrap_or_else(|| DEFAULT_WORKLOAD.iter().map(ToString::to_string).collect());
        let lock_file = layers
            .iter()
            .find_map(|layer| layer.lock_file.clone())
            .map(|path| anchor(base_dir, path));

        // Higher-precedence layers win per key.
        let mut extra_env = BTreeMap::new();
        for layer in layers.iter().rev() {
            extra_env.extend(layer.extra_env.clone());
        }

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            runtime_env_dir: pick_path(
                base_dir,
                layers,
                |l| l.runtime_env_dir.as_ref(),
                DEFAULT_RUNTIME_ENV_DIR,
            ),
            runtime_env_fallback_dir: pick_path(
                base_dir,
                layers,
                |l| l.runtime_env_fallback_dir.as_ref(),
                DEFAULT_RUNTIME_ENV_FALLBACK_DIR,
            ),
            log_file: pick_path(base_dir, layers, |l| l.log_file.as_ref(), DEFAULT_LOG_FILE),
            data_dir: pick_path(base_dir, layers, |l| l.data_dir.as_ref(), DEFAULT_DATA_DIR),
            runtime_binary,
            workload,
            timeout_secs: layers.iter().find_map(|layer| layer.timeout_secs),
            lock_file,
            extra_env,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Variables the workload must see, in addition to runtime activation.
    pub fn workload_env(&self) -> Vec<(OsString, OsString)> {
        let mut vars: Vec<(OsString, OsString)> = self
            .extra_env
            .iter()
            .map(|(key, value)| (OsString::from(key), OsString::from(value)))
            .collect();
        vars.push((DATA_DIR_VAR.into(), self.data_dir.clone().into_os_string()));
        vars.push((LOG_FILE_VAR.into(), self.log_file.clone().into_os_string()));
        vars.push((BASE_DIR_VAR.into(), self.base_dir.clone().into_os_string()));
        vars
    }
}

fn pick_path<F>(base_dir: &Path, layers: &[&ConfigLayer], field: F, default: &str) -> PathBuf
where
    F: Fn(&ConfigLayer) -> Option<&PathBuf>,
{
    let chosen = layers
        .iter()
        .find_map(|layer| field(*layer))
        .cloned()
        .unwrap_or_else(|| PathBuf::from(default));
    anchor(base_dir, chosen)
}

fn anchor(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> PathBuf {
        std::env::temp_dir().join("jobwrap-base")
    }

    fn env_layer(vars: &[(&str, &str)]) -> Result<ConfigLayer> {
        let map: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        ConfigLayer::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_are_relative_to_base_dir() {
        let cfg = RunConfig::resolve(&base(), &[]).expect("resolve");
        assert_eq!(cfg.runtime_env_dir, base().join(".venv"));
        assert_eq!(cfg.runtime_env_fallback_dir, base().join("venv"));
        assert_eq!(cfg.log_file, base().join("logs/motion_job.log"));
        assert_eq!(cfg.data_dir, base().join("data"));
        assert_eq!(cfg.runtime_binary, PathBuf::from("python3"));
        assert_eq!(cfg.workload, DEFAULT_WORKLOAD);
        assert_eq!(cfg.timeout(), None);
        assert_eq!(cfg.lock_file, None);
    }

    #[test]
    fn relative_runtime_binary_path_is_anchored() {
        let relative = env_layer(&[(RUNTIME_BINARY_VAR, "tools/python")]).expect("env");
        let cfg = RunConfig::resolve(&base(), &[&relative]).expect("resolve");
        assert_eq!(cfg.runtime_binary, base().join("tools/python"));

        let bare = env_layer(&[(RUNTIME_BINARY_VAR, "python3.12")]).expect("env");
        let cfg = RunConfig::resolve(&base(), &[&bare]).expect("resolve");
        assert_eq!(cfg.runtime_binary, PathBuf::from("python3.12"));

        let absolute = env_layer(&[(RUNTIME_BINARY_VAR, "/usr/bin/python3")]).expect("env");
        let cfg = RunConfig::resolve(&base(), &[&absolute]).expect("resolve");
        assert_eq!(cfg.runtime_binary, PathBuf::from("/usr/bin/python3"));
    }

    #[test]
    fn env_overrides_win_over_file_layer() {
        let env = env_layer(&[
            (DATA_DIR_VAR, "/srv/motion/data"),
            (LOG_FILE_VAR, "custom/job.log"),
        ])
        .expect("env");
        let file = ConfigLayer {
            data_dir: Some(PathBuf::from("/ignored")),
            runtime_env_dir: Some(PathBuf::from("envs/py311")),
            ..ConfigLayer::default()
        };

        let cfg = RunConfig::resolve(&base(), &[&env, &file]).expect("resolve");
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/motion/data"));
        assert_eq!(cfg.log_file, base().join("custom/job.log"));
        assert_eq!(cfg.runtime_env_dir, base().join("envs/py311"));
    }

    #[test]
    fn empty_env_values_count_as_unset() {
        let env = env_layer(&[(DATA_DIR_VAR, ""), (TIMEOUT_VAR, "")]).expect("env");
        assert_eq!(env, ConfigLayer::default());
    }

    #[test]
    fn timeout_must_be_positive_integer() {
        assert!(env_layer(&[(TIMEOUT_VAR, "soon")]).is_err());
        assert!(env_layer(&[(TIMEOUT_VAR, "0")]).is_err());
        let layer = env_layer(&[(TIMEOUT_VAR, " 45 ")]).expect("env");
        assert_eq!(layer.timeout_secs, Some(45));
    }

    #[test]
    fn relative_base_dir_is_rejected() {
        let err = RunConfig::resolve(Path::new("relative/base"), &[]).expect_err("relative");
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn extra_env_cannot_shadow_data_dir() {
        let mut layer = ConfigLayer::default();
        layer
            .extra_env
            .insert(DATA_DIR_VAR.to_string(), "/elsewhere".to_string());
        assert!(RunConfig::resolve(&base(), &[&layer]).is_err());
    }

    #[test]
    fn workload_env_carries_resolved_data_dir() {
        let mut file = ConfigLayer::default();
        file.extra_env
            .insert("CCTV_RECORDINGS_DIR".to_string(), "/mnt/cam1".to_string());
        let cfg = RunConfig::resolve(&base(), &[&file]).expect("resolve");
        let env = cfg.workload_env();
        assert!(env.contains(&(
            OsString::from(DATA_DIR_VAR),
            base().join("data").into_os_string()
        )));
        assert!(env.contains(&(
            OsString::from("CCTV_RECORDINGS_DIR"),
            OsString::from("/mnt/cam1")
        )));
    }
}

//! Config sources that touch the outside world: `jobwrap.toml` and the
//! process environment.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::config::{ConfigLayer, RunConfig};

/// File name of the optional config file inside the base directory.
pub const CONFIG_FILE_NAME: &str = "jobwrap.toml";

pub fn config_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CONFIG_FILE_NAME)
}

/// Load the config file layer.
///
/// If the file is missing, returns an empty layer so built-in defaults apply.
pub fn load_config_file(path: &Path) -> Result<ConfigLayer> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ConfigLayer::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let layer: ConfigLayer =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    layer
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(layer)
}

/// Read the override variables once from the process environment.
pub fn env_layer() -> Result<ConfigLayer> {
    ConfigLayer::from_lookup(|name| std::env::var_os(name)).context("read environment overrides")
}

/// Resolve the run config: `cli` flags, then the environment, then the file.
pub fn resolve_run_config(base_dir: &Path, cli: &ConfigLayer) -> Result<RunConfig> {
    let env = env_layer()?;
    let file = load_config_file(&config_path(base_dir))?;
    let cfg = RunConfig::resolve(base_dir, &[cli, &env, &file])?;
    debug!(
        base_dir = %cfg.base_dir.display(),
        log_file = %cfg.log_file.display(),
        data_dir = %cfg.data_dir.display(),
        "run config resolved"
    );
    Ok(cfg)
}

/// Create the log directory and the data directory if they are missing.
///
/// `create_dir_all` succeeds when the directory already exists, including when
/// a concurrent invocation created it first.
pub fn prepare_run_dirs(cfg: &RunConfig) -> Result<()> {
    if let Some(parent) = cfg.log_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("create data directory {}", cfg.data_dir.display()))?;
    Ok(())
}

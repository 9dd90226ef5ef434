//! Test-only helpers: scripted workload runners, fake runtime environments and
//! a scratch job layout.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::config::{ConfigLayer, RunConfig};
use crate::core::types::{SEPARATOR, WorkloadExit};
use crate::io::process::{WorkloadRequest, WorkloadRunner, open_append};

/// Shell workload used by process-level tests.
///
/// Arguments: `[exit_code] [sleep_secs]`. Prints the variables the wrapper is
/// expected to export, plus one line on stderr.
pub const WORKLOAD_SCRIPT: &str = r#"echo "motion job running"
echo "data_dir=${DATA_DIR:-}"
echo "virtual_env=${VIRTUAL_ENV:-}"
echo "workload diagnostics" >&2
if [ -n "${2:-}" ]; then sleep "$2"; fi
exit "${1:-0}"
"#;

pub fn write_workload_script(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, WORKLOAD_SCRIPT).with_context(|| format!("write {}", path.display()))
}

/// Create a minimal runtime environment whose interpreter is `/bin/sh`.
///
/// The interpreter is a symlink rather than a freshly written executable, so
/// tests never race on `ETXTBSY`.
#[cfg(unix)]
pub fn fake_env(env_dir: &Path) -> Result<PathBuf> {
    let bin = env_dir.join("bin");
    fs::create_dir_all(&bin).with_context(|| format!("create {}", bin.display()))?;
    let interpreter = bin.join("python");
    std::os::unix::fs::symlink("/bin/sh", &interpreter)
        .with_context(|| format!("link {}", interpreter.display()))?;
    Ok(interpreter)
}

enum Scripted {
    Exit(WorkloadExit),
    Error(String),
}

/// Workload runner that replays predetermined exits and records requests.
pub struct ScriptedRunner {
    queue: RefCell<VecDeque<Scripted>>,
    requests: RefCell<Vec<WorkloadRequest>>,
}

impl ScriptedRunner {
    pub fn new(exits: Vec<WorkloadExit>) -> Self {
        Self {
            queue: RefCell::new(exits.into_iter().map(Scripted::Exit).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Runner whose single invocation returns an error.
    pub fn failing(message: &str) -> Self {
        Self {
            queue: RefCell::new(VecDeque::from([Scripted::Error(message.to_string())])),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<WorkloadRequest> {
        self.requests.borrow().clone()
    }
}

impl WorkloadRunner for ScriptedRunner {
    fn run(&self, request: &WorkloadRequest) -> Result<WorkloadExit> {
        self.requests.borrow_mut().push(request.clone());
        let next = self
            .queue
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted runner exhausted"))?;
        match next {
            Scripted::Exit(exit) => {
                let mut log = open_append(&request.log_path)?;
                writeln!(log, "scripted workload output").context("write transcript")?;
                Ok(exit)
            }
            Scripted::Error(message) => Err(anyhow!(message)),
        }
    }
}

/// Scratch base directory with the shell workload installed.
pub struct TestJob {
    temp: TempDir,
    pub script: PathBuf,
}

impl TestJob {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let script = temp.path().join("workload.sh");
        write_workload_script(&script)?;
        Ok(Self { temp, script })
    }

    pub fn base(&self) -> &Path {
        self.temp.path()
    }

    /// Layer that runs the shell workload on `/bin/sh` and exits `exit_code`.
    pub fn layer(&self, exit_code: i32) -> ConfigLayer {
        ConfigLayer {
            runtime_binary: Some(PathBuf::from("/bin/sh")),
            workload: Some(vec![self.script.display().to_string(), exit_code.to_string()]),
            ..ConfigLayer::default()
        }
    }

    /// Layer that runs `body` as its own shell script on `/bin/sh`.
    pub fn script_layer(&self, name: &str, body: &str) -> Result<ConfigLayer> {
        let script = self.base().join(name);
        fs::write(&script, body).with_context(|| format!("write {}", script.display()))?;
        Ok(ConfigLayer {
            runtime_binary: Some(PathBuf::from("/bin/sh")),
            workload: Some(vec![script.display().to_string()]),
            ..ConfigLayer::default()
        })
    }

    pub fn config(&self, exit_code: i32) -> Result<RunConfig> {
        RunConfig::resolve(self.base(), &[&self.layer(exit_code)])
    }

    pub fn read_log(&self, cfg: &RunConfig) -> Result<String> {
        fs::read_to_string(&cfg.log_file)
            .with_context(|| format!("read {}", cfg.log_file.display()))
    }
}

/// Split a lifecycle log into run blocks (text after each separator line).
pub fn split_blocks(log: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    for line in log.lines() {
        if line == SEPARATOR {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(String::new());
            continue;
        }
        if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }
    blocks.extend(current);
    blocks
}

/// Count lines of `block` that start with `tag` (e.g. `"[START]"`).
pub fn count_marker(block: &str, tag: &str) -> usize {
    block.lines().filter(|line| line.starts_with(tag)).count()
}

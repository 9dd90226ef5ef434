//! Optional exclusive run lock.
//!
//! An exclusive `flock` is held on the lock file for the lifetime of
//! [`RunLock`]; the kernel releases it when the process exits, so a crashed
//! run never leaves a stale lock behind.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use tracing::debug;

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Take the lock without blocking.
///
/// Fails if another invocation holds it. The holder's pid is written into the
/// file for operators.
pub fn try_acquire(path: &Path) -> Result<RunLock> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create lock directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))?;

    if let Err(err) = file.try_lock_exclusive() {
        if err.kind() == fs2::lock_contended_error().kind() {
            let holder = fs::read_to_string(path).unwrap_or_default();
            return Err(anyhow!(
                "another run holds lock {} (pid {})",
                path.display(),
                holder.trim()
            ));
        }
        return Err(err).with_context(|| format!("lock {}", path.display()));
    }

    file.set_len(0)
        .with_context(|| format!("truncate lock file {}", path.display()))?;
    writeln!(file, "{}", std::process::id())
        .with_context(|| format!("write lock file {}", path.display()))?;
    debug!(path = %path.display(), "run lock acquired");

    Ok(RunLock {
        path: path.to_path_buf(),
        _file: file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("locks/job.lock");

        let held = try_acquire(&path).expect("first acquire");
        assert_eq!(held.path(), path);
        let err = try_acquire(&path).expect_err("contended");
        assert!(err.to_string().contains("another run holds lock"));
        assert!(err.to_string().contains(&std::process::id().to_string()));

        drop(held);
        try_acquire(&path).expect("reacquire after release");
    }
}

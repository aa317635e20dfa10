//! Single-run lock file.
//!
//! Two concurrent runs could both rewrite the same APT source lists, so a run
//! holds `provisr.lock` (containing its PID) for its whole lifetime. A lock
//! left by a process that no longer exists is stale and gets replaced.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock at `path` or fail if a live process holds it
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    log::info!("acquired run lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match holder(&path) {
                    Some(pid) if pid_alive(pid) => {
                        return Err(ProvisionError::Lock(format!(
                            "another run is in progress (pid {}, lock {})",
                            pid,
                            path.display()
                        )));
                    }
                    stale => {
                        log::warn!("removing stale lock {} (holder {:?})", path.display(), stale);
                        std::fs::remove_file(&path)?;
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(ProvisionError::Lock(format!(
            "could not acquire {}",
            path.display()
        )))
    }

    /// Lock for a run that may change the host. A dry run writes nothing, so it
    /// gets no lock and its directory is not created.
    pub fn for_run(path: impl Into<PathBuf>, dry_run: bool) -> Result<Option<Self>> {
        if dry_run {
            Ok(None)
        } else {
            Self::acquire(path).map(Some)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

fn holder(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

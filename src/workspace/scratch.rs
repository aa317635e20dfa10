//! Temporary download directories with guaranteed cleanup.
//!
//! Every directory handed out is tracked until `cleanup` runs. `cleanup` is
//! called after each step, when a stop signal ends the run, and again from
//! `Drop`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{ProvisionError, Result};

const PREFIX: &str = "provisr-";

#[derive(Debug)]
pub struct ScratchSpace {
    root: PathBuf,
    dirs: Mutex<Vec<PathBuf>>,
}

impl ScratchSpace {
    /// Scratch directories will be created under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh tracked directory whose name starts with `label`
    pub fn create_dir(&self, label: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-", PREFIX, sanitize(label)))
            .tempdir_in(&self.root)?
            .keep();
        self.dirs
            .lock()
            .map_err(|e| ProvisionError::action("scratch space", e.to_string()))?
            .push(dir.clone());
        log::debug!("created scratch dir {}", dir.display());
        Ok(dir)
    }

    /// Directories created and not yet removed
    pub fn live(&self) -> Vec<PathBuf> {
        self.dirs.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Remove every tracked directory; returns how many were removed
    pub fn cleanup(&self) -> usize {
        let dirs = match self.dirs.lock() {
            Ok(mut dirs) => std::mem::take(&mut *dirs),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let mut removed = 0;
        for dir in dirs {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("failed to remove scratch dir {}: {}", dir.display(), e),
            }
        }
        if removed > 0 {
            log::info!("removed {} scratch dir(s) under {}", removed, self.root.display());
        }
        removed
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_cleanup() {
        let root = tempdir().unwrap();
        let scratch = ScratchSpace::new(root.path());

        let a = scratch.create_dir("bat").unwrap();
        let b = scratch.create_dir("vendor oh-my-zsh").unwrap();
        std::fs::write(a.join("bat.deb"), b"x").unwrap();

        assert!(a.starts_with(root.path()));
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("provisr-bat-"));
        assert!(b.file_name().unwrap().to_string_lossy().starts_with("provisr-vendor_oh-my-zsh-"));
        assert_eq!(scratch.live().len(), 2);

        assert_eq!(scratch.cleanup(), 2);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(scratch.live().is_empty());
    }

    #[test]
    fn test_drop_cleans_up() {
        let root = tempdir().unwrap();
        let dir = {
            let scratch = ScratchSpace::new(root.path());
            scratch.create_dir("key").unwrap()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn test_cleanup_tolerates_already_removed() {
        let root = tempdir().unwrap();
        let scratch = ScratchSpace::new(root.path());
        let dir = scratch.create_dir("gone").unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(scratch.cleanup(), 0);
    }

    #[test]
    fn test_creates_missing_root() {
        let root = tempdir().unwrap();
        let scratch = ScratchSpace::new(root.path().join("Downloads"));
        let dir = scratch.create_dir("x").unwrap();
        assert!(dir.exists());
    }
}

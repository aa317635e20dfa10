//! Git clones for source builds and dotfiles.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::exec::{CommandRunner, CommandSpec};

/// Outcome of a clone request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneOutcome {
    Cloned,
    AlreadyPresent,
}

/// Thin wrapper over the git CLI
pub struct Git {
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Clone `url` into `dest` unless a repository is already there.
    pub async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        depth: Option<u32>,
        branch: Option<&str>,
    ) -> Result<CloneOutcome> {
        if dest.join(".git").exists() {
            log::info!("{} already cloned at {}", url, dest.display());
            return Ok(CloneOutcome::AlreadyPresent);
        }

        let mut spec = CommandSpec::new("git").arg("clone");
        if let Some(depth) = depth {
            spec = spec.args(["--depth".to_string(), depth.to_string()]);
        }
        if let Some(branch) = branch {
            spec = spec.args(["--branch", branch]);
        }
        spec = spec.arg(url).arg(dest.display().to_string());

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.runner.run_checked(&spec).await?;
        Ok(CloneOutcome::Cloned)
    }
}

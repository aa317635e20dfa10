//! Host checks that must pass before any step runs.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::exec::{CommandRunner, CommandSpec};

/// Commands every run needs
pub const REQUIRED_COMMANDS: &[&str] = &["apt-get", "dpkg-query", "git", "gpg", "install"];

/// What the host looks like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCheck {
    pub is_root: bool,
    /// Set when started through `sudo`; names the account that ran it
    pub sudo_user: Option<String>,
    pub missing: Vec<String>,
}

impl HostCheck {
    /// Inspect the host: effective uid and which commands resolve on `PATH`
    pub async fn inspect(runner: &dyn CommandRunner, required: &[&str]) -> Result<Self> {
        let output = runner.run(&CommandSpec::new("id").arg("-u")).await?;
        let is_root = output.success() && output.stdout.trim() == "0";

        let path = std::env::var_os("PATH").unwrap_or_default();
        let mut missing: Vec<String> = required
            .iter()
            .filter(|cmd| find_in_path(cmd, &path).is_none())
            .map(|cmd| cmd.to_string())
            .collect();
        if !is_root && find_in_path("sudo", &path).is_none() {
            missing.push("sudo".to_string());
        }

        let sudo_user = std::env::var("SUDO_USER").ok().filter(|u| !u.is_empty());

        Ok(Self {
            is_root,
            sudo_user,
            missing,
        })
    }

    /// Fail with a `PrerequisiteError` when anything is missing, or when the
    /// run was started as `sudo provisr`.
    ///
    /// Under sudo `$HOME` points at root's home while the account being
    /// provisioned is `SUDO_USER`, so dotfiles and the login shell would land
    /// on different users. provisr elevates individual commands itself.
    pub fn ensure(&self) -> Result<()> {
        if let (true, Some(user)) = (self.is_root, &self.sudo_user) {
            return Err(ProvisionError::Prerequisite(format!(
                "do not run provisr through sudo; run it as {} and it will ask for sudo when needed",
                user
            )));
        }
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(ProvisionError::Prerequisite(format!(
                "missing required command(s): {}",
                self.missing.join(", ")
            )))
        }
    }

    /// Elevated commands need a sudo prefix
    pub fn needs_sudo(&self) -> bool {
        !self.is_root
    }
}

/// Locate an executable on a `PATH`-style list
pub fn find_in_path(command: &str, path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Ask for the sudo password once, up front, on the user's terminal.
///
/// Step commands run with stdin closed, so sudo must already hold a cached
/// credential by the time they start.
pub async fn acquire_sudo() -> Result<()> {
    let status = tokio::process::Command::new("sudo")
        .arg("-v")
        .status()
        .await
        .map_err(|e| ProvisionError::Prerequisite(format!("cannot run sudo: {}", e)))?;
    if status.success() {
        Ok(())
    } else {
        Err(ProvisionError::Prerequisite(
            "this account cannot obtain root privileges via sudo".to_string(),
        ))
    }
}

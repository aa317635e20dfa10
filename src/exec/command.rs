//! External process invocation.
//!
//! Every step action that touches the system goes through a [`CommandRunner`].
//! A non-zero exit is not an error at this layer: the caller decides what a
//! failed command means. Only spawn failures and timeouts are errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::error::{ProvisionError, Result};

/// Maximum number of stderr lines carried into a diagnostic
const DIAGNOSTIC_LINES: usize = 5;

/// A single external command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    /// Program to execute (resolved through PATH)
    pub program: String,
    /// Arguments passed verbatim, never through a shell
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Run with root privileges (via sudo when not already root)
    pub elevated: bool,
    /// Kill the command after this many milliseconds
    pub timeout_ms: Option<u64>,
}

impl CommandSpec {
    /// Create a command for the given program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Mark the command as requiring root
    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Set the timeout in milliseconds
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Program and arguments as they will actually be executed.
    ///
    /// Elevated commands get a `sudo` prefix when `use_sudo` is set; the
    /// environment is passed through `env` because sudo scrubs it.
    pub fn argv(&self, use_sudo: bool) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 4);
        if self.elevated && use_sudo {
            argv.push("sudo".to_string());
            if !self.env.is_empty() {
                argv.push("env".to_string());
                argv.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
            }
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elevated {
            write!(f, "[root] ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit status as printed in diagnostics
    pub fn status(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "killed by signal".to_string(),
        }
    }

    /// Tail of stderr (or stdout when stderr is empty)
    pub fn diagnostic(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
        lines[start..].join("\n")
    }

    /// Turn a non-zero exit into a step action error
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProvisionError::StepAction {
                command: spec.to_string(),
                status: self.status(),
                detail: self.diagnostic(),
            })
        }
    }
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and capture its output
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run the command and fail on a non-zero exit
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.run(spec).await?.check(spec)
    }
}

/// Runs commands on the host with tokio
#[derive(Debug, Clone)]
pub struct SystemRunner {
    use_sudo: bool,
}

impl SystemRunner {
    /// Create a runner; `use_sudo` prefixes elevated commands with sudo
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let argv = spec.argv(self.use_sudo);
        log::debug!("exec: {}", argv.join(" "));

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = cmd.spawn().map_err(|e| ProvisionError::StepAction {
            command: spec.to_string(),
            status: "failed to start".to_string(),
            detail: e.to_string(),
        })?;

        let output = match spec.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), child.wait_with_output())
                .await
                .map_err(|_| ProvisionError::StepAction {
                    command: spec.to_string(),
                    status: "timed out".to_string(),
                    detail: format!("Command timed out after {}ms", ms),
                })??,
            None => child.wait_with_output().await?,
        };

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            elapsed: started.elapsed(),
        };
        log::debug!("exit: {} ({:?}) for {}", result.status(), result.elapsed, spec.program);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("apt-get")
            .args(["install", "-y"])
            .arg("git")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .elevated()
            .timeout_ms(5000);

        assert_eq!(spec.program, "apt-get");
        assert_eq!(spec.args, vec!["install", "-y", "git"]);
        assert!(spec.elevated);
        assert_eq!(spec.timeout_ms, Some(5000));
        assert_eq!(spec.env.get("DEBIAN_FRONTEND").map(String::as_str), Some("noninteractive"));
    }

    #[test]
    fn test_argv_without_sudo() {
        let spec = CommandSpec::new("apt-get").arg("update").elevated();
        assert_eq!(spec.argv(false), vec!["apt-get", "update"]);
    }

    #[test]
    fn test_argv_with_sudo_passes_env() {
        let spec = CommandSpec::new("apt-get")
            .arg("update")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .elevated();
        assert_eq!(
            spec.argv(true),
            vec!["sudo", "env", "DEBIAN_FRONTEND=noninteractive", "apt-get", "update"]
        );
    }

    #[test]
    fn test_argv_unelevated_ignores_sudo() {
        let spec = CommandSpec::new("git").arg("status");
        assert_eq!(spec.argv(true), vec!["git", "status"]);
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hi"]).elevated();
        assert_eq!(spec.to_string(), "[root] sh -c 'echo hi'");
    }

    #[test]
    fn test_diagnostic_prefers_stderr_tail() {
        let output = CommandOutput {
            code: Some(100),
            stdout: "reading lists".to_string(),
            stderr: "1\n2\n3\n4\n5\n6\nE: Unable to locate package nope\n".to_string(),
            elapsed: Duration::ZERO,
        };
        let diag = output.diagnostic();
        assert!(!diag.contains('1'));
        assert!(diag.ends_with("E: Unable to locate package nope"));
        assert_eq!(diag.lines().count(), DIAGNOSTIC_LINES);
    }

    #[test]
    fn test_check_maps_failure() {
        let spec = CommandSpec::new("false");
        let err = CommandOutput::failed(1, "boom").check(&spec).unwrap_err();
        match err {
            ProvisionError::StepAction { command, status, detail } => {
                assert_eq!(command, "false");
                assert_eq!(status, "exit code 1");
                assert_eq!(detail, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_system_runner_captures_stdout() {
        let runner = SystemRunner::new(false);
        let output = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello"]))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_system_runner_nonzero_is_not_error() {
        let runner = SystemRunner::new(false);
        let output = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.diagnostic(), "oops");
    }

    #[tokio::test]
    async fn test_system_runner_cwd_and_env() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "found").unwrap();
        let runner = SystemRunner::new(false);
        let output = runner
            .run(
                &CommandSpec::new("sh")
                    .args(["-c", "cat marker.txt; printf \" $GREETING\""])
                    .cwd(dir.path())
                    .env("GREETING", "hi"),
            )
            .await
            .unwrap();
        assert_eq!(output.stdout, "found hi");
    }

    #[tokio::test]
    async fn test_system_runner_timeout() {
        let runner = SystemRunner::new(false);
        let err = runner
            .run(&CommandSpec::new("sleep").arg("10").timeout_ms(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let runner = SystemRunner::new(false);
        let err = runner
            .run(&CommandSpec::new("nonexistent_command_xyz123"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[tokio::test]
    async fn test_run_checked_fails_on_nonzero() {
        let runner = SystemRunner::new(false);
        assert!(runner.run_checked(&CommandSpec::new("false")).await.is_err());
        assert!(runner.run_checked(&CommandSpec::new("true")).await.is_ok());
    }
}

//! In-memory command runner that simulates apt/dpkg for tests.
//!
//! `MockRunner` keeps a set of installed packages: `dpkg-query` reports from
//! it, `apt-get install` adds to it and `apt-get purge/remove` removes from
//! it. Every other command succeeds unless a failure was scripted for it.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{ProvisionError, Result};

#[derive(Debug, Default)]
struct MockState {
    installed: HashSet<String>,
    calls: Vec<CommandSpec>,
    failures: HashMap<String, (i32, String)>,
    outputs: HashMap<String, String>,
}

/// Command runner that never touches the host
#[derive(Debug, Default)]
pub struct MockRunner {
    state: Mutex<MockState>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given packages installed
    pub fn with_installed<I, S>(self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut state) = self.state.lock() {
            state.installed.extend(packages.into_iter().map(Into::into));
        }
        self
    }

    /// Fail any command whose rendered text starts with `prefix`
    pub fn fail_on(self, prefix: impl Into<String>, code: i32, stderr: impl Into<String>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(prefix.into(), (code, stderr.into()));
        }
        self
    }

    /// Return `stdout` for any command whose rendered text starts with `prefix`
    pub fn respond(self, prefix: impl Into<String>, stdout: impl Into<String>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.outputs.insert(prefix.into(), stdout.into());
        }
        self
    }

    /// Every command run so far, rendered with [`CommandSpec`]'s Display
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.calls.iter().map(|c| c.to_string()).collect())
            .unwrap_or_default()
    }

    /// Commands run so far that mutate state (dpkg-query lookups excluded)
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("dpkg-query"))
            .collect()
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.installed.contains(package))
            .unwrap_or(false)
    }
}

fn matches_prefix<'a, V>(map: &'a HashMap<String, V>, rendered: &str) -> Option<&'a V> {
    map.iter()
        .filter(|(prefix, _)| rendered.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, v)| v)
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| ProvisionError::action("mock runner", e.to_string()))?;
        state.calls.push(spec.clone());

        let unprivileged = CommandSpec {
            elevated: false,
            ..spec.clone()
        };
        let rendered = unprivileged.to_string();

        if let Some((code, stderr)) = matches_prefix(&state.failures, &rendered) {
            return Ok(CommandOutput::failed(*code, stderr.clone()));
        }
        if let Some(stdout) = matches_prefix(&state.outputs, &rendered) {
            return Ok(CommandOutput::ok(stdout.clone()));
        }

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match (spec.program.as_str(), args.as_slice()) {
            ("dpkg-query", [.., package]) => {
                if state.installed.contains(*package) {
                    Ok(CommandOutput::ok("install ok installed"))
                } else {
                    Ok(CommandOutput::failed(
                        1,
                        format!("dpkg-query: no packages found matching {}", package),
                    ))
                }
            }
            ("apt-get", ["install", rest @ ..]) => {
                for pkg in rest.iter().filter(|a| !a.starts_with('-') && !a.contains('/')) {
                    state.installed.insert(pkg.to_string());
                }
                Ok(CommandOutput::ok(""))
            }
            ("apt-get", ["purge" | "remove", rest @ ..]) => {
                for pkg in rest.iter().filter(|a| !a.starts_with('-')) {
                    state.installed.remove(*pkg);
                }
                Ok(CommandOutput::ok(""))
            }
            ("false", _) => Ok(CommandOutput::failed(1, "")),
            _ => Ok(CommandOutput::ok("")),
        }
    }
}

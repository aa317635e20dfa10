//! Step definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::action::Action;
use super::predicate::Predicate;

/// Named group of steps that can be switched on or off as a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Prepare,
    Cleanup,
    Base,
    Repositories,
    Releases,
    Editor,
    Shell,
    Dotfiles,
    Desktop,
    Virtualization,
    Kernel,
    Extra,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::Prepare,
        Stage::Cleanup,
        Stage::Base,
        Stage::Repositories,
        Stage::Releases,
        Stage::Editor,
        Stage::Shell,
        Stage::Dotfiles,
        Stage::Desktop,
        Stage::Virtualization,
        Stage::Kernel,
        Stage::Extra,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Cleanup => "cleanup",
            Stage::Base => "base",
            Stage::Repositories => "repositories",
            Stage::Releases => "releases",
            Stage::Editor => "editor",
            Stage::Shell => "shell",
            Stage::Dotfiles => "dotfiles",
            Stage::Desktop => "desktop",
            Stage::Virtualization => "virtualization",
            Stage::Kernel => "kernel",
            Stage::Extra => "extra",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown stage '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// What a failed step does to the rest of the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the run; nothing after this step executes
    Fatal,
    /// Record the failure and move on
    #[default]
    WarnAndContinue,
}

/// One idempotent unit of provisioning work
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub description: String,
    pub stage: Stage,
    /// When this holds, the step is skipped
    pub predicate: Option<Predicate>,
    pub action: Action,
    pub policy: FailurePolicy,
    /// Manual follow-up shown in the summary when the step ran
    pub follow_up: Option<String>,
}

impl Step {
    pub fn new(name: impl Into<String>, stage: Stage, action: Action) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            stage,
            predicate: None,
            action,
            policy: FailurePolicy::default(),
            follow_up: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn skip_when(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn fatal(mut self) -> Self {
        self.policy = FailurePolicy::Fatal;
        self
    }

    pub fn follow_up(mut self, note: impl Into<String>) -> Self {
        self.follow_up = Some(note.into());
        self
    }
}

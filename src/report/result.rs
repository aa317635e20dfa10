//! Per-run step outcomes.

use std::fmt;
use std::time::Duration;

use crate::step::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The predicate held; the action did not run
    Skipped,
    Succeeded,
    Failed,
    /// Dry run: the action would have run
    Planned,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Skipped => "skipped",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Planned => "planned",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub stage: Stage,
    pub status: StepStatus,
    /// Diagnostic for failures, redacted
    pub message: Option<String>,
    pub elapsed: Duration,
    /// Carried over from the step when its action ran
    pub follow_up: Option<String>,
}

impl StepResult {
    pub fn new(name: impl Into<String>, stage: Stage, status: StepStatus, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            stage,
            status,
            message: None,
            elapsed,
            follow_up: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_follow_up(mut self, note: Option<String>) -> Self {
        self.follow_up = note;
        self
    }
}

/// Ordered results of one invocation
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub results: Vec<StepResult>,
    /// Name of the fatal step that stopped the run
    pub aborted_by: Option<String>,
    /// The run was cut short by an interrupt
    pub interrupted: bool,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: StepResult) {
        self.results.push(result);
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Results that did not end in success or skip
    pub fn failed(&self) -> impl Iterator<Item = &StepResult> {
        self.results.iter().filter(|r| r.status == StepStatus::Failed)
    }

    /// Follow-up notes of steps whose action ran successfully
    pub fn follow_ups(&self) -> Vec<(&str, &str)> {
        self.results
            .iter()
            .filter(|r| r.status == StepStatus::Succeeded)
            .filter_map(|r| r.follow_up.as_deref().map(|note| (r.name.as_str(), note)))
            .collect()
    }

    pub fn status_of(&self, name: &str) -> Option<StepStatus> {
        self.results.iter().find(|r| r.name == name).map(|r| r.status)
    }
}

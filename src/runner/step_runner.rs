//! Sequential step execution.
//!
//! Each step: evaluate its predicate, skip when satisfied, otherwise run the
//! action. A failure is printed and journaled as it happens; the step's
//! failure policy then decides whether the run goes on. Scratch directories
//! are released after every step, whatever the outcome.

use colored::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ProvisionError, Result};
use crate::report::{RunLog, RunReport, StepResult, StepStatus};
use crate::step::{FailurePolicy, Step};
use crate::toolbox::Toolbox;

use super::registry::StepRegistry;

/// How a run guarded by a stop condition ended
#[derive(Debug)]
pub enum RunOutcome<S> {
    Completed,
    /// A fatal step failed
    Aborted(ProvisionError),
    /// The stop future resolved first; the in-flight step was dropped
    Stopped(S),
}

pub struct StepRunner {
    tools: Arc<Toolbox>,
    log: Arc<RunLog>,
    dry_run: bool,
}

impl StepRunner {
    pub fn new(tools: Arc<Toolbox>, log: Arc<RunLog>) -> Self {
        Self {
            tools,
            log,
            dry_run: false,
        }
    }

    /// Evaluate predicates and print plans without running any action
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run every registered step in order, appending to `report`.
    ///
    /// Returns the error of the first fatal step that fails; `report` then
    /// holds the results up to and including that step.
    pub async fn run(&self, registry: &StepRegistry, report: &mut RunReport) -> Result<()> {
        let total = registry.len();
        for (index, step) in registry.steps().iter().enumerate() {
            println!("{} {}", format!("[{}/{}]", index + 1, total).dimmed(), step.description);
            let outcome = self.run_step(step, report).await;
            self.tools.scratch.cleanup();
            outcome?;
        }
        Ok(())
    }

    /// Run like [`StepRunner::run`] until `stop` resolves, whichever is first.
    ///
    /// A stopped run drops the in-flight step, which kills its child process,
    /// and marks `report` interrupted. Scratch space is cleaned on every path.
    pub async fn run_until<F, S>(&self, registry: &StepRegistry, report: &mut RunReport, stop: F) -> RunOutcome<S>
    where
        F: Future<Output = S>,
    {
        let outcome = tokio::select! {
            result = self.run(registry, report) => match result {
                Ok(()) => RunOutcome::Completed,
                Err(e) => RunOutcome::Aborted(e),
            },
            stopped = stop => RunOutcome::Stopped(stopped),
        };
        self.tools.scratch.cleanup();
        if matches!(outcome, RunOutcome::Stopped(_)) {
            report.interrupted = true;
        }
        outcome
    }

    async fn run_step(&self, step: &Step, report: &mut RunReport) -> Result<()> {
        let started = Instant::now();

        if let Some(predicate) = &step.predicate
            && predicate.is_satisfied(&self.tools).await
        {
            log::info!("step '{}' skipped: {} holds", step.name, predicate);
            println!("  {} already done", "-".dimmed());
            report.push(StepResult::new(&step.name, step.stage, StepStatus::Skipped, started.elapsed()));
            return Ok(());
        }

        if self.dry_run {
            for line in step.action.describe() {
                println!("  {} {}", "would".cyan(), self.log.redactor().redact(&line));
            }
            report.push(StepResult::new(&step.name, step.stage, StepStatus::Planned, started.elapsed()));
            return Ok(());
        }

        log::info!("step '{}' running", step.name);
        match step.action.execute(&self.tools).await {
            Ok(()) => {
                log::info!("step '{}' succeeded in {:?}", step.name, started.elapsed());
                println!("  {} done", "✓".green());
                report.push(
                    StepResult::new(&step.name, step.stage, StepStatus::Succeeded, started.elapsed())
                        .with_follow_up(step.follow_up.clone()),
                );
                Ok(())
            }
            Err(e) => {
                let message = self.log.redactor().redact(&e.to_string());
                eprintln!("  {} {}: {}", "✗".red().bold(), step.name, message);
                log::error!("step '{}' failed: {}", step.name, message);
                if let Err(log_err) = self.log.record_failure(&step.name, &e) {
                    log::warn!("could not write {}: {}", self.log.path().display(), log_err);
                }
                report.push(
                    StepResult::new(&step.name, step.stage, StepStatus::Failed, started.elapsed())
                        .with_message(message),
                );
                match step.policy {
                    FailurePolicy::Fatal => {
                        report.aborted_by = Some(step.name.clone());
                        Err(e)
                    }
                    FailurePolicy::WarnAndContinue => Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandSpec, MockRunner, Redactor};
    use crate::step::{Action, Predicate, Stage};
    use crate::system::PackageSpec;
    use tempfile::tempdir;

    fn setup(runner: Arc<MockRunner>, root: &std::path::Path) -> StepRunner {
        let tools = Arc::new(Toolbox::for_tests(runner, root).unwrap());
        let log = Arc::new(RunLog::new(root.join("provisr.log"), Redactor::default()));
        StepRunner::new(tools, log)
    }

    fn install(name: &str) -> Step {
        Step::new(format!("install-{}", name), Stage::Base, Action::Install(vec![PackageSpec::new(name)]))
            .skip_when(Predicate::PackageInstalled(name.to_string()))
    }

    #[tokio::test]
    async fn test_skip_when_predicate_holds() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(MockRunner::new().with_installed(["git"]));
        let mut registry = StepRegistry::new();
        registry.register(install("git")).unwrap();

        let mut report = RunReport::new();
        setup(runner.clone(), dir.path()).run(&registry, &mut report).await.unwrap();

        assert_eq!(report.status_of("install-git"), Some(StepStatus::Skipped));
        assert!(runner.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_and_surfaces() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(MockRunner::new().fail_on("false", 1, "nope"));
        let mut registry = StepRegistry::new();
        registry
            .register(Step::new("broken", Stage::Prepare, Action::Run(vec![CommandSpec::new("false")])).fatal())
            .unwrap();
        registry.register(install("vim")).unwrap();

        let mut report = RunReport::new();
        let result = setup(runner.clone(), dir.path()).run(&registry, &mut report).await;

        assert!(result.is_err());
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.aborted_by.as_deref(), Some("broken"));
        assert!(!runner.is_installed("vim"));
        let journal = std::fs::read_to_string(dir.path().join("provisr.log")).unwrap();
        assert!(journal.contains("[broken] action:"));
    }

    #[tokio::test]
    async fn test_warn_failure_continues() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(MockRunner::new().fail_on("false", 1, "nope"));
        let mut registry = StepRegistry::new();
        registry
            .register(Step::new("flaky", Stage::Extra, Action::Run(vec![CommandSpec::new("false")])))
            .unwrap();
        registry.register(install("vim")).unwrap();

        let mut report = RunReport::new();
        setup(runner.clone(), dir.path()).run(&registry, &mut report).await.unwrap();

        assert_eq!(report.status_of("flaky"), Some(StepStatus::Failed));
        assert!(report.results[0].message.as_deref().unwrap_or("").contains("nope"));
        assert_eq!(report.status_of("install-vim"), Some(StepStatus::Succeeded));
        assert!(report.aborted_by.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_running() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(MockRunner::new().with_installed(["git"]));
        let mut registry = StepRegistry::new();
        registry.register(install("git")).unwrap();
        registry.register(install("vim")).unwrap();

        let mut report = RunReport::new();
        setup(runner.clone(), dir.path())
            .dry_run(true)
            .run(&registry, &mut report)
            .await
            .unwrap();

        assert_eq!(report.status_of("install-git"), Some(StepStatus::Skipped));
        assert_eq!(report.status_of("install-vim"), Some(StepStatus::Planned));
        assert!(runner.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_kept_when_action_ran() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let mut registry = StepRegistry::new();
        registry.register(install("linux-image-liquorix-amd64").follow_up("Reboot")).unwrap();

        let mut report = RunReport::new();
        setup(runner, dir.path()).run(&registry, &mut report).await.unwrap();
        assert_eq!(report.follow_ups(), vec![("install-linux-image-liquorix-amd64", "Reboot")]);
    }

    #[tokio::test]
    async fn test_run_until_reports_completion_and_abort() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(MockRunner::new().fail_on("false", 1, "nope"));
        let step_runner = setup(runner, dir.path());

        let mut registry = StepRegistry::new();
        registry.register(install("git")).unwrap();
        let mut report = RunReport::new();
        let outcome = step_runner
            .run_until(&registry, &mut report, std::future::pending::<()>())
            .await;
        assert!(matches!(outcome, RunOutcome::Completed));
        assert!(!report.interrupted);

        let mut registry = StepRegistry::new();
        registry
            .register(Step::new("broken", Stage::Prepare, Action::Run(vec![CommandSpec::new("false")])).fatal())
            .unwrap();
        let mut report = RunReport::new();
        let outcome = step_runner
            .run_until(&registry, &mut report, std::future::pending::<()>())
            .await;
        assert!(matches!(outcome, RunOutcome::Aborted(ProvisionError::StepAction { .. })));
        assert_eq!(report.aborted_by.as_deref(), Some("broken"));
    }
}

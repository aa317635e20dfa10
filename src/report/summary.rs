//! End-of-run summary table.

use colored::*;
use std::fmt::Write;

use super::result::{RunReport, StepStatus};

fn paint(status: StepStatus) -> ColoredString {
    let label = format!("{:<9}", status.as_str());
    match status {
        StepStatus::Skipped => label.dimmed(),
        StepStatus::Succeeded => label.green(),
        StepStatus::Failed => label.red().bold(),
        StepStatus::Planned => label.cyan(),
    }
}

/// Render the status of every step, the steps that did not succeed and the
/// follow-up notes of steps that ran
pub fn render(report: &RunReport) -> String {
    let mut out = String::new();
    let width = report.results.iter().map(|r| r.name.len()).max().unwrap_or(4).max(4);

    let _ = writeln!(out, "{}", "Summary".bold());
    for r in &report.results {
        let _ = writeln!(
            out,
            "  {}  {:<width$}  {:<14}  {:>6.1}s",
            paint(r.status),
            r.name,
            r.stage.as_str(),
            r.elapsed.as_secs_f64(),
            width = width
        );
    }

    let _ = writeln!(
        out,
        "\n  {} succeeded, {} skipped, {} failed{}",
        report.count(StepStatus::Succeeded),
        report.count(StepStatus::Skipped),
        report.count(StepStatus::Failed),
        match report.count(StepStatus::Planned) {
            0 => String::new(),
            n => format!(", {} planned", n),
        }
    );

    let failed: Vec<_> = report.failed().collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "\n{}", "Did not succeed".red().bold());
        for r in failed {
            let _ = writeln!(out, "  {}: {}", r.name, r.message.as_deref().unwrap_or("unknown error"));
        }
    }

    if let Some(step) = &report.aborted_by {
        let _ = writeln!(out, "\n{} aborted by fatal step '{}'", "Run".red().bold(), step);
    }
    if report.interrupted {
        let _ = writeln!(out, "\n{}", "Run interrupted; remaining steps were not attempted".yellow());
    }

    let follow_ups = report.follow_ups();
    if !follow_ups.is_empty() {
        let _ = writeln!(out, "\n{}", "Follow-up".yellow().bold());
        for (name, note) in follow_ups {
            let _ = writeln!(out, "  - {} ({})", note, name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::StepResult;
    use crate::step::Stage;
    use std::time::Duration;

    #[test]
    fn test_render_lists_failures_and_follow_ups() {
        colored::control::set_override(false);
        let mut report = RunReport::new();
        report.push(StepResult::new("apt-update", Stage::Base, StepStatus::Succeeded, Duration::from_secs(2)));
        report.push(
            StepResult::new("bat", Stage::Releases, StepStatus::Failed, Duration::ZERO)
                .with_message("Ambiguous asset in sharkdp/bat"),
        );
        report.push(
            StepResult::new("liquorix", Stage::Kernel, StepStatus::Succeeded, Duration::ZERO)
                .with_follow_up(Some("Reboot".into())),
        );

        let text = render(&report);
        assert!(text.contains("succeeded  apt-update"));
        assert!(text.contains("2 succeeded, 0 skipped, 1 failed"));
        assert!(text.contains("Did not succeed"));
        assert!(text.contains("bat: Ambiguous asset in sharkdp/bat"));
        assert!(text.contains("- Reboot (liquorix)"));
        assert!(!text.contains("aborted"));
    }

    #[test]
    fn test_render_aborted_and_planned() {
        colored::control::set_override(false);
        let mut report = RunReport::new();
        report.push(StepResult::new("dirs", Stage::Prepare, StepStatus::Planned, Duration::ZERO));
        report.aborted_by = Some("dirs".into());

        let text = render(&report);
        assert!(text.contains(", 1 planned"));
        assert!(text.contains("aborted by fatal step 'dirs'"));
        assert!(!text.contains("Follow-up"));
    }
}

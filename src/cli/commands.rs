//! CLI definition using clap.
//!
//! provisr has a single command; flags choose the config file, the stages that
//! take part, and whether actions actually run.

use clap::Parser;
use std::path::PathBuf;

use provisr::{Stage, StageSelection};

/// Provisr - idempotent provisioning for Debian/Ubuntu desktops
#[derive(Parser, Debug)]
#[command(name = "provisr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Evaluate predicates and print what would run, without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Also set up QEMU/KVM and libvirt
    #[arg(long)]
    pub with_virtualization: bool,

    /// Leave the kernel stage out
    #[arg(long)]
    pub skip_kernel: bool,

    /// Leave a stage out (repeatable)
    #[arg(long = "skip-stage", value_name = "STAGE")]
    pub skip_stage: Vec<Stage>,

    /// Print the registered steps and exit
    #[arg(short, long)]
    pub list: bool,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Layer the stage flags over the configured selection
    pub fn stage_selection(&self, configured: StageSelection) -> StageSelection {
        configured
            .with_virtualization(self.with_virtualization)
            .skip_kernel(self.skip_kernel)
            .skip(&self.skip_stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::try_parse_from(["provisr"]).unwrap();
        assert!(!cli.verbose);
        assert!(!cli.dry_run);
        assert!(!cli.list);
        assert!(cli.config.is_none());
        assert!(cli.skip_stage.is_empty());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["provisr", "-v"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["provisr", "-c", "/path/to/provisr.yml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/provisr.yml")));
    }

    #[test]
    fn test_dry_run_and_list() {
        let cli = Cli::try_parse_from(["provisr", "--dry-run", "--list"]).unwrap();
        assert!(cli.dry_run);
        assert!(cli.list);
        let cli = Cli::try_parse_from(["provisr", "-n"]).unwrap();
        assert!(cli.dry_run);
    }

    #[test]
    fn test_skip_stage_repeatable() {
        let cli = Cli::try_parse_from([
            "provisr",
            "--skip-stage",
            "desktop",
            "--skip-stage",
            "releases",
        ])
        .unwrap();
        assert_eq!(cli.skip_stage, vec![Stage::Desktop, Stage::Releases]);
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let result = Cli::try_parse_from(["provisr", "--skip-stage", "games"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_stage_selection_from_flags() {
        let cli = Cli::try_parse_from([
            "provisr",
            "--with-virtualization",
            "--skip-kernel",
            "--skip-stage",
            "dotfiles",
        ])
        .unwrap();
        let selection = cli.stage_selection(StageSelection::default());
        assert!(selection.includes(Stage::Virtualization));
        assert!(!selection.includes(Stage::Kernel));
        assert!(!selection.includes(Stage::Dotfiles));
        assert!(selection.includes(Stage::Base));
    }

    #[test]
    fn test_help_works() {
        // Verify help doesn't panic
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version_flag() {
        let result = Cli::try_parse_from(["provisr", "--version"]);
        // Version flag causes early exit with error (expected)
        assert!(result.is_err());
    }
}

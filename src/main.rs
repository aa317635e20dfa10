use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use cli::Cli;
use provisr::exec::{CommandRunner, Redactor, SystemRunner};
use provisr::system::{HostCheck, REQUIRED_COMMANDS, acquire_sudo};
use provisr::workspace::{RunLock, ScratchSpace};
use provisr::{
    Config, RunLog, RunOutcome, RunReport, StageSelection, StepRegistry, StepRunner, StopSignals, Toolbox,
};

const EXIT_OK: i32 = 0;
const EXIT_FATAL_STEP: i32 = 1;
const EXIT_SETUP: i32 = 2;

fn setup_logging(default_level: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("provisr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("provisr.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn print_plan(registry: &StepRegistry) {
    for (index, step) in registry.steps().iter().enumerate() {
        println!(
            "{:>3}. {} {} {}",
            index + 1,
            step.name.bold(),
            format!("[{}]", step.stage).dimmed(),
            step.description
        );
        if let Some(predicate) = &step.predicate {
            println!("       {} {}", "skip when".dimmed(), predicate);
        }
        for line in step.action.describe() {
            println!("       {} {}", "run".dimmed(), line);
        }
    }
}

async fn provision(cli: &Cli, config: &Config, registry: StepRegistry) -> Result<i32> {
    let probe = SystemRunner::new(false);
    let host = HostCheck::inspect(&probe, REQUIRED_COMMANDS)
        .await
        .context("Failed to inspect host")?;
    host.ensure()?;
    if host.needs_sudo() && !cli.dry_run {
        println!("{}", "Root privileges are needed for package changes".yellow());
        acquire_sudo().await?;
    }

    let token = std::env::var(&config.network.github_token_env)
        .ok()
        .filter(|t| !t.trim().is_empty());
    let log = Arc::new(RunLog::new(
        config.paths.log_path(),
        Redactor::new(token.iter().cloned()),
    ));
    let scratch = Arc::new(ScratchSpace::new(&config.paths.downloads));
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(host.needs_sudo()));
    let tools = Arc::new(Toolbox::new(runner, &config.network, token, scratch)?);
    let step_runner = StepRunner::new(tools, log).dry_run(cli.dry_run);

    let _lock = RunLock::for_run(config.paths.lock_path(), cli.dry_run)?;

    let mut signals = StopSignals::install().context("Failed to install signal handlers")?;
    let mut report = RunReport::new();
    let code = match step_runner.run_until(&registry, &mut report, signals.recv()).await {
        RunOutcome::Completed => EXIT_OK,
        RunOutcome::Aborted(e) => {
            info!("Run aborted: {}", e);
            EXIT_FATAL_STEP
        }
        RunOutcome::Stopped(signal) => {
            info!("Run stopped by {}", signal);
            signal.exit_code()
        }
    };

    println!("\n{}", provisr::report::render(&report));
    if report.count(provisr::StepStatus::Failed) > 0 {
        println!("Failures were logged to {}", config.paths.log_path().display());
    }
    Ok(code)
}

fn run_application() -> Result<i32> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration; it picks the log level
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(config.log_filter(cli.is_verbose())).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled: debug logging on".yellow());
    }

    let selection = cli.stage_selection(StageSelection::from_config(&config.stages));
    let registry = provisr::build(&config, &selection).context("Failed to build the step list")?;

    if cli.list {
        print_plan(&registry);
        return Ok(EXIT_OK);
    }

    if cli.dry_run {
        println!("{}", "Dry run: nothing will be changed".cyan());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(provision(&cli, &config, registry))
}

fn main() {
    let code = match run_application() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            EXIT_SETUP
        }
    };
    std::process::exit(code);
}

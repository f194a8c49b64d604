use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use snapvault::adapters::{self, ProcMountTable};
use snapvault::config::{self, Settings};
use snapvault::core::{
    BackupExecutor, JobCategory, JobDescriptor, JobPlanner, Restic, RetentionRunner,
};
use snapvault::error::ConfigError;
use snapvault::logging::{self, LogConfig};
use snapvault::report::{BackupReport, PlanReport, PruneReport};
use tracing::info;

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "snapvault")]
#[command(about = "Crash-consistent restic backups of paths and LVM snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug-level logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Print backup commands instead of running them; prune asks restic for a dry run
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up every selected job to all of its repositories
    Backup(RunArgs),
    /// Apply retention policies to every selected job's repositories
    Prune(RunArgs),
    /// Show resolved jobs in execution order
    Plan(PlanArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Settings overrides, layered over defaults and `SNAPVAULT_*`.
#[derive(Args, Serialize)]
struct SettingsArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    restic_binary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    mount_base: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    ssh_auth_sock: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    default_size_unit: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    /// Job configuration file
    #[arg(long, short)]
    config: PathBuf,

    /// Only jobs of this category
    #[arg(long)]
    category: Option<JobCategory>,

    /// Only jobs with this name
    #[arg(long)]
    name: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    format: Format,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Args)]
struct PlanArgs {
    #[arg(long, short)]
    config: PathBuf,

    #[command(flatten)]
    settings: SettingsArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(LogConfig {
        json: cli.log_json,
        verbose: cli.verbose,
    });

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if e.chain().any(|cause| cause.is::<ConfigError>()) {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Backup(args) => run_backup(cli, args).context("Backup run failed"),
        Commands::Prune(args) => run_prune(cli, args).context("Prune run failed"),
        Commands::Plan(args) => run_plan(args),
    }
}

/// Settings plus every resolved job, before anything privileged runs.
fn load_jobs(path: &Path, overrides: &SettingsArgs) -> Result<(Settings, Vec<JobDescriptor>)> {
    let settings = Settings::new(Some(overrides)).context("Failed to load settings")?;
    let raw = config::load(path)
        .with_context(|| format!("Failed to load job file {}", path.display()))?;
    let jobs = JobPlanner::new(settings.default_size_unit.as_str())
        .resolve(&raw)
        .with_context(|| format!("Invalid job file {}", path.display()))?;
    Ok((settings, jobs))
}

fn ensure_selection(jobs: &[JobDescriptor], args: &RunArgs) -> Result<()> {
    if !jobs
        .iter()
        .any(|j| j.matches(args.category, args.name.as_deref()))
    {
        bail!("No job matches the given filters");
    }
    Ok(())
}

fn require_root(dry_run: bool) -> Result<()> {
    if !dry_run && !nix::unistd::Uid::effective().is_root() {
        bail!("snapshots and remounts need root; run as root or pass --dry-run");
    }
    Ok(())
}

fn exit_status(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURE)
    }
}

fn run_backup(cli: &Cli, args: &RunArgs) -> Result<ExitCode> {
    let (settings, jobs) = load_jobs(&args.config, &args.settings)?;
    ensure_selection(&jobs, args)?;
    require_root(cli.dry_run)?;

    let runner = adapters::get_runner(cli.dry_run, settings.ssh_auth_sock.clone());
    let mounts = ProcMountTable::default();
    let mut executor = BackupExecutor::new(
        runner.as_ref(),
        &mounts,
        Restic::new(settings.restic_binary.as_str()),
        settings.mount_base.clone(),
    );

    info!(dry_run = cli.dry_run, "Starting backup run");
    let summaries: Vec<_> = jobs
        .iter()
        .filter(|j| j.matches(args.category, args.name.as_deref()))
        .map(|job| executor.run(job))
        .collect();

    let report = BackupReport::new(&summaries);
    match args.format {
        Format::Text => println!("{}", report),
        Format::Json => println!("{}", report.to_json().context("Failed to encode report")?),
    }

    Ok(exit_status(report.is_success()))
}

fn run_prune(cli: &Cli, args: &RunArgs) -> Result<ExitCode> {
    let (settings, jobs) = load_jobs(&args.config, &args.settings)?;
    ensure_selection(&jobs, args)?;
    require_root(cli.dry_run)?;

    let runner = adapters::get_prune_runner(settings.ssh_auth_sock.clone());
    let retention = RetentionRunner::new(
        runner.as_ref(),
        Restic::new(settings.restic_binary.as_str()),
        cli.dry_run,
    );

    info!(dry_run = cli.dry_run, "Starting prune run");
    let result = retention.run(&jobs, args.category, args.name.as_deref());

    let report = PruneReport::new(&result);
    match args.format {
        Format::Text => println!("{}", report),
        Format::Json => println!("{}", report.to_json().context("Failed to encode report")?),
    }

    Ok(exit_status(result.is_success()))
}

fn run_plan(args: &PlanArgs) -> Result<ExitCode> {
    let (_, jobs) = load_jobs(&args.config, &args.settings)?;
    println!("{}", PlanReport::new(&jobs));
    Ok(ExitCode::SUCCESS)
}

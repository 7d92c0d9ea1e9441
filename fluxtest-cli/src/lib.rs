#![warn(missing_docs)]
//! FluxTest CLI Library
//!
//! Drives one compiled test artifact across a pool of worker processes and
//! reports the result. The pipeline for one run is:
//!
//! build artifact → supervisor (spawn, partition, collect) → aggregator →
//! reporter → exit status
//!
//! In watch mode the same pipeline is rerun on file changes, one run at a
//! time.

mod aggregator;
mod build;
mod config;
mod planner;
mod progress;
mod supervisor;
mod watch;

pub use aggregator::{Aggregator, fold, to_event};
pub use build::{BuildError, BuildOrchestrator, CommandBuild, PrebuiltArtifact};
pub use config::*;
pub use planner::{ExecutionPlan, build_plan, derive_seed, effective_seed, partition};
pub use progress::ConsoleProgress;
pub use supervisor::*;
pub use watch::{
    ChangeEvent, ChangeKind, ChangeSource, SchedulerState, WatchScheduler, drive, watch_paths,
};

use clap::{Parser, Subcommand};
use fluxtest_report::{ReportFormat, RunReport, RunSummary};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// FluxTest CLI arguments
#[derive(Parser, Debug)]
#[command(name = "fluxtest")]
#[command(author, version, about = "FluxTest - parallel test runner")]
pub struct Cli {
    /// Optional subcommand; defaults to Run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Only run tests whose id matches this regex
    pub filter: Option<String>,

    /// Path to the compiled test artifact
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Shell command that builds the artifact before each run
    #[arg(long)]
    pub build: Option<String>,

    /// Report format: console, json, or junit
    #[arg(long)]
    pub report: Option<ReportFormat>,

    /// Base seed for randomized tests (random when omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Iterations for randomized tests
    #[arg(long)]
    pub fuzz: Option<u32>,

    /// Number of worker processes (defaults to logical cores)
    #[arg(long, short = 'j')]
    pub workers: Option<usize>,

    /// How long a worker may take to connect (e.g. "10s")
    #[arg(long)]
    pub connect_timeout: Option<String>,

    /// Upper bound on a whole run (e.g. "10m"); unbounded when omitted
    #[arg(long)]
    pub run_timeout: Option<String>,

    /// Rerun whenever watched files change
    #[arg(long)]
    pub watch: bool,

    /// Configuration file (defaults to the nearest fluxtest.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run tests (default)
    Run,
    /// Build the artifact without running it; exits 1 if the build fails
    Build,
    /// Write a default fluxtest.toml into the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the FluxTest CLI with the process arguments.
pub fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the FluxTest CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    init_logging(cli.verbose);

    if let Some(Commands::Init { force }) = cli.command {
        return init_config(force);
    }

    let config = match &cli.config {
        Some(path) => FluxTestConfig::load(path)?,
        None => FluxTestConfig::discover().unwrap_or_default(),
    };
    let settings = Settings::resolve(&cli, &config)?;

    if let Some(Commands::Build) = cli.command {
        return Ok(ExitCode::from(build_only(&settings)));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    if settings.watch {
        runtime.block_on(watch_loop(&settings))?;
        Ok(ExitCode::SUCCESS)
    } else {
        let code = runtime.block_on(run_once(&settings));
        Ok(ExitCode::from(code))
    }
}

/// Logs always go to stderr; stdout belongs to the report
fn init_logging(verbose: bool) {
    let default = if verbose {
        "fluxtest=debug"
    } else {
        "fluxtest=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn init_config(force: bool) -> anyhow::Result<ExitCode> {
    let path = PathBuf::from(CONFIG_FILE);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(&path, FluxTestConfig::default_toml())?;
    eprintln!("Wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}

/// Effective settings: fluxtest.toml values with CLI flags on top
pub struct Settings {
    /// Report format for every run
    pub format: ReportFormat,
    /// Worker pool size
    pub workers: usize,
    /// Explicit base seed, if any
    pub seed: Option<u64>,
    /// Iterations for randomized tests
    pub fuzz: u32,
    /// Test id filter
    pub filter: Option<Regex>,
    /// Worker connect grace period
    pub connect_timeout: Duration,
    /// Optional bound on a whole run
    pub run_timeout: Option<Duration>,
    /// Extra worker environment
    pub env: BTreeMap<String, String>,
    /// Watch mode
    pub watch: bool,
    /// Paths that trigger a rerun
    pub watch_paths: Vec<PathBuf>,
    /// Change stability window
    pub debounce: Duration,
    /// Produces the artifact for each run
    pub build: Arc<dyn BuildOrchestrator>,
}

impl Settings {
    /// Layer CLI flags over the configuration file
    pub fn resolve(cli: &Cli, config: &FluxTestConfig) -> anyhow::Result<Self> {
        let filter = cli
            .filter
            .as_deref()
            .or(config.runner.filter.as_deref())
            .map(Regex::new)
            .transpose()
            .map_err(|e| anyhow::anyhow!("Invalid filter: {e}"))?;

        let connect_timeout = FluxTestConfig::parse_duration(
            cli.connect_timeout
                .as_deref()
                .unwrap_or(&config.runner.connect_timeout),
        )?;
        let run_timeout = cli
            .run_timeout
            .as_deref()
            .or(config.runner.run_timeout.as_deref())
            .map(FluxTestConfig::parse_duration)
            .transpose()?;

        let artifact = cli.artifact.clone().or(config.build.artifact.clone());
        let command = cli.build.clone().or(config.build.command.clone());
        let build: Arc<dyn BuildOrchestrator> = match (command, artifact) {
            (Some(command), Some(artifact)) => Arc::new(CommandBuild::new(command, artifact)),
            (None, Some(artifact)) => Arc::new(PrebuiltArtifact::new(artifact)),
            (_, None) => return Err(BuildError::NoArtifact.into()),
        };

        Ok(Self {
            format: cli.report.unwrap_or(config.output.report),
            workers: cli
                .workers
                .or(config.runner.workers)
                .unwrap_or_else(default_worker_count)
                .max(1),
            seed: cli.seed.or(config.runner.seed),
            fuzz: cli.fuzz.unwrap_or(config.runner.fuzz),
            filter,
            connect_timeout,
            run_timeout,
            env: config.runner.env.clone(),
            watch: cli.watch,
            watch_paths: config.watch.paths.clone(),
            debounce: FluxTestConfig::parse_duration(&config.watch.debounce)?,
            build,
        })
    }
}

/// Build, run and report once with the given base seed. Never fails:
/// anything that stops the run is folded into the report as a runner error.
pub async fn execute(supervisor: &mut Supervisor, settings: &Settings, seed: u64) -> RunReport {
    let aborted = |error: String| {
        tracing::error!("{error}");
        RunReport::new(RunSummary::aborted(seed, settings.fuzz, error), Vec::new())
    };

    // Build commands block; keep the runtime free to notice Ctrl-C
    let build = Arc::clone(&settings.build);
    let machine_readable = settings.format.is_machine_readable();
    let building = tokio::task::spawn_blocking(move || build.build(machine_readable));
    let artifact = match building.await {
        Ok(Ok(artifact)) => artifact,
        Ok(Err(e)) => return aborted(SupervisorError::from(e).to_string()),
        Err(e) => return aborted(format!("build task failed: {e}")),
    };

    let request = RunRequest {
        artifact,
        worker_count: settings.workers,
        base_seed: Some(seed),
        fuzz_iterations: settings.fuzz,
        report_format: settings.format,
        watch: settings.watch,
        filter: settings.filter.clone(),
        connect_timeout: settings.connect_timeout,
        run_timeout: settings.run_timeout,
        env: settings.env.clone(),
    };

    let result = if settings.format == ReportFormat::Console {
        let mut progress = ConsoleProgress::new();
        let result = supervisor.run(&request, &mut progress).await;
        progress.finish();
        result
    } else {
        supervisor.run(&request, &mut Silent).await
    };

    result.unwrap_or_else(|e| aborted(e.to_string()))
}

/// Build the artifact only. Returns the process exit code.
fn build_only(settings: &Settings) -> u8 {
    match settings.build.build(settings.format.is_machine_readable()) {
        Ok(artifact) => {
            tracing::info!(artifact = %artifact.display(), "artifact ready");
            0
        }
        Err(e) => {
            tracing::error!("build failed: {e}");
            1
        }
    }
}

/// Write the single final document (or summary) to stdout
fn emit(format: ReportFormat, report: &RunReport) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(format.render(report).as_bytes());
    let _ = stdout.flush();
}

async fn run_once(settings: &Settings) -> u8 {
    let mut supervisor = Supervisor::new();
    let seed = effective_seed(settings.seed);
    let report = tokio::select! {
        report = execute(&mut supervisor, settings, seed) => report,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; stopping workers");
            RunReport::new(
                RunSummary::aborted(seed, settings.fuzz, "run interrupted"),
                Vec::new(),
            )
        }
    };

    emit(settings.format, &report);
    report.summary.exit_code()
}

async fn watch_loop(settings: &Settings) -> anyhow::Result<()> {
    let (_source, changes) = watch_paths(&settings.watch_paths, settings.debounce)?;
    tracing::info!("Running in watch mode");

    tokio::select! {
        runs = watch_runs(settings, changes) => {
            tracing::info!(runs, "change stream closed; leaving watch mode");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; leaving watch mode");
        }
    }
    Ok(())
}

/// Rerun the pipeline for every change until the stream closes; one
/// supervisor serves every cycle.
async fn watch_runs(
    settings: &Settings,
    changes: tokio::sync::mpsc::Receiver<ChangeEvent>,
) -> usize {
    let supervisor = tokio::sync::Mutex::new(Supervisor::new());
    let supervisor = &supervisor;
    let cycle = || async move {
        let mut supervisor = supervisor.lock().await;
        let report = execute(&mut supervisor, settings, effective_seed(settings.seed)).await;
        emit(settings.format, &report);
    };
    drive(changes, cycle).await
}

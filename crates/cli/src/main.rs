//! Retrieval Grid - orchestrates retrieval experiments over a parameter grid
//!
//! Composition root: wires the SQLite ledger and the subprocess adapters into
//! the core planner, pool and summary services.

mod settings;
mod telemetry;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::{info, warn};

use retrieval_core::application::significance::MAX_SIGMA;
use retrieval_core::application::{
    shutdown_channel, summarize, write_summary, DataSynthesizer, ExperimentSummary,
    PlannerService, RecoveryService, RetrievalPool, RetryPolicy, RunReport,
};
use retrieval_core::domain::{ExperimentSpec, GridPoint, JobState, RetrievalJob};
use retrieval_core::port::id_provider::UuidProvider;
use retrieval_core::port::time_provider::SystemTimeProvider;
use retrieval_core::port::{JobRepository, TaskExecutor, TimeProvider};
use retrieval_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};
use retrieval_infra_system::{
    ExternalClimateModel, ExternalSpectrumModel, JsonCommand, SubprocessExecutor,
};
use settings::{load_experiment, CommandSettings, Settings};

#[derive(Parser)]
#[command(name = "retrieval-grid")]
#[command(about = "Run nested-sampling retrieval experiments over a parameter grid", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: ./retrieval.toml when present)
    #[arg(long, global = true, env = "RETRIEVAL_SETTINGS")]
    settings: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, env = "RETRIEVAL_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize observations and run both retrievals for every grid point
    Run {
        /// Experiment TOML file
        experiment: PathBuf,

        /// Keep finished points and reuse existing observations
        #[arg(long)]
        resume: bool,

        /// Process slots, the orchestrator included
        #[arg(long)]
        max_processes: Option<usize>,

        /// Seconds between pool polls
        #[arg(long)]
        poll_interval: Option<f64>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the expanded grid without running anything
    Grid {
        /// Experiment TOML file
        experiment: PathBuf,
    },

    /// Convert evidences into detection significances
    Summarize {
        /// Experiment TOML file
        experiment: PathBuf,

        /// Summary path (default: <save_dir>/<name>_summary.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Leave the fake observations out of the summary
        #[arg(long)]
        no_data: bool,
    },

    /// Show job counts from the ledger
    Status {
        /// Experiment name (default: every experiment)
        experiment: Option<String>,
    },
}

#[derive(Tabled)]
struct ReportRow {
    total: usize,
    done: usize,
    failed: usize,
    cancelled: usize,
    data_failures: usize,
    minutes: String,
}

#[derive(Tabled)]
struct GridRow {
    index: usize,
    stem: String,
    snr: String,
    surface_temperature: String,
    distance_au: String,
}

#[derive(Tabled)]
struct SummaryRow {
    stem: String,
    ln_bayes: String,
    sigma: String,
}

#[derive(Tabled)]
struct StatusRow {
    experiment: String,
    queued: i64,
    running: i64,
    done: i64,
    failed: i64,
    cancelled: i64,
}

#[derive(Tabled)]
struct FailedJobRow {
    stem: String,
    hypothesis: String,
    attempts: i32,
    error: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = telemetry::init_logging(cli.log_file.as_deref())?;
    let settings = Settings::load(cli.settings.as_deref())?;

    match cli.command {
        Commands::Run {
            experiment,
            resume,
            max_processes,
            poll_interval,
            json,
        } => {
            run_experiment(&settings, &experiment, resume, max_processes, poll_interval, json).await
        }
        Commands::Grid { experiment } => print_grid(&experiment),
        Commands::Summarize {
            experiment,
            output,
            no_data,
        } => summarize_experiment(&experiment, output, !no_data).await,
        Commands::Status { experiment } => print_status(&settings, experiment.as_deref()).await,
    }
}

async fn open_ledger(settings: &Settings) -> Result<Arc<dyn JobRepository>> {
    let db_path = settings.db_path();
    info!(db_path = %db_path, "Opening job ledger");
    let pool = create_pool(&db_path)
        .await
        .with_context(|| format!("Failed to open ledger {}", db_path))?;
    run_migrations(&pool).await.context("Migration failed")?;
    Ok(Arc::new(SqliteJobRepository::new(pool)))
}

fn json_command(argv: &[String], commands: &CommandSettings) -> Result<JsonCommand> {
    let mut command =
        JsonCommand::new(argv.to_vec())?.with_env_allowlist(commands.env_allowlist.clone());
    if let Some(dir) = &commands.working_dir {
        command = command.with_working_dir(dir);
    }
    Ok(command)
}

async fn run_experiment(
    settings: &Settings,
    path: &Path,
    resume: bool,
    max_processes: Option<usize>,
    poll_interval: Option<f64>,
    json: bool,
) -> Result<()> {
    let spec = load_experiment(path)?;
    info!(
        version = retrieval_core::VERSION,
        experiment = %spec.name,
        resume,
        "Starting retrieval grid"
    );
    let mut pool_config = settings.pool_config();
    if let Some(max_processes) = max_processes {
        pool_config.max_processes = max_processes;
    }
    if let Some(secs) = poll_interval {
        if !(secs.is_finite() && secs > 0.0) {
            bail!("--poll-interval must be positive");
        }
        pool_config.poll_interval = Duration::from_secs_f64(secs);
    }

    // 1. Wire adapters
    let commands = &settings.commands;
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let mut executor = SubprocessExecutor::new(
        commands.retrieval()?.to_vec(),
        time_provider.clone(),
        commands.env_allowlist.clone(),
    )?;
    if let Some(dir) = &commands.working_dir {
        executor = executor.with_working_dir(dir);
    }
    let executor: Arc<dyn TaskExecutor> = Arc::new(executor);
    let synthesizer = Arc::new(DataSynthesizer::new(
        Arc::new(ExternalClimateModel::new(json_command(commands.climate()?, commands)?)),
        Arc::new(ExternalSpectrumModel::new(json_command(commands.spectrum()?, commands)?)),
    ));

    let ledger = open_ledger(settings).await?;
    let retry_policy = Arc::new(RetryPolicy::new(
        time_provider.clone(),
        settings.pool.retry_base_delay_ms,
    ));
    let pool = RetrievalPool::new(
        ledger.clone(),
        executor.clone(),
        synthesizer,
        retry_policy,
        time_provider.clone(),
        pool_config,
    )?;

    // 2. Crash recovery for this experiment
    let recovered = RecoveryService::new(ledger.clone(), executor, time_provider.clone())
        .recover_orphaned_jobs(&spec.name)
        .await?;
    if recovered > 0 {
        warn!(recovered, "Previous run left retrievals behind; they were marked FAILED");
    }

    // 3. Plan
    let plan = PlannerService::new(ledger, Arc::new(UuidProvider), time_provider)
        .plan(&spec, &settings.plan_options(resume))
        .await?;
    if plan.points.is_empty() {
        println!(
            "{}",
            format!("✓ Nothing to do: all {} points already finished", plan.skipped)
                .green()
                .bold()
        );
        return Ok(());
    }

    // 4. Run until done or interrupted
    let (shutdown_tx, shutdown_token) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping retrievals");
            shutdown_tx.shutdown();
        }
    });

    let report = pool.run(&spec, plan, shutdown_token).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&spec, &report);
    }
    if report.interrupted {
        bail!("run of {} was interrupted", spec.name);
    }
    Ok(())
}

fn print_report(spec: &ExperimentSpec, report: &RunReport) {
    let headline = format!("Run of {} finished", spec.name);
    if report.failed == 0 && report.data_failures.is_empty() && !report.interrupted {
        println!("{}", format!("✓ {}", headline).green().bold());
    } else {
        println!("{}", format!("! {}", headline).yellow().bold());
    }
    println!();

    let row = ReportRow {
        total: report.total_jobs,
        done: report.done,
        failed: report.failed,
        cancelled: report.cancelled,
        data_failures: report.data_failures.len(),
        minutes: format!("{:.2}", report.elapsed_secs / 60.0),
    };
    println!("{}", Table::new(vec![row]));

    for failure in &report.data_failures {
        println!(
            "  {} {}: {}",
            "✗".red(),
            failure.file_stem.bold(),
            failure.error
        );
    }
}

fn print_grid(path: &Path) -> Result<()> {
    let spec = load_experiment(path)?;
    let points = GridPoint::expand(&spec)?;

    println!(
        "{}",
        format!("{}: {} points, {} retrievals", spec.name, points.len(), points.len() * 2)
            .cyan()
            .bold()
    );
    println!();

    let rows: Vec<GridRow> = points
        .iter()
        .map(|p| GridRow {
            index: p.index,
            stem: p.file_stem(),
            snr: format!("{:.2}", p.snr),
            surface_temperature: format!("{:.2}", p.surface_temperature),
            distance_au: format!("{:.3}", p.distance_au),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn format_sigma(sigma: f64) -> String {
    if sigma >= MAX_SIGMA {
        format!(">= {:.0}", MAX_SIGMA)
    } else {
        format!("{:.2}", sigma)
    }
}

async fn summarize_experiment(
    path: &Path,
    output: Option<PathBuf>,
    include_observation: bool,
) -> Result<()> {
    let spec = load_experiment(path)?;
    let summary = summarize(&spec, include_observation).await?;
    let output = output.unwrap_or_else(|| ExperimentSummary::default_path(&spec));
    write_summary(&summary, &output).await?;

    println!(
        "{}",
        format!(
            "Detection of {} in {} ({} points)",
            summary.tested_gas,
            summary.experiment,
            summary.entries.len()
        )
        .cyan()
        .bold()
    );
    println!();

    let rows: Vec<SummaryRow> = summary
        .entries
        .iter()
        .map(|e| SummaryRow {
            stem: e.file_stem.clone(),
            ln_bayes: format!("{:.3}", e.ln_bayes),
            sigma: format_sigma(e.sigma),
        })
        .collect();
    println!("{}", Table::new(rows));

    if !summary.skipped.is_empty() {
        println!(
            "{}",
            format!("{} points skipped (missing or unreadable files)", summary.skipped.len())
                .yellow()
        );
    }
    println!("{} {}", "Summary:".bold(), output.display());
    Ok(())
}

async fn status_row(ledger: &dyn JobRepository, experiment: &str) -> Result<StatusRow> {
    Ok(StatusRow {
        experiment: experiment.to_string(),
        queued: ledger.count_by_state(experiment, JobState::Queued).await?,
        running: ledger.count_by_state(experiment, JobState::Running).await?,
        done: ledger.count_by_state(experiment, JobState::Done).await?,
        failed: ledger.count_by_state(experiment, JobState::Failed).await?,
        cancelled: ledger.count_by_state(experiment, JobState::Cancelled).await?,
    })
}

async fn print_status(settings: &Settings, experiment: Option<&str>) -> Result<()> {
    let ledger = open_ledger(settings).await?;
    let experiments = match experiment {
        Some(name) => vec![name.to_string()],
        None => ledger.list_experiments().await?,
    };

    if experiments.is_empty() {
        println!("{}", "No experiments in the ledger".yellow());
        return Ok(());
    }

    let mut rows = Vec::with_capacity(experiments.len());
    for name in &experiments {
        rows.push(status_row(ledger.as_ref(), name).await?);
    }
    println!("{}", "Ledger Status".cyan().bold());
    println!();
    println!("{}", Table::new(rows));

    if let Some(name) = experiment {
        let failed: Vec<RetrievalJob> = ledger.find_by_state(name, JobState::Failed).await?;
        if !failed.is_empty() {
            println!();
            println!("{}", "Failed retrievals".red().bold());
            let rows: Vec<FailedJobRow> = failed
                .into_iter()
                .map(|job| FailedJobRow {
                    hypothesis: job.hypothesis.suffix(&job.tested_gas),
                    stem: job.file_stem,
                    attempts: job.attempts,
                    error: job.last_error.unwrap_or_default(),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }
    Ok(())
}

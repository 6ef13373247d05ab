//! trim-worker: drives the background scheduler with simulated trim jobs.
//!
//! Submits `--jobs` trim jobs sharing one serial key, so they run strictly
//! one after another. Each job reports progress tagged with its serial key
//! and stops early when interrupted. With `--cancel-id`, every job with that
//! id is cancelled right after submission. The final metrics snapshot is
//! printed as JSON on stdout.

use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use trimmer_scheduler::{
    Scheduler, SchedulerConfig, Task, TaskContext, TaskError, TaskHandle, TaskOutcome,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Background trim worker: serial job queue with cancellation.
#[derive(Parser, Debug)]
#[command(name = "trim-worker", version, about)]
struct Cli {
    /// Path to scheduler TOML config file.
    #[arg(long, env = "TRIM_CONFIG", default_value = "config/scheduler.toml")]
    config: String,

    /// Number of trim jobs to submit.
    #[arg(long, default_value_t = 4)]
    jobs: usize,

    /// Serial key shared by all jobs.
    #[arg(long, default_value = "trim")]
    serial: String,

    /// Simulated work per progress step, in milliseconds.
    #[arg(long, default_value_t = 20)]
    step_ms: u64,

    /// Progress steps per job.
    #[arg(long, default_value_t = 5)]
    steps: u32,

    /// Delay before the first job starts, in milliseconds.
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Cancel all jobs with this id after submission (ids are `job-<n>`).
    #[arg(long)]
    cancel_id: Option<String>,

    /// Override the worker thread count.
    #[arg(long, env = "TRIM_WORKER_THREADS")]
    workers: Option<usize>,
}

// ── Simulated trim ──────────────────────────────────────────────────

fn simulated_trim(ctx: &TaskContext<'_>, steps: u32, step: Duration) -> Result<(), TaskError> {
    let serial = ctx.serial_key().unwrap_or("-");
    let started = Instant::now();
    for done in 1..=steps {
        ctx.check_interrupted()?;
        thread::sleep(step);
        info!(
            task = ctx.seq(),
            id = ctx.id().unwrap_or("-"),
            serial,
            progress = format!("{done}/{steps}"),
            "trimming"
        );
    }
    info!(
        task = ctx.seq(),
        serial,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "trim finished"
    );
    Ok(())
}

fn load_config(cli: &Cli) -> SchedulerConfig {
    let mut config = match SchedulerConfig::from_file(&cli.config) {
        Ok(mut cfg) => {
            info!(path = %cli.config, "loaded scheduler config");
            cfg.apply_env();
            cfg
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %cli.config,
                "failed to load config, using environment defaults"
            );
            SchedulerConfig::from_env()
        }
    };
    if let Some(workers) = cli.workers {
        config.worker_threads = workers;
    }
    config
}

// ── Main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    trimmer_scheduler::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli);
    let scheduler = Scheduler::from_config(&config)?;
    Scheduler::install_global(scheduler.clone())?;
    info!(
        workers = config.resolved_worker_threads(),
        jobs = cli.jobs,
        serial = %cli.serial,
        "trim-worker starting"
    );

    let step = Duration::from_millis(cli.step_ms);
    let steps = cli.steps;
    let mut handles: Vec<TaskHandle> = Vec::with_capacity(cli.jobs);
    for n in 0..cli.jobs {
        let mut task = Task::new(move |ctx| simulated_trim(ctx, steps, step))
            .id(format!("job-{n}"))
            .serial(cli.serial.as_str());
        if n == 0 && cli.delay_ms > 0 {
            task = task.delay_ms(cli.delay_ms);
        }
        handles.push(scheduler.submit(task)?);
    }

    if let Some(id) = &cli.cancel_id {
        let report = scheduler.cancel_all(id, true);
        info!(id = %id, ?report, "cancel requested");
    }

    let outcomes: Vec<TaskOutcome> = handles.iter().map(TaskHandle::wait).collect();
    let ran = outcomes.iter().filter(|o| **o == TaskOutcome::Ran).count();
    info!(ran, total = outcomes.len(), "all jobs finished");

    let metrics = scheduler.metrics();
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

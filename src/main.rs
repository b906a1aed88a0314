//! tasklane - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tasklane::util::{config, logger};
use tasklane::{demo, Scheduler, NAME, VERSION};
use tracing::info;

/// Walk through main-context affinity, fire-and-forget faults and cancellation
#[derive(Parser, Debug)]
#[command(name = "tasklane")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (debug logging)
    #[arg(short, long)]
    verbose: bool,

    /// Config file (defaults to ./tasklane.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Host tick interval in milliseconds
    #[arg(long, value_name = "MS")]
    frame_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show where a task resumes after each await, per lane
    Affinity {
        /// Number of awaits per task
        #[arg(short, long, default_value_t = 2)]
        awaits: usize,

        /// Length of each delay in milliseconds
        #[arg(long, default_value_t = 20)]
        step_ms: u64,
    },

    /// Fault a task under each forget strategy and report where the sink ran
    Forget,

    /// Cancel a task before it starts and while it waits
    Cancel,

    /// Run every walkthrough in order
    All,

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = config::load_config(args.config.as_deref()).context("Failed to load config")?;
    if let Some(workers) = args.workers {
        settings.scheduler.num_workers = workers;
    }
    if let Some(ms) = args.frame_ms {
        settings.scheduler.frame_interval = Duration::from_millis(ms);
    }
    if args.verbose {
        settings.log_level = logger::LogLevel::Debug;
    }
    logger::init_with_level(settings.log_level);

    if let Commands::Version = args.command {
        println!("{} {}", NAME, VERSION);
        return Ok(());
    }

    info!(
        "{} {} on {} with {} workers",
        NAME,
        VERSION,
        std::env::consts::OS,
        settings.scheduler.num_workers
    );
    let scheduler = Scheduler::with_config(settings.scheduler).context("Failed to start scheduler")?;

    match args.command {
        Commands::Affinity { awaits, step_ms } => {
            run_affinity(&scheduler, awaits, Duration::from_millis(step_ms))?
        }
        Commands::Forget => run_forget(&scheduler),
        Commands::Cancel => run_cancel(&scheduler),
        Commands::All => {
            run_affinity(&scheduler, 2, Duration::from_millis(20))?;
            run_forget(&scheduler);
            run_cancel(&scheduler);
        }
        Commands::Version => {}
    }

    // Let the host loop run a few frames so late log lines flush in order.
    scheduler.run_frames(scheduler.config().frame_interval * 2);
    let stats = scheduler.stats();
    info!(
        "done: scheduled={} completed={} faulted={} cancelled={} reported={} unobserved={} switches={} ticks={}",
        stats.scheduled,
        stats.completed,
        stats.faulted,
        stats.cancelled,
        stats.reported_faults,
        stats.unobserved_faults,
        stats.context_switches,
        stats.ticks
    );
    Ok(())
}

fn run_affinity(
    scheduler: &Scheduler,
    awaits: usize,
    step: Duration,
) -> Result<()> {
    let traces = demo::affinity(scheduler, awaits, step).context("Affinity walkthrough failed")?;
    for trace in traces {
        let contexts: Vec<String> = trace.samples.iter().map(|s| s.context.to_string()).collect();
        info!(
            "{}: {} (one thread: {})",
            trace.label,
            contexts.join(" -> "),
            trace.stayed_on_one_thread()
        );
    }
    Ok(())
}

fn run_forget(scheduler: &Scheduler) {
    let summary = demo::forget(scheduler);
    for run in &summary.runs {
        let places: Vec<String> = run.reports.iter().map(|(_, ctx)| ctx.to_string()).collect();
        info!(
            "{}: {:?}, {} report(s) on [{}]",
            run.label,
            run.state,
            run.reports.len(),
            places.join(", ")
        );
    }
    info!("dropped handle: {} unobserved fault(s)", summary.unobserved);
}

fn run_cancel(scheduler: &Scheduler) {
    let summary = demo::cancellation(scheduler);
    info!(
        "pre-cancelled: {:?}, owner dropped: {:?}",
        summary.pre_cancelled, summary.owner_dropped
    );
}

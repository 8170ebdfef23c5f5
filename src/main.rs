//! dropsync - Incrementally mirror a change feed into a local file cache.
//!
//! Usage:
//!   dropsync watch [SOURCE] --dest DIR    Mirror new files until Ctrl-C
//!   dropsync once [SOURCE] --dest DIR     Run a single scan cycle
//!   dropsync cached --dest DIR            List files in the cache
//!   dropsync --help                       Show help

mod report;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropsync_core::SyncNotification;
use dropsync_scan::{CycleOutcome, DirectoryFeed, IntervalScheduler, SyncOrchestrator};
use dropsync_store::LocalFileCache;

use report::{collect_cycle, drain_ready};
use settings::{Overrides, RunPlan, Settings, resolve_destination};

#[derive(Parser)]
#[command(
    name = "dropsync",
    version,
    about = "Incrementally mirror new files into a local cache",
    long_about = "dropsync polls a change feed on a fixed interval, remembers where the \
                  last scan ended, and copies every new or changed file under the \
                  watched folder into a flat destination directory.\n\n\
                  Settings are read from <config dir>/dropsync/config.toml unless \
                  --config is given; flags override the file."
)]
struct Cli {
    /// Settings file to use instead of the default location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan periodically and store new files until interrupted
    Watch {
        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Run one scan cycle, wait for its files, and print a report
    Once {
        #[command(flatten)]
        sync: SyncArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List the files stored in the destination directory
    Cached {
        /// Destination directory
        #[arg(short, long)]
        dest: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// Directory tree to mirror (defaults to current directory)
    source: Option<PathBuf>,

    /// Destination directory for stored files
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Only store files under this folder of the source, e.g. "/Camera Uploads"
    #[arg(long)]
    folder: Option<String>,

    /// Milliseconds between scans
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Maximum number of simultaneous downloads
    #[arg(short, long)]
    max_downloads: Option<usize>,
}

impl From<SyncArgs> for Overrides {
    fn from(args: SyncArgs) -> Self {
        Self {
            source: args.source,
            destination: args.dest,
            folder: args.folder,
            interval_ms: args.interval_ms,
            max_concurrent_downloads: args.max_downloads,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Watch { sync } => {
            let plan = RunPlan::resolve(settings, sync.into())?;
            run_watch(plan).await?;
        }
        Command::Once { sync, format } => {
            let plan = RunPlan::resolve(settings, sync.into())?;
            run_once(plan, format).await?;
        }
        Command::Cached { dest, format } => {
            let destination = resolve_destination(dest, settings.destination)?;
            run_cached(destination, format)?;
        }
    }

    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (default `dropsync=info`).
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dropsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_orchestrator(plan: &RunPlan) -> Result<SyncOrchestrator> {
    let cache = LocalFileCache::open(&plan.destination).with_context(|| {
        format!(
            "Cannot open destination directory {}",
            plan.destination.display()
        )
    })?;

    SyncOrchestrator::builder()
        .feed(Arc::new(DirectoryFeed::new(&plan.source)))
        .sink(Arc::new(cache))
        .scheduler(Arc::new(IntervalScheduler::new()))
        .config(plan.config.clone())
        .build()
        .context("Failed to set up sync")
}

/// Scan until Ctrl-C, then let in-flight files finish.
async fn run_watch(plan: RunPlan) -> Result<()> {
    let orchestrator = build_orchestrator(&plan)?;
    let mut notifications = orchestrator.subscribe();

    eprintln!(
        "Watching {} (folder {}) every {}ms, storing into {}",
        plan.source.display(),
        orchestrator.criteria().root_prefix(),
        plan.config.interval_ms,
        plan.destination.display()
    );
    eprintln!("Press Ctrl-C to stop.");

    orchestrator.start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            received = notifications.recv() => match received {
                Ok(notification) => print_notification(&notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification output fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    orchestrator.stop();
    eprintln!("Stopping, waiting for in-flight files...");
    orchestrator.wait_idle().await;
    drain_ready(&mut notifications, |notification| {
        print_notification(&notification)
    });

    Ok(())
}

fn print_notification(notification: &SyncNotification) {
    match notification {
        SyncNotification::FileSynchronized { path } => println!("stored  {path}"),
        SyncNotification::ErrorOccurred { message } => eprintln!("error   {message}"),
        SyncNotification::CycleCompleted(report) if report.dispatched > 0 => {
            println!("{}", report.summary());
        }
        SyncNotification::CycleCompleted(_) => {}
    }
}

/// Run a single cycle and report what it stored.
async fn run_once(plan: RunPlan, format: OutputFormat) -> Result<()> {
    let orchestrator = build_orchestrator(&plan)?;
    // Drain while the cycle runs so a large first listing cannot overflow the channel
    let collector = tokio::spawn(collect_cycle(orchestrator.subscribe()));

    eprintln!("Scanning {}...", plan.source.display());

    let outcome = orchestrator.run_cycle().await;
    match outcome {
        CycleOutcome::FeedFailed { message, .. } => {
            collector.abort();
            bail!(message);
        }
        CycleOutcome::Skipped => {
            collector.abort();
            bail!("A scan cycle was already running");
        }
        CycleOutcome::Dispatched { .. } => {}
    }

    orchestrator.wait_idle().await;
    let summary = collector
        .await
        .context("Notification collector failed")?;
    let report = summary
        .report
        .clone()
        .ok_or_else(|| eyre!("Scan cycle ended without a report"))?;

    match format {
        OutputFormat::Text => {
            for path in &summary.stored {
                println!("stored  {path}");
            }
            for message in &summary.errors {
                println!("error   {message}");
            }
            if summary.missed > 0 {
                println!("({} notifications not shown)", summary.missed);
            }
            println!();
            println!(
                "{} ({}, {:.2}s)",
                report.summary(),
                format_size(report.bytes_stored),
                report.elapsed.as_secs_f64()
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    let failed = summary.failed();
    if failed > 0 {
        bail!("{failed} file(s) failed to sync");
    }
    Ok(())
}

/// List cached files with their sizes.
fn run_cached(destination: PathBuf, format: OutputFormat) -> Result<()> {
    if !destination.is_dir() {
        return Err(eyre!(
            "Destination {} does not exist",
            destination.display()
        ));
    }
    let cache = LocalFileCache::open(&destination)?;
    let entries = cache.entries()?;

    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(60));
            println!(" {}", cache.directory().display());
            println!(
                " {} files, {}",
                entries.len(),
                format_size(entries.iter().map(|f| f.size).sum())
            );
            println!("{}", "─".repeat(60));
            println!();

            for file in &entries {
                println!("  {:>10}  {}", format_size(file.size), file.name);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}

/// Format bytes as human-readable size.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

//! xpost-send - Background daemon for scheduled posting
//!
//! Runs the scheduler: every pending post gets a timer, posts missed while the
//! daemon was down are marked failed, and the store is re-read periodically so
//! posts scheduled or changed by xpost and xpost-queue are picked up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use libcrosspost::config::resolve_db_path;
use libcrosspost::events::{EventReceiver, SchedulerEvent};
use libcrosspost::poster::summarize_reports;
use libcrosspost::{build_workflow, logging, Config, CrosspostError, Database, Scheduler};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "xpost-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled posting")]
#[command(long_about = "\
xpost-send - Background daemon for scheduled posting

DESCRIPTION:
    xpost-send arms a timer for every pending post in the queue and publishes
    each one at its scheduled time, with per-platform adaptation and retry.
    Posts whose time passed while the daemon was not running are marked
    failed, never published late.

USAGE:
    # Run in foreground (logs to stderr)
    xpost-send

    # Pick up new posts every 10 seconds
    xpost-send --poll-interval 10s

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown. Posts being published finish and
                      their result is saved; other posts stay pending.

CONFIGURATION:
    [scheduler]
    poll_interval = \"60s\"

    [publishing]
    max_workers = 3
    max_attempts = 3
    retry_delay = \"5s\"
    backoff_multiplier = 1.0

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
")]
struct Cli {
    /// How often to re-read the queue (overrides config, e.g. "30s")
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Reconcile the queue once and exit
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_from_env(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<CrosspostError>()
            .map_or(1, CrosspostError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    let db_path = resolve_db_path(Some(&config.database.path))?;
    let db = Database::new(&db_path.to_string_lossy())
        .await
        .with_context(|| format!("opening queue at {}", db_path.display()))?;
    let workflow = Arc::new(build_workflow(&config)?);

    info!("xpost-send starting");
    let scheduler = Scheduler::start(db, workflow).await?;
    let log_task = tokio::spawn(log_events(scheduler.subscribe()));

    if cli.once {
        scheduler.sync().await?;
        scheduler.shutdown().await;
        info!("xpost-send: reconciled queue once, exiting");
        return Ok(());
    }

    let poll_interval = cli.poll_interval.unwrap_or(config.scheduler.poll_interval);
    info!("Poll interval: {}", humantime::format_duration(poll_interval));

    tokio::select! {
        _ = run_sync_loop(&scheduler, poll_interval) => {}
        result = shutdown_signal() => {
            result.context("installing signal handlers")?;
            info!("Received shutdown signal, stopping gracefully...");
        }
    }

    scheduler.shutdown().await;
    log_task.abort();
    info!("xpost-send stopped");
    Ok(())
}

async fn run_sync_loop(scheduler: &Arc<Scheduler>, poll_interval: Duration) {
    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(100)));
    // the first tick completes immediately and start() already loaded everything
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match scheduler.sync().await {
            Ok(0) => {}
            Ok(changed) => info!("Picked up {} queue change(s)", changed),
            Err(e) => warn!("Queue sync failed: {}", e),
        }
    }
}

async fn log_events(mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(SchedulerEvent::Executed {
                post_id,
                status,
                reports,
            }) => {
                info!("Post {} {}:\n{}", post_id, status, summarize_reports(&reports));
            }
            Ok(SchedulerEvent::MissedFire {
                post_id,
                scheduled_time,
            }) => {
                warn!("Post {} missed its time ({}), marked failed", post_id, scheduled_time);
            }
            Ok(other) => tracing::debug!("Scheduler event: {:?}", other),
            Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();
    if let Some(signal) = signals.next().await {
        tracing::debug!("Got signal {}", signal);
    }
    handle.close();
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

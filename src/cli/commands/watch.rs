//! Watch command implementation.
//!
//! Installs the process-wide queue, starts the connectivity monitor and a
//! probe sampler, and prints queue events until Ctrl-C.

use super::open_service;
use crate::cli::WatchArgs;
use crate::connectivity::probe::spawn_sampler;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor, HttpProbe};
use crate::error::{Error, Result};
use crate::notify::{NotificationStyle, QueueEvent, Severity};
use crate::runtime;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Execute the watch command.
///
/// # Errors
///
/// Returns an error if no endpoint is configured or the queue is unavailable.
pub fn execute(
    args: &WatchArgs,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let service = open_service(db_path, actor, true)?;
    if !service.is_available() {
        // Surface the StorageUnavailable error instead of watching an empty queue
        service.count()?;
    }

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;

    let service = runtime::init(service)?;
    let result = rt.block_on(watch(args, Arc::clone(&service), json));
    runtime::reset();
    result
}

async fn watch(args: &WatchArgs, service: Arc<crate::queue::QueueService>, json: bool) -> Result<()> {
    let settings = service.settings().clone();
    let mut events = service.subscribe();
    let monitor = ConnectivityMonitor::spawn(Arc::clone(&service));

    let sampler = if args.assume_online {
        monitor.send(ConnectivityEvent::Online).await?;
        None
    } else {
        let probe = HttpProbe::from_settings(&settings)?;
        let interval = args
            .interval_ms
            .map_or_else(|| settings.sample_interval(), Duration::from_millis);
        Some(spawn_sampler(
            probe,
            interval,
            settings.metered,
            monitor.sender(),
            monitor.shutdown_token(),
        ))
    };

    if !json {
        println!("Watching queue ({} waiting). Press Ctrl-C to stop.", service.count()?);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(e) = print_event(&event, json) {
                        break Err(e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output fell behind"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    monitor.shutdown().await;
    if let Some(sampler) = sampler {
        if let Err(e) = sampler.await {
            warn!(error = %e, "Connectivity sampler failed");
        }
    }
    outcome
}

fn print_event(event: &QueueEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        QueueEvent::Enqueued { id, op_type } => {
            println!("{} {op_type} {}", "+".cyan(), id.dimmed());
        }
        QueueEvent::StatusChanged { id, from, to } => {
            println!("  {} {from} → {to}", id.dimmed());
        }
        QueueEvent::Cancelled { id } => println!("{} {}", "-".yellow(), id.dimmed()),
        QueueEvent::SyncStarted { total } => println!("Sync started ({total} queued)"),
        QueueEvent::SyncFinished { report } => println!(
            "Sync finished: {} completed, {} failed{}",
            report.completed,
            report.failed,
            if report.aborted { " (aborted)" } else { "" }
        ),
        QueueEvent::ConflictResolved { id, op_type } => {
            println!("{} {op_type} {} overwrote newer server data", "!".yellow(), id.dimmed());
        }
        QueueEvent::ThresholdExceeded { count, threshold } => {
            println!("{}", format!("{count} operations queued (warning above {threshold})").yellow());
        }
        QueueEvent::Connectivity { state } => println!("{} {state}", "●".blue()),
        QueueEvent::Notification(n) => {
            let title = match n.severity {
                Severity::Info => n.title.normal(),
                Severity::Success => n.title.green(),
                Severity::Warning => n.title.yellow(),
                Severity::Error => n.title.red(),
            };
            let marker = match n.style {
                NotificationStyle::Toast => "",
                NotificationStyle::Push => " [push]",
            };
            println!("{}{marker}: {}", title.bold(), n.body);
        }
    }
    Ok(())
}

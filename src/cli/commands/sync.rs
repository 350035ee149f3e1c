//! Sync command implementations (sync, retry, purge).

use super::open_service;
use crate::error::{Error, Result};
use crate::model::OperationStatus;
use crate::queue::SyncReport;
use crate::storage::OperationFilter;
use colored::Colorize;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Serialize)]
struct RetryOutput<'a> {
    id: &'a str,
    status: OperationStatus,
}

#[derive(Serialize)]
struct PurgeOutput {
    purged: usize,
}

/// Run `work` on a fresh runtime with a token that Ctrl-C cancels.
fn run_cancellable<F, Fut, T>(work: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;

    rt.block_on(async {
        let token = CancellationToken::new();
        let on_interrupt = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, finishing the current operation");
                on_interrupt.cancel();
            }
        });
        work(token).await
    })
}

/// Execute the sync command.
///
/// # Errors
///
/// Returns an error if no endpoint is configured or the queue is unavailable.
pub fn execute_sync(db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    let service = open_service(db_path, actor, true)?;
    let report = run_cancellable(|token| async move { service.sync(&token).await })?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    print_report(&report);
    if report.failed > 0 {
        let service = open_service(db_path, actor, false)?;
        let failed = service.list(&OperationFilter::default().with_status(OperationStatus::Failed))?;
        println!();
        for op in failed {
            println!(
                "  {} {} {}",
                op.id.dimmed(),
                op.op_type,
                op.last_error.as_deref().unwrap_or_default().red()
            );
        }
        println!();
        println!("Retry one with: oq retry <id>");
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.already_running {
        println!("{}", "A sync is already running.".yellow());
        return;
    }
    if report.total == 0 {
        println!("Nothing to sync.");
        return;
    }

    println!(
        "{} {} of {} operation(s)",
        "Synced".green(),
        report.completed,
        report.total
    );
    if report.failed > 0 {
        println!("  {} {}", "Failed:".red(), report.failed);
    }
    if report.skipped > 0 {
        println!("  Skipped: {}", report.skipped);
    }
    if report.aborted {
        println!("  {}", "Interrupted; the rest stays queued.".yellow());
    }
}

/// Execute the retry command.
///
/// # Errors
///
/// Returns an error unless the operation exists and is `failed`.
pub fn execute_retry(
    id: &str,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let service = open_service(db_path, actor, true)?;
    let status = run_cancellable(|token| async move { service.retry(id, &token).await })?;

    if json {
        let output = RetryOutput { id, status };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    match status {
        OperationStatus::Completed => println!("{} {id}", "Synced".green()),
        OperationStatus::Failed => println!("{} {id} (see: oq show {id})", "Still failing".red()),
        OperationStatus::Pending | OperationStatus::Syncing => {
            println!("{} {id}; it will be retried on the next sync", "Interrupted".yellow());
        }
    }
    Ok(())
}

/// Execute the purge command.
///
/// # Errors
///
/// Returns an error if the queue is unavailable.
pub fn execute_purge(
    all: bool,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let service = open_service(db_path, actor, false)?;
    let purged = if all {
        service.purge_completed()?
    } else {
        service.purge_expired()?
    };

    if json {
        println!("{}", serde_json::to_string(&PurgeOutput { purged })?);
    } else {
        println!("Purged {purged} completed operation(s)");
    }
    Ok(())
}

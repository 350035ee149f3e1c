//! Status command implementation.

use super::open_service;
use super::operation::status_label;
use crate::error::Result;
use crate::status::QueueSnapshot;
use colored::Colorize;
use std::path::PathBuf;

/// Execute the status command.
///
/// A queue whose store cannot be opened is reported as unavailable rather
/// than failing the command.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded or the store cannot be read.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let service = open_service(db_path, None, false)?;
    let snapshot = service.snapshot()?;

    if json {
        println!("{}", serde_json::to_string(&snapshot)?);
        return Ok(());
    }

    print_snapshot(&snapshot);
    Ok(())
}

fn print_snapshot(snapshot: &QueueSnapshot) {
    println!("Offline Queue");
    println!("=============");
    println!();

    if !snapshot.available {
        println!("{}", "Storage unavailable: queuing is disabled.".red());
        return;
    }

    let depth = if snapshot.threshold_exceeded {
        format!("{} (over {})", snapshot.depth, snapshot.threshold).yellow()
    } else {
        snapshot.depth.to_string().normal()
    };
    println!("Waiting:   {depth}");
    println!("  Pending:   {}", snapshot.counts.pending);
    println!("  Syncing:   {}", snapshot.counts.syncing);
    println!("  Completed: {}", snapshot.counts.completed);
    println!("  Failed:    {}", snapshot.counts.failed);

    if snapshot.progress.running {
        println!();
        println!(
            "Sync in progress: {}/{}",
            snapshot.progress.processed, snapshot.progress.total
        );
    }

    let retryable: Vec<_> = snapshot.retryable().collect();
    if !retryable.is_empty() {
        println!();
        println!("{}", "Needs attention".bold());
        for item in &retryable {
            println!(
                "  {} {} {}",
                item.id.dimmed(),
                status_label(item.status),
                item.op_type
            );
        }
        println!();
        println!("Retry with: oq retry <id>");
    }

    if snapshot.depth == 0 && retryable.is_empty() {
        println!();
        println!("{}", "All caught up.".green());
    }
}

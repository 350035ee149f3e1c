//! Operation command implementations (enqueue, list, show, cancel).

use super::{format_timestamp, open_service, parse_status};
use crate::cli::{EnqueueArgs, ListArgs};
use crate::error::{Error, Result};
use crate::model::{OperationStatus, OperationType, QueuedOperation};
use crate::storage::OperationFilter;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;

#[derive(Serialize)]
struct EnqueueOutput<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    op_type: OperationType,
    status: OperationStatus,
    depth: usize,
}

#[derive(Serialize)]
struct ListOutput<'a> {
    operations: &'a [QueuedOperation],
    count: usize,
}

#[derive(Serialize)]
struct CancelOutput<'a> {
    id: &'a str,
    cancelled: bool,
}

/// Execute the enqueue command.
///
/// # Errors
///
/// Returns an error if the type or payload is invalid or the queue is unavailable.
pub fn execute_enqueue(
    args: &EnqueueArgs,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let op_type: OperationType = args.op_type.parse()?;
    let payload = read_payload(&args.payload)?;

    let service = open_service(db_path, actor, false)?;
    let id = match &args.user {
        Some(user) => service.enqueue_for_user(op_type, payload, user)?,
        None => service.enqueue(op_type, payload)?,
    };
    let depth = service.count()?;

    if json {
        let output = EnqueueOutput {
            id: &id,
            op_type,
            status: OperationStatus::Pending,
            depth,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{} {} {}", "Queued".green(), op_type, id.dimmed());
        println!("  {depth} operation(s) waiting for sync");
    }
    Ok(())
}

/// Execute the list command.
///
/// # Errors
///
/// Returns an error if a filter is invalid or the queue is unavailable.
pub fn execute_list(args: &ListArgs, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let mut filter = OperationFilter::default();
    if let Some(status) = &args.status {
        filter = filter.with_status(parse_status(status)?);
    }
    if let Some(op_type) = &args.op_type {
        filter = filter.with_type(op_type.parse()?);
    }
    if let Some(user) = &args.user {
        filter = filter.with_user(user);
    }
    if let Some(limit) = args.limit {
        filter = filter.with_limit(limit);
    }

    let service = open_service(db_path, None, false)?;
    let operations = service.list(&filter)?;

    if json {
        let output = ListOutput {
            operations: &operations,
            count: operations.len(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for op in &operations {
        let mut line = format!(
            "{}  {:<9}  {:<15}  {}",
            op.id.dimmed(),
            status_label(op.status),
            op.op_type.to_string(),
            format_timestamp(op.created_at).dimmed()
        );
        if op.attempt_count > 0 {
            line.push_str(&format!("  attempts: {}", op.attempt_count));
        }
        println!("{line}");
    }
    println!();
    println!("{} operation(s)", operations.len());
    Ok(())
}

/// Execute the show command.
///
/// # Errors
///
/// Returns `OperationNotFound` if the id is unknown.
pub fn execute_show(id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let service = open_service(db_path, None, false)?;
    let op = service.get(id)?;

    if json {
        println!("{}", serde_json::to_string(&op)?);
        return Ok(());
    }

    println!("{}", op.id.bold());
    println!("  Type:     {}", op.op_type);
    println!("  Status:   {}", status_label(op.status));
    println!("  Attempts: {}", op.attempt_count);
    println!("  Created:  {}", format_timestamp(op.created_at));
    println!("  Updated:  {}", format_timestamp(op.updated_at));
    if let Some(completed) = op.completed_at {
        println!("  Synced:   {}", format_timestamp(completed));
    }
    if let Some(user) = &op.user_id {
        println!("  User:     {user}");
    }
    if op.force_overwrite {
        println!("  {}", "Overwrites server state (conflict resolved)".yellow());
    }
    if let Some(err) = &op.last_error {
        println!("  Error:    {}", err.red());
    }
    println!("  Payload:");
    let pretty = serde_json::to_string_pretty(&op.payload)?;
    for line in pretty.lines() {
        println!("    {line}");
    }
    if op.status == OperationStatus::Failed {
        println!();
        println!("Retry with: oq retry {}", op.id);
    }
    Ok(())
}

/// Execute the cancel command.
///
/// # Errors
///
/// Returns an error if the operation is syncing, completed or unknown.
pub fn execute_cancel(
    id: &str,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let service = open_service(db_path, actor, false)?;
    service.cancel(id)?;

    if json {
        let output = CancelOutput { id, cancelled: true };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{} {id}", "Cancelled".yellow());
    }
    Ok(())
}

pub(crate) fn status_label(status: OperationStatus) -> colored::ColoredString {
    match status {
        OperationStatus::Pending => status.as_str().cyan(),
        OperationStatus::Syncing => status.as_str().blue(),
        OperationStatus::Completed => status.as_str().green(),
        OperationStatus::Failed => status.as_str().red(),
    }
}

/// Parse a payload argument; `-` reads from stdin.
fn read_payload(arg: &str) -> Result<Value> {
    let text = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        arg.to_string()
    };

    serde_json::from_str(&text)
        .map_err(|e| Error::InvalidArgument(format!("payload is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_payload() {
        assert_eq!(read_payload(r#"{"title":"X"}"#).unwrap()["title"], "X");
        assert!(matches!(read_payload("{oops"), Err(Error::InvalidArgument(_))));
    }
}

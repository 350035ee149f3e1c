//! Command implementations.

pub mod completions;
pub mod operation;
pub mod status;
pub mod sync;
pub mod version;
pub mod watch;

use crate::config::{default_actor, load_settings, resolve_db_path};
use crate::error::{Error, Result};
use crate::model::OperationStatus;
use crate::queue::{ExecutorRegistry, HttpExecutor, QueueService};
use crate::validate::normalize_status;
use std::path::PathBuf;

/// Open the queue for a command.
///
/// With `executors`, every operation type is routed to an [`HttpExecutor`]
/// for the configured endpoint. Commands that only read or edit the local
/// queue pass `false` and need no endpoint.
pub(crate) fn open_service(
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    executors: bool,
) -> Result<QueueService> {
    let settings = load_settings()?;
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))?;

    let registry = if executors {
        ExecutorRegistry::builder()
            .register_all(HttpExecutor::from_settings(&settings)?)
            .build()?
    } else {
        ExecutorRegistry::default()
    };

    let actor = actor.map_or_else(default_actor, str::to_string);
    Ok(QueueService::open(&db_path, registry, settings).with_actor(&actor))
}

/// Parse a status argument, accepting synonyms.
pub(crate) fn parse_status(input: &str) -> Result<OperationStatus> {
    let canonical = normalize_status(input).map_err(|(input, suggestion)| {
        let msg = match suggestion {
            Some(s) => format!("unknown status '{input}' (did you mean '{s}'?)"),
            None => format!("unknown status '{input}'"),
        };
        Error::InvalidArgument(msg)
    })?;
    Ok(OperationStatus::from_str(&canonical))
}

/// Format a Unix-millisecond timestamp for humans.
pub(crate) fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms).map_or_else(
        || ms.to_string(),
        |dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_synonyms() {
        assert_eq!(parse_status("done").unwrap(), OperationStatus::Completed);
        assert_eq!(parse_status("failed").unwrap(), OperationStatus::Failed);
        assert!(matches!(parse_status("pendng"), Err(Error::InvalidArgument(m)) if m.contains("pending")));
    }
}

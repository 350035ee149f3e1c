//! Read-only views of the queue for status indicators.
//!
//! Nothing here mutates queue state except the lazy purge of completed
//! records whose grace period has run out.

use crate::error::{Error, Result};
use crate::model::{OperationStatus, OperationType, QueuedOperation};
use crate::queue::QueueService;
use crate::storage::{OperationFilter, StatusCounts};
use serde::{Deserialize, Serialize};

/// Largest count shown on a badge before it reads `99+`.
pub const BADGE_CAP: usize = 99;

/// Where the current sync loop is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub running: bool,
    pub total: usize,
    pub processed: usize,
    /// Operation being attempted right now
    pub current: Option<String>,
}

impl SyncProgress {
    /// Completion ratio in `0.0..=1.0`. An empty run counts as done.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.processed as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Per-item row for a queue list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub status: OperationStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    /// Failed items can be retried by hand.
    pub retryable: bool,
}

impl From<&QueuedOperation> for ItemStatus {
    fn from(op: &QueuedOperation) -> Self {
        Self {
            id: op.id.clone(),
            op_type: op.op_type,
            status: op.status,
            attempt_count: op.attempt_count,
            last_error: op.last_error.clone(),
            created_at: op.created_at,
            retryable: op.status == OperationStatus::Failed,
        }
    }
}

/// Everything a status indicator needs, captured at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// False when the store could not be opened
    pub available: bool,
    /// Operations still waiting: `pending + syncing`
    pub depth: usize,
    pub counts: StatusCounts,
    pub threshold: usize,
    pub threshold_exceeded: bool,
    /// Badge text, empty when there is nothing queued
    pub badge: String,
    pub progress: SyncProgress,
    pub items: Vec<ItemStatus>,
}

impl QueueSnapshot {
    /// Capture the current state of `service`.
    ///
    /// A service in degraded mode yields an empty, unavailable snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn capture(service: &QueueService) -> Result<Self> {
        let threshold = service.settings().queue_warning_threshold;
        let progress = service.progress().borrow().clone();

        if !service.is_available() {
            return Ok(Self {
                available: false,
                depth: 0,
                counts: StatusCounts::default(),
                threshold,
                threshold_exceeded: false,
                badge: String::new(),
                progress,
                items: Vec::new(),
            });
        }

        match service.purge_expired() {
            Ok(_) | Err(Error::StorageUnavailable { .. }) => {}
            Err(e) => return Err(e),
        }

        let counts = service.counts()?;
        let items = service
            .list(&OperationFilter::default())?
            .iter()
            .map(ItemStatus::from)
            .collect();
        let depth = counts.active();

        Ok(Self {
            available: true,
            depth,
            counts,
            threshold,
            threshold_exceeded: depth > threshold,
            badge: badge_text(depth),
            progress,
            items,
        })
    }

    /// Items the user can retry.
    pub fn retryable(&self) -> impl Iterator<Item = &ItemStatus> {
        self.items.iter().filter(|i| i.retryable)
    }
}

impl QueueService {
    /// Capture a [`QueueSnapshot`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn snapshot(&self) -> Result<QueueSnapshot> {
        QueueSnapshot::capture(self)
    }
}

/// Badge label for a queue depth: empty at zero, capped at `99+`.
#[must_use]
pub fn badge_text(depth: usize) -> String {
    match depth {
        0 => String::new(),
        n if n > BADGE_CAP => format!("{BADGE_CAP}+"),
        n => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::queue::ExecutorRegistry;
    use crate::storage::SqliteStorage;
    use serde_json::json;

    fn service() -> QueueService {
        QueueService::new(
            SqliteStorage::open_memory().unwrap(),
            ExecutorRegistry::default(),
            QueueSettings::immediate(),
        )
    }

    #[test]
    fn test_badge_text() {
        assert_eq!(badge_text(0), "");
        assert_eq!(badge_text(7), "7");
        assert_eq!(badge_text(99), "99");
        assert_eq!(badge_text(100), "99+");
    }

    #[test]
    fn test_snapshot_counts_depth() {
        let svc = service();
        svc.enqueue(OperationType::PhotoCapture, json!({})).unwrap();
        svc.enqueue(OperationType::CheckIn, json!({})).unwrap();

        let snap = svc.snapshot().unwrap();
        assert!(snap.available);
        assert_eq!(snap.depth, 2);
        assert_eq!(snap.counts.pending, 2);
        assert_eq!(snap.badge, "2");
        assert!(!snap.threshold_exceeded);
        assert_eq!(snap.items.len(), 2);
        assert_eq!(snap.retryable().count(), 0);
    }

    #[test]
    fn test_snapshot_in_degraded_mode() {
        let svc = QueueService::degraded(
            "disk full",
            ExecutorRegistry::default(),
            QueueSettings::default(),
        );
        let snap = svc.snapshot().unwrap();
        assert!(!snap.available);
        assert_eq!(snap.depth, 0);
        assert!(snap.badge.is_empty());
    }

    #[test]
    fn test_progress_fraction() {
        let idle = SyncProgress::default();
        assert!((idle.fraction() - 1.0).abs() < f64::EPSILON);

        let half = SyncProgress {
            running: true,
            total: 4,
            processed: 2,
            current: Some("op_1".into()),
        };
        assert!((half.fraction() - 0.5).abs() < f64::EPSILON);
    }
}

//! Queued operation model.
//!
//! A queued operation is a user-initiated mutation that could not reach the
//! network when it was attempted and waits locally until it can be replayed.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The fixed set of operation kinds an executor can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    PhotoCapture,
    VoiceCapture,
    TextCapture,
    QuickAction,
    VoiceNote,
    PropertyShare,
    CheckIn,
    ContentCreate,
    ContentUpdate,
    ContentDelete,
}

impl OperationType {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::PhotoCapture,
        Self::VoiceCapture,
        Self::TextCapture,
        Self::QuickAction,
        Self::VoiceNote,
        Self::PropertyShare,
        Self::CheckIn,
        Self::ContentCreate,
        Self::ContentUpdate,
        Self::ContentDelete,
    ];

    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PhotoCapture => "photo-capture",
            Self::VoiceCapture => "voice-capture",
            Self::TextCapture => "text-capture",
            Self::QuickAction => "quick-action",
            Self::VoiceNote => "voice-note",
            Self::PropertyShare => "property-share",
            Self::CheckIn => "check-in",
            Self::ContentCreate => "content-create",
            Self::ContentUpdate => "content-update",
            Self::ContentDelete => "content-delete",
        }
    }

    /// Parse the canonical storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let canonical = crate::validate::normalize_type(s).map_err(|(input, suggestion)| {
            let msg = match suggestion {
                Some(s) => format!("unknown operation type '{input}' (did you mean '{s}'?)"),
                None => format!("unknown operation type '{input}'"),
            };
            Error::InvalidArgument(msg)
        })?;
        Self::parse(&canonical)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown operation type '{s}'")))
    }
}

/// Lifecycle status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl OperationStatus {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from string. Unknown values read back as `Pending` so a
    /// corrupted row is retried rather than lost.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s {
            "syncing" => Self::Syncing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Allowed edges of the lifecycle graph.
    #[must_use]
    pub const fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Syncing)
                | (Self::Syncing, Self::Completed | Self::Failed | Self::Pending)
                | (Self::Failed, Self::Syncing)
        )
    }

    /// Whether the operation still counts toward queue depth.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Syncing)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, replayable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier assigned at enqueue time (`op_<uuid>`)
    pub id: String,

    /// Which executor replays this operation
    #[serde(rename = "type")]
    pub op_type: OperationType,

    /// Opaque JSON payload handed to the executor
    pub payload: Value,

    pub status: OperationStatus,

    /// Failed attempts so far
    pub attempt_count: u32,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,

    /// When the operation reached `completed` (Unix milliseconds)
    pub completed_at: Option<i64>,

    pub last_error: Option<String>,

    /// Owner of the operation, if the caller is signed in
    pub user_id: Option<String>,

    /// Set once a version conflict was resolved by overwriting server state
    pub force_overwrite: bool,
}

impl QueuedOperation {
    /// Create a new pending operation with a fresh id.
    #[must_use]
    pub fn new(op_type: OperationType, payload: Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("op_{}", uuid::Uuid::new_v4().simple()),
            op_type,
            payload,
            status: OperationStatus::Pending,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
            user_id: None,
            force_overwrite: false,
        }
    }

    /// Attach an owning user.
    #[must_use]
    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Move to `to`, rejecting edges outside the lifecycle graph.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the edge is not allowed.
    pub fn transition(&mut self, to: OperationStatus) -> Result<OperationStatus> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                id: self.id.clone(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let now = chrono::Utc::now().timestamp_millis();
        self.status = to;
        self.updated_at = now;
        match to {
            OperationStatus::Completed => {
                self.completed_at = Some(now);
                self.last_error = None;
            }
            OperationStatus::Syncing | OperationStatus::Pending | OperationStatus::Failed => {}
        }
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_operation() {
        let op = QueuedOperation::new(OperationType::ContentCreate, json!({"title": "X"}));

        assert!(op.id.starts_with("op_"));
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempt_count, 0);
        assert_eq!(op.created_at, op.updated_at);
        assert!(!op.force_overwrite);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = QueuedOperation::new(OperationType::CheckIn, json!({}));
        let b = QueuedOperation::new(OperationType::CheckIn, json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_lifecycle_edges() {
        use OperationStatus::*;
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Completed));
        assert!(Syncing.can_transition_to(Failed));
        assert!(Syncing.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Syncing));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Syncing));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_transition_sets_completed_at() {
        let mut op = QueuedOperation::new(OperationType::VoiceNote, json!({}));
        op.transition(OperationStatus::Syncing).unwrap();
        op.last_error = Some("flaky".into());
        op.transition(OperationStatus::Completed).unwrap();

        assert!(op.completed_at.is_some());
        assert!(op.last_error.is_none());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut op = QueuedOperation::new(OperationType::VoiceNote, json!({}));
        let err = op.transition(OperationStatus::Completed).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(op.status, OperationStatus::Pending);
    }

    #[test]
    fn test_type_round_trips_through_storage_form() {
        for ty in OperationType::ALL {
            assert_eq!(OperationType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(OperationType::parse("nope"), None);
    }

    #[test]
    fn test_type_from_str_accepts_synonyms() {
        let ty: OperationType = "photo".parse().unwrap();
        assert_eq!(ty, OperationType::PhotoCapture);
        assert!("teleport".parse::<OperationType>().is_err());
    }

    #[test]
    fn test_serializes_type_as_kebab_case() {
        let op = QueuedOperation::new(OperationType::PropertyShare, json!({"id": 7}));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "property-share");
        assert_eq!(value["status"], "pending");
    }
}

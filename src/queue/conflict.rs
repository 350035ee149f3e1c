//! Version conflict resolution.
//!
//! When a replayed operation finds that the server-side resource changed
//! after the operation was queued, the local write wins: the operation is
//! flagged `force_overwrite` and reissued once as an unconditional write.

use super::executor::ExecutionRequest;
use crate::model::QueuedOperation;
use crate::notify::{Notification, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// How conflicting writes are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The most recent user intent overwrites the server.
    #[default]
    LastWriteWins,
}

impl ConflictPolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LastWriteWins => "last-write-wins",
        }
    }
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Request to reissue
    pub request: ExecutionRequest,
    /// Digest of the payload that won
    pub local_digest: String,
    /// Digest of the server state that was overwritten, if the server sent it
    pub server_digest: Option<String>,
    pub policy: ConflictPolicy,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    #[must_use]
    pub const fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolve a conflict on `op`, marking it for forced overwrite.
    pub fn resolve(
        &self,
        op: &mut QueuedOperation,
        request: &ExecutionRequest,
        server_state: Option<&Value>,
    ) -> Resolution {
        match self.policy {
            ConflictPolicy::LastWriteWins => {
                op.force_overwrite = true;
                op.updated_at = chrono::Utc::now().timestamp_millis();
                Resolution {
                    request: request.clone().forced(),
                    local_digest: content_hash(&op.payload),
                    server_digest: server_state.map(content_hash),
                    policy: self.policy,
                }
            }
        }
    }

    /// Notice shown to the user after their offline edit replaced newer server data.
    #[must_use]
    pub fn notification(&self, op: &QueuedOperation) -> Notification {
        Notification::toast(
            Severity::Info,
            "Offline change applied",
            &format!(
                "Your offline {} replaced changes made elsewhere in the meantime.",
                op.op_type
            ),
        )
        .for_operation(&op.id)
    }
}

/// SHA256 of a JSON value's serialized form.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationType;
    use serde_json::json;

    #[test]
    fn test_last_write_wins_forces_request() {
        let mut op = QueuedOperation::new(
            OperationType::ContentUpdate,
            json!({"entity_id": "E", "fields": {"title": "local"}}),
        );
        let request = ExecutionRequest::from_operation(&op);
        assert!(!request.force);

        let server = json!({"title": "server"});
        let resolution = ConflictResolver::default().resolve(&mut op, &request, Some(&server));

        assert!(op.force_overwrite);
        assert!(resolution.request.force);
        assert_eq!(resolution.request.payload, op.payload);
        assert_eq!(resolution.server_digest, Some(content_hash(&server)));
        assert_ne!(resolution.server_digest.as_deref(), Some(resolution.local_digest.as_str()));
    }

    #[test]
    fn test_missing_server_state() {
        let mut op = QueuedOperation::new(OperationType::ContentDelete, json!({"entity_id": "E"}));
        let request = ExecutionRequest::from_operation(&op);
        let resolution = ConflictResolver::default().resolve(&mut op, &request, None);
        assert!(resolution.server_digest.is_none());
    }

    #[test]
    fn test_content_hash_deterministic() {
        let value = json!({"id": "x", "n": 1});
        assert_eq!(content_hash(&value), content_hash(&value.clone()));
        assert_eq!(content_hash(&value).len(), 64);
        assert_ne!(content_hash(&value), content_hash(&json!({"id": "x", "n": 2})));
    }

    #[test]
    fn test_notification_names_operation() {
        let op = QueuedOperation::new(OperationType::ContentUpdate, json!({}));
        let n = ConflictResolver::default().notification(&op);
        assert_eq!(n.operation_id.as_deref(), Some(op.id.as_str()));
        assert!(n.body.contains("content-update"));
    }
}

//! Application event bus.
//!
//! The queue publishes every state change it makes as a [`QueueEvent`] on a
//! broadcast channel. Rendering toasts or push notifications is the
//! subscriber's job; nothing here blocks on a slow or absent listener.

use crate::connectivity::ConnectionState;
use crate::model::{OperationStatus, OperationType};
use crate::queue::SyncReport;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity. Lagging receivers lose the oldest events.
const DEFAULT_CAPACITY: usize = 256;

/// How a notification should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStyle {
    /// Transient in-app message
    Toast,
    /// System notification that survives the app being backgrounded
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Follow-up the user can trigger from a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationAction {
    Retry { operation_id: String },
}

/// A user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub style: NotificationStyle,
    pub severity: Severity,
    pub title: String,
    pub body: String,
    pub operation_id: Option<String>,
    pub action: Option<NotificationAction>,
}

impl Notification {
    #[must_use]
    pub fn toast(severity: Severity, title: &str, body: &str) -> Self {
        Self {
            style: NotificationStyle::Toast,
            severity,
            title: title.to_string(),
            body: body.to_string(),
            operation_id: None,
            action: None,
        }
    }

    #[must_use]
    pub fn push(severity: Severity, title: &str, body: &str) -> Self {
        Self {
            style: NotificationStyle::Push,
            ..Self::toast(severity, title, body)
        }
    }

    #[must_use]
    pub fn for_operation(mut self, id: &str) -> Self {
        self.operation_id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, id: &str) -> Self {
        self.action = Some(NotificationAction::Retry {
            operation_id: id.to_string(),
        });
        self
    }
}

/// Everything the queue announces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued {
        id: String,
        op_type: OperationType,
    },
    StatusChanged {
        id: String,
        from: OperationStatus,
        to: OperationStatus,
    },
    Cancelled {
        id: String,
    },
    SyncStarted {
        total: usize,
    },
    SyncFinished {
        report: SyncReport,
    },
    ConflictResolved {
        id: String,
        op_type: OperationType,
    },
    ThresholdExceeded {
        count: usize,
        threshold: usize,
    },
    Connectivity {
        state: ConnectionState,
    },
    Notification(Notification),
}

/// Sending half of the event bus. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<QueueEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: QueueEvent) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            trace!(?event, "no event subscribers");
        }
    }

    /// Publish a user-facing notification.
    pub fn notify(&self, notification: Notification) {
        self.emit(QueueEvent::Notification(notification));
    }
}

/// Drain every event currently buffered in `rx`.
#[must_use]
pub fn drain(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    events
}

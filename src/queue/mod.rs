//! The queue service.
//!
//! [`QueueService`] owns the store, the executor registry and the event bus.
//! It persists operations on enqueue and replays them FIFO on sync, retrying
//! transient failures with backoff and resolving version conflicts by
//! last-write-wins.
//!
//! # Submodules
//!
//! - [`executor`] - Executor trait and registry
//! - [`retry`] - Backoff policy
//! - [`conflict`] - Conflict resolution
//! - [`http`] - HTTP executor

pub mod conflict;
pub mod executor;
pub mod http;
pub mod retry;

pub use conflict::{ConflictPolicy, ConflictResolver, Resolution};
pub use executor::{
    BoxedExecutor, ExecutionRequest, ExecutionResult, Executor, ExecutorError, ExecutorRegistry,
    RegistryBuilder,
};
pub use http::HttpExecutor;
pub use retry::RetryPolicy;

use crate::config::QueueSettings;
use crate::error::{Error, Result};
use crate::model::{OperationStatus, OperationType, QueuedOperation};
use crate::notify::{Notification, Notifier, QueueEvent, Severity};
use crate::status::SyncProgress;
use crate::storage::events::{Event, EventType};
use crate::storage::{OperationFilter, SqliteStorage, StatusCounts};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Summary of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Operations loaded for replay
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Operations that were cancelled or finished elsewhere before their turn
    pub skipped: usize,
    /// The run was cancelled before the queue was drained
    pub aborted: bool,
    /// Another run was already in progress; nothing was done
    pub already_running: bool,
}

impl SyncReport {
    fn already_running() -> Self {
        Self {
            already_running: true,
            ..Self::default()
        }
    }

    /// Everything loaded was replayed successfully.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && !self.aborted && !self.already_running
    }
}

/// Result of [`QueueService::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Executed online; carries the executor's response.
    Executed(Value),
    /// Persisted for later replay; carries the operation id.
    Queued(String),
}

/// How one operation's replay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    Skipped,
    Aborted,
}

/// Holds the single-sync flag for the duration of a run.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable offline operation queue.
pub struct QueueService {
    store: Option<Mutex<SqliteStorage>>,
    unavailable_reason: Option<String>,
    registry: ExecutorRegistry,
    settings: QueueSettings,
    retry: RetryPolicy,
    resolver: ConflictResolver,
    notifier: Notifier,
    progress: watch::Sender<SyncProgress>,
    sync_running: AtomicBool,
    actor: String,
}

impl QueueService {
    /// Create a service over an open store.
    #[must_use]
    pub fn new(storage: SqliteStorage, registry: ExecutorRegistry, settings: QueueSettings) -> Self {
        Self::build(Some(storage), None, registry, settings)
    }

    /// Create a service with no store. Every call that needs the queue
    /// returns `StorageUnavailable`.
    #[must_use]
    pub fn degraded(reason: &str, registry: ExecutorRegistry, settings: QueueSettings) -> Self {
        Self::build(None, Some(reason.to_string()), registry, settings)
    }

    /// Open the store at `path`, falling back to degraded mode on failure.
    #[must_use]
    pub fn open(path: &Path, registry: ExecutorRegistry, settings: QueueSettings) -> Self {
        match SqliteStorage::open(path) {
            Ok(storage) => Self::new(storage, registry, settings),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Offline storage unavailable, queuing disabled");
                Self::degraded(&e.to_string(), registry, settings)
            }
        }
    }

    fn build(
        storage: Option<SqliteStorage>,
        unavailable_reason: Option<String>,
        registry: ExecutorRegistry,
        settings: QueueSettings,
    ) -> Self {
        let (progress, _) = watch::channel(SyncProgress::default());
        Self {
            store: storage.map(Mutex::new),
            unavailable_reason,
            registry,
            retry: settings.retry_policy(),
            settings,
            resolver: ConflictResolver::default(),
            notifier: Notifier::default(),
            progress,
            sync_running: AtomicBool::new(false),
            actor: crate::config::default_actor(),
        }
    }

    /// Name recorded on audit events.
    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Publish on an existing event bus instead of a private one.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Whether the store is open.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    #[must_use]
    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Subscribe to queue events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.notifier.subscribe()
    }

    /// Watch sync progress.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Whether a sync loop is running right now.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.sync_running.load(Ordering::Acquire)
    }

    fn store(&self) -> Result<MutexGuard<'_, SqliteStorage>> {
        let store = self.store.as_ref().ok_or_else(|| Error::StorageUnavailable {
            reason: self
                .unavailable_reason
                .clone()
                .unwrap_or_else(|| "store not opened".to_string()),
        })?;
        store
            .lock()
            .map_err(|_| Error::Other("queue store lock poisoned".to_string()))
    }

    // ======================
    // Enqueue & Inspection
    // ======================

    /// Persist a new operation and return its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` in degraded mode, or a database error.
    pub fn enqueue(&self, op_type: OperationType, payload: Value) -> Result<String> {
        self.enqueue_operation(QueuedOperation::new(op_type, payload))
    }

    /// Persist a new operation owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` in degraded mode, or a database error.
    pub fn enqueue_for_user(
        &self,
        op_type: OperationType,
        payload: Value,
        user_id: &str,
    ) -> Result<String> {
        self.enqueue_operation(QueuedOperation::new(op_type, payload).with_user(user_id))
    }

    fn enqueue_operation(&self, mut op: QueuedOperation) -> Result<String> {
        if op.user_id.is_none() {
            op.user_id.clone_from(&self.settings.user_id);
        }

        let depth = {
            let mut store = self.store()?;
            store.put_operation(&op, EventType::OperationEnqueued, &self.actor)?;
            store.count_active()?
        };

        info!(id = %op.id, op_type = %op.op_type, depth, "Operation queued");
        self.notifier.emit(QueueEvent::Enqueued {
            id: op.id.clone(),
            op_type: op.op_type,
        });
        self.check_threshold(depth);
        Ok(op.id)
    }

    fn check_threshold(&self, depth: usize) {
        let threshold = self.settings.queue_warning_threshold;
        if depth <= threshold {
            return;
        }
        warn!(depth, threshold, "Offline queue exceeds warning threshold");
        self.notifier.emit(QueueEvent::ThresholdExceeded {
            count: depth,
            threshold,
        });
        self.notifier.notify(Notification::toast(
            Severity::Warning,
            "Lots of changes waiting",
            &format!("{depth} changes are waiting for a connection."),
        ));
    }

    /// Fetch one operation.
    ///
    /// # Errors
    ///
    /// Returns `OperationNotFound` if no record has this id.
    pub fn get(&self, id: &str) -> Result<QueuedOperation> {
        self.store()?
            .get_operation(id)?
            .ok_or_else(|| Error::OperationNotFound { id: id.to_string() })
    }

    /// List operations in replay order.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` in degraded mode, or a database error.
    pub fn list(&self, filter: &OperationFilter) -> Result<Vec<QueuedOperation>> {
        self.store()?.list_operations(filter)
    }

    /// Queue depth: operations still `pending` or `syncing`.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` in degraded mode, or a database error.
    pub fn count(&self) -> Result<usize> {
        self.store()?.count_active()
    }

    /// Number of records in each status.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` in degraded mode, or a database error.
    pub fn counts(&self) -> Result<StatusCounts> {
        self.store()?.count_by_status()
    }

    /// Remove a `pending` or `failed` operation before it is replayed.
    ///
    /// # Errors
    ///
    /// Returns `OperationInFlight` while the operation is syncing,
    /// `InvalidTransition` once it has completed, or `OperationNotFound`.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let op = {
            let mut store = self.store()?;
            let op = store
                .get_operation(id)?
                .ok_or_else(|| Error::OperationNotFound { id: id.to_string() })?;
            if matches!(op.status, OperationStatus::Pending | OperationStatus::Failed) {
                store.delete_operation(id, EventType::OperationCancelled, &self.actor)?;
            }
            op
        };

        match op.status {
            OperationStatus::Pending | OperationStatus::Failed => {
                info!(id, op_type = %op.op_type, "Operation cancelled");
                self.notifier.emit(QueueEvent::Cancelled { id: id.to_string() });
                Ok(())
            }
            OperationStatus::Syncing => Err(Error::OperationInFlight { id: id.to_string() }),
            OperationStatus::Completed => Err(Error::InvalidTransition {
                id: id.to_string(),
                from: op.status.to_string(),
                to: "cancelled".to_string(),
            }),
        }
    }

    /// Delete completed operations whose grace period has elapsed.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` in degraded mode, or a database error.
    pub fn purge_expired(&self) -> Result<usize> {
        let grace = i64::try_from(self.settings.completed_grace_ms).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now().timestamp_millis().saturating_sub(grace);
        let purged = self.store()?.purge_completed_before(cutoff, &self.actor)?;
        for id in &purged {
            debug!(id, "Purged completed operation");
        }
        Ok(purged.len())
    }

    /// Delete every completed operation, ignoring the grace period.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` in degraded mode, or a database error.
    pub fn purge_completed(&self) -> Result<usize> {
        let purged = self.store()?.purge_completed_before(i64::MAX, &self.actor)?;
        Ok(purged.len())
    }

    // ======================
    // Replay
    // ======================

    /// Replay every `pending` (and stale `syncing`) operation, oldest first.
    ///
    /// Cancelling `cancel` stops the loop after the in-flight attempt
    /// returns. Only one sync runs at a time; a concurrent call returns a
    /// report with `already_running` set.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteRegistry` if an operation type has no executor,
    /// `StorageUnavailable` in degraded mode, or a database error.
    /// Executor failures are recorded on the operations, not returned.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        self.registry.ensure_complete()?;
        let Some(_guard) = SyncGuard::acquire(&self.sync_running) else {
            debug!("Sync already running");
            return Ok(SyncReport::already_running());
        };

        self.purge_expired()?;
        let queue = self.list(&OperationFilter::replayable())?;
        let mut report = SyncReport {
            total: queue.len(),
            ..SyncReport::default()
        };

        info!(total = report.total, "Sync started");
        self.notifier.emit(QueueEvent::SyncStarted { total: report.total });
        self.publish_progress(true, report.total, 0, None);

        for (processed, op) in queue.iter().enumerate() {
            if cancel.is_cancelled() {
                report.aborted = true;
                break;
            }
            self.publish_progress(true, report.total, processed, Some(&op.id));

            match self.replay(&op.id, cancel).await {
                Ok(Outcome::Completed) => report.completed += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::Aborted) => {
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    self.publish_progress(false, report.total, processed, None);
                    return Err(e);
                }
            }
        }

        let processed = report.completed + report.failed + report.skipped;
        self.publish_progress(false, report.total, processed, None);

        if report.aborted {
            warn!(
                completed = report.completed,
                remaining = report.total - processed,
                "Sync aborted"
            );
        } else {
            info!(
                completed = report.completed,
                failed = report.failed,
                skipped = report.skipped,
                "Sync finished"
            );
        }
        if report.completed > 0 {
            self.notifier.notify(Notification::toast(
                Severity::Success,
                "Back online",
                &format!("{} offline changes synced.", report.completed),
            ));
        }
        self.notifier.emit(QueueEvent::SyncFinished {
            report: report.clone(),
        });
        Ok(report)
    }

    /// Manually retry a `failed` operation, with a fresh attempt budget.
    ///
    /// Returns the status the operation ended in.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the operation is `failed`,
    /// `OperationInFlight` while a sync is running, or `OperationNotFound`.
    pub async fn retry(&self, id: &str, cancel: &CancellationToken) -> Result<OperationStatus> {
        self.registry.ensure_complete()?;
        let Some(_guard) = SyncGuard::acquire(&self.sync_running) else {
            return Err(Error::OperationInFlight { id: id.to_string() });
        };

        let mut op = self.get(id)?;
        if op.status != OperationStatus::Failed {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from: op.status.to_string(),
                to: OperationStatus::Syncing.to_string(),
            });
        }

        info!(id, op_type = %op.op_type, "Manual retry");
        op.attempt_count = 0;
        op.last_error = None;
        self.set_status(&mut op, OperationStatus::Syncing)?;

        match self.attempt(op, cancel).await? {
            Outcome::Completed => Ok(OperationStatus::Completed),
            Outcome::Failed => Ok(OperationStatus::Failed),
            Outcome::Skipped | Outcome::Aborted => Ok(self.get(id)?.status),
        }
    }

    /// Execute right away when online; queue when offline or when the
    /// network lets us down.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailure` if the executor rejects the payload,
    /// `ConflictDetected` if a forced overwrite still conflicts, or
    /// `StorageUnavailable` if the operation had to be queued in degraded mode.
    pub async fn submit(
        &self,
        op_type: OperationType,
        payload: Value,
        online: bool,
    ) -> Result<SubmitOutcome> {
        let op = QueuedOperation::new(op_type, payload);
        if !online {
            return self.enqueue_operation(op).map(SubmitOutcome::Queued);
        }

        let mut op = op;
        match self.execute(&mut op, false).await? {
            Ok(value) => {
                debug!(id = %op.id, %op_type, "Executed online");
                Ok(SubmitOutcome::Executed(value))
            }
            Err(err) if err.is_transient() => {
                warn!(id = %op.id, %op_type, error = %err, "Online attempt failed, queuing");
                self.enqueue_operation(op).map(SubmitOutcome::Queued)
            }
            Err(err) => Err(err.into_error(&op.id)),
        }
    }

    /// Drive one operation from its stored state to an outcome.
    async fn replay(&self, id: &str, cancel: &CancellationToken) -> Result<Outcome> {
        let Some(mut op) = self.load(id)? else {
            debug!(id, "Operation gone before replay");
            return Ok(Outcome::Skipped);
        };

        match op.status {
            OperationStatus::Completed | OperationStatus::Failed => return Ok(Outcome::Skipped),
            OperationStatus::Pending => self.set_status(&mut op, OperationStatus::Syncing)?,
            OperationStatus::Syncing => {
                debug!(id, "Resuming interrupted operation");
            }
        }

        self.attempt(op, cancel).await
    }

    /// Attempt a `syncing` operation until it completes, fails permanently,
    /// or the run is aborted.
    async fn attempt(&self, mut op: QueuedOperation, cancel: &CancellationToken) -> Result<Outcome> {
        loop {
            debug!(id = %op.id, op_type = %op.op_type, attempt = op.attempt_count + 1, "Executing");

            let err = match self.execute(&mut op, true).await? {
                Ok(_) => {
                    self.set_status(&mut op, OperationStatus::Completed)?;
                    info!(id = %op.id, op_type = %op.op_type, "Operation synced");
                    self.notifier.notify(
                        Notification::toast(
                            Severity::Success,
                            "Synced",
                            &format!("Your {} was sent.", op.op_type),
                        )
                        .for_operation(&op.id),
                    );
                    return Ok(Outcome::Completed);
                }
                Err(err) => err,
            };

            if cancel.is_cancelled() && err.is_transient() {
                warn!(id = %op.id, error = %err, "Attempt failed after abort, left for next sync");
                return Ok(Outcome::Aborted);
            }

            op.attempt_count += 1;
            op.last_error = Some(err.to_string());

            if err.is_transient() && self.retry.should_retry(op.attempt_count) {
                self.set_status(&mut op, OperationStatus::Pending)?;
                let delay = self.retry.delay_for(op.attempt_count);
                warn!(
                    id = %op.id,
                    attempt = op.attempt_count,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Attempt failed, will retry"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return Ok(Outcome::Aborted),
                }
                self.set_status(&mut op, OperationStatus::Syncing)?;
                continue;
            }

            self.set_status(&mut op, OperationStatus::Failed)?;
            let failure = Error::PermanentFailure {
                id: op.id.clone(),
                attempts: op.attempt_count,
                last_error: err.to_string(),
            };
            error!(id = %op.id, op_type = %op.op_type, "{failure}");
            self.notifier.notify(
                Notification::push(
                    Severity::Error,
                    "Couldn't sync",
                    &format!("Your {} could not be sent: {err}", op.op_type),
                )
                .for_operation(&op.id)
                .with_retry(&op.id),
            );
            return Ok(Outcome::Failed);
        }
    }

    /// One executor call, with conflict resolution folded in.
    ///
    /// `persist` is false for online submissions that have no record yet.
    async fn execute(&self, op: &mut QueuedOperation, persist: bool) -> Result<ExecutionResult> {
        let executor = self
            .registry
            .get(op.op_type)
            .cloned()
            .ok_or_else(|| Error::IncompleteRegistry {
                missing: vec![op.op_type.to_string()],
            })?;

        let request = ExecutionRequest::from_operation(op);
        let result = self.call(&executor, &request).await;

        let server_state = match result {
            Err(ExecutorError::Conflict { server_state }) if !request.force => server_state,
            other => return Ok(other),
        };

        let resolution = self.resolver.resolve(op, &request, server_state.as_ref());
        self.record_conflict(op, &resolution, persist)?;
        Ok(self.call(&executor, &resolution.request).await)
    }

    async fn call(&self, executor: &BoxedExecutor, request: &ExecutionRequest) -> ExecutionResult {
        let timeout = self.settings.attempt_timeout();
        tokio::time::timeout(timeout, executor.execute(request))
            .await
            .unwrap_or(Err(ExecutorError::Timeout(timeout)))
    }

    fn record_conflict(
        &self,
        op: &QueuedOperation,
        resolution: &Resolution,
        persist: bool,
    ) -> Result<()> {
        if persist {
            let audit = Event::new("operation", &op.id, EventType::ConflictResolved, &self.actor)
                .with_values(
                    resolution.server_digest.clone(),
                    Some(resolution.local_digest.clone()),
                )
                .with_comment(resolution.policy.as_str());
            self.store()?.put_operation_with_event(
                op,
                EventType::OperationUpdated,
                audit,
                &self.actor,
            )?;
        }

        info!(
            id = %op.id,
            op_type = %op.op_type,
            policy = resolution.policy.as_str(),
            "Version conflict resolved, overwriting server state"
        );
        self.notifier.emit(QueueEvent::ConflictResolved {
            id: op.id.clone(),
            op_type: op.op_type,
        });
        self.notifier.notify(self.resolver.notification(op));
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<QueuedOperation>> {
        self.store()?.get_operation(id)
    }

    fn set_status(&self, op: &mut QueuedOperation, to: OperationStatus) -> Result<()> {
        let from = op.transition(to)?;
        self.store()?
            .put_operation(op, EventType::StatusChanged, &self.actor)?;
        debug!(id = %op.id, %from, %to, "Status changed");
        self.notifier.emit(QueueEvent::StatusChanged {
            id: op.id.clone(),
            from,
            to,
        });
        Ok(())
    }

    fn publish_progress(&self, running: bool, total: usize, processed: usize, current: Option<&str>) {
        self.progress.send_replace(SyncProgress {
            running,
            total,
            processed,
            current: current.map(str::to_string),
        });
    }
}

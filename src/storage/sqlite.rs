//! SQLite storage implementation.
//!
//! This module provides the durable store for queued operations. It follows
//! the MutationContext pattern: every write runs inside one IMMEDIATE
//! transaction together with its audit events, so a record is either fully
//! written or not at all.

use crate::error::{Error, Result};
use crate::model::{OperationStatus, OperationType, QueuedOperation};
use crate::storage::events::{Event, EventType, insert_event};
use crate::storage::schema::apply_schema;
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::trace;

/// Entity type recorded in the audit log.
const ENTITY: &str = "operation";

/// How long a writer waits for another process holding the lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "id, op_type, payload, status, attempt_count, created_at, updated_at,
     completed_at, last_error, user_id, force_overwrite";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation, tracking side effects.
///
/// Passed to mutation closures to collect audit events that are written
/// in the same transaction.
pub struct MutationContext {
    /// Actor performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(actor: &str) -> Self {
        Self {
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(ENTITY, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(ENTITY, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }
}

/// Selection criteria for [`SqliteStorage::list_operations`].
///
/// Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    pub statuses: Vec<OperationStatus>,
    pub op_type: Option<OperationType>,
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

impl OperationFilter {
    /// Operations a sync pass should pick up.
    #[must_use]
    pub fn replayable() -> Self {
        Self {
            statuses: vec![OperationStatus::Pending, OperationStatus::Syncing],
            ..Self::default()
        }
    }

    /// Restrict to a single status.
    #[must_use]
    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.statuses = vec![status];
        self
    }

    /// Restrict to one operation type.
    #[must_use]
    pub fn with_type(mut self, op_type: OperationType) -> Self {
        self.op_type = Some(op_type);
        self
    }

    /// Restrict to one user.
    #[must_use]
    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Cap the number of rows returned.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Number of operations in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub syncing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    /// Pending plus syncing: what still has to reach the network.
    #[must_use]
    pub fn active(&self) -> usize {
        self.pending + self.syncing
    }

    /// Returns total number of records.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.completed + self.failed
    }
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.busy_timeout(BUSY_TIMEOUT)?;

        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// This method:
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits (or rolls back on error)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        trace!(op, events = ctx.events.len(), "Mutation committed");

        Ok(result)
    }

    // ======================
    // Operation Records
    // ======================

    /// Store an operation, overwriting any existing record with the same id.
    ///
    /// The insertion sequence of an existing record is preserved, so an
    /// overwrite never moves the operation in replay order.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or the write fails.
    pub fn put_operation(
        &mut self,
        op: &QueuedOperation,
        event: EventType,
        actor: &str,
    ) -> Result<()> {
        self.mutate("put_operation", actor, |tx, ctx| write_operation(tx, ctx, op, event))
    }

    /// Store an operation together with an extra audit event, in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or the write fails.
    pub fn put_operation_with_event(
        &mut self,
        op: &QueuedOperation,
        event: EventType,
        audit: Event,
        actor: &str,
    ) -> Result<()> {
        self.mutate("put_operation_with_event", actor, |tx, ctx| {
            write_operation(tx, ctx, op, event)?;
            ctx.events.push(audit);
            Ok(())
        })
    }

    /// Get an operation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_operation(&self, id: &str) -> Result<Option<QueuedOperation>> {
        let op = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM queued_operations WHERE id = ?1"),
                [id],
                map_operation_row,
            )
            .optional()?;
        Ok(op)
    }

    /// List operations oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_operations(&self, filter: &OperationFilter) -> Result<Vec<QueuedOperation>> {
        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.statuses.is_empty() {
            let placeholders: Vec<String> = filter
                .statuses
                .iter()
                .map(|s| {
                    params.push(Box::new(s.as_str()));
                    format!("?{}", params.len())
                })
                .collect();
            clauses.push(format!("status IN ({})", placeholders.join(", ")));
        }
        if let Some(op_type) = filter.op_type {
            params.push(Box::new(op_type.as_str()));
            clauses.push(format!("op_type = ?{}", params.len()));
        }
        if let Some(ref user_id) = filter.user_id {
            params.push(Box::new(user_id.clone()));
            clauses.push(format!("user_id = ?{}", params.len()));
        }

        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM queued_operations");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, seq ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let ops = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), map_operation_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ops)
    }

    /// Delete an operation.
    ///
    /// Returns `true` if a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_operation(&mut self, id: &str, event: EventType, actor: &str) -> Result<bool> {
        self.mutate("delete_operation", actor, |tx, ctx| {
            let removed = tx.execute("DELETE FROM queued_operations WHERE id = ?1", [id])?;
            if removed > 0 {
                ctx.record_event(id, event);
            }
            Ok(removed > 0)
        })
    }

    /// Number of pending and syncing operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_active(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM queued_operations WHERE status IN ('pending', 'syncing')",
            [],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|e| Error::Other(e.to_string()))
    }

    /// Number of operations in each status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_by_status(&self) -> Result<StatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM queued_operations GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            let count = usize::try_from(count).unwrap_or_default();
            match OperationStatus::from_str(&status) {
                OperationStatus::Pending => counts.pending += count,
                OperationStatus::Syncing => counts.syncing += count,
                OperationStatus::Completed => counts.completed += count,
                OperationStatus::Failed => counts.failed += count,
            }
        }
        Ok(counts)
    }

    /// Delete completed operations that finished at or before `cutoff_ms`.
    ///
    /// Returns the ids that were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_completed_before(&mut self, cutoff_ms: i64, actor: &str) -> Result<Vec<String>> {
        self.mutate("purge_completed", actor, |tx, ctx| {
            let ids: Vec<String> = tx
                .prepare(
                    "SELECT id FROM queued_operations
                     WHERE status = 'completed' AND completed_at IS NOT NULL AND completed_at <= ?1",
                )?
                .query_map([cutoff_ms], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;

            for id in &ids {
                tx.execute("DELETE FROM queued_operations WHERE id = ?1", [id])?;
                ctx.record_event(id, EventType::OperationPurged);
            }
            Ok(ids)
        })
    }
}

/// Upsert one operation row and queue its audit event on `ctx`.
fn write_operation(
    tx: &Transaction,
    ctx: &mut MutationContext,
    op: &QueuedOperation,
    event: EventType,
) -> Result<()> {
    let payload = serde_json::to_string(&op.payload)?;
    let previous: Option<String> = tx
        .query_row(
            "SELECT status FROM queued_operations WHERE id = ?1",
            [&op.id],
            |row| row.get(0),
        )
        .optional()?;

    tx.execute(
        "INSERT INTO queued_operations (id, op_type, payload, status, attempt_count, created_at, updated_at, completed_at, last_error, user_id, force_overwrite)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            op_type = excluded.op_type,
            payload = excluded.payload,
            status = excluded.status,
            attempt_count = excluded.attempt_count,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            completed_at = excluded.completed_at,
            last_error = excluded.last_error,
            user_id = excluded.user_id,
            force_overwrite = excluded.force_overwrite",
        rusqlite::params![
            op.id,
            op.op_type.as_str(),
            payload,
            op.status.as_str(),
            op.attempt_count,
            op.created_at,
            op.updated_at,
            op.completed_at,
            op.last_error,
            op.user_id,
            op.force_overwrite,
        ],
    )?;

    ctx.record_change(
        &op.id,
        event,
        previous,
        Some(op.status.as_str().to_string()),
    );
    Ok(())
}

// Helper to map operation rows
fn map_operation_row(row: &rusqlite::Row) -> rusqlite::Result<QueuedOperation> {
    let type_str: String = row.get(1)?;
    let op_type = OperationType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown operation type: {type_str}").into(),
        )
    })?;
    let payload_str: String = row.get(2)?;
    let payload = serde_json::from_str(&payload_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status_str: String = row.get(3)?;

    Ok(QueuedOperation {
        id: row.get(0)?,
        op_type,
        payload,
        status: OperationStatus::from_str(&status_str),
        attempt_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        completed_at: row.get(7)?,
        last_error: row.get(8)?,
        user_id: row.get(9)?,
        force_overwrite: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::events::get_events;
    use serde_json::json;

    fn enqueue(storage: &mut SqliteStorage, op_type: OperationType) -> QueuedOperation {
        let op = QueuedOperation::new(op_type, json!({"n": 1}));
        storage
            .put_operation(&op, EventType::OperationEnqueued, "test-actor")
            .unwrap();
        op
    }

    #[test]
    fn test_open_memory() {
        let storage = SqliteStorage::open_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");
        let storage = SqliteStorage::open(&path);
        assert!(storage.is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_put_and_get() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let op = QueuedOperation::new(OperationType::ContentCreate, json!({"title": "X"}))
            .with_user("agent-7");
        storage
            .put_operation(&op, EventType::OperationEnqueued, "test-actor")
            .unwrap();

        let stored = storage.get_operation(&op.id).unwrap().unwrap();
        assert_eq!(stored, op);
        assert!(storage.get_operation("op_missing").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites_by_id() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut op = enqueue(&mut storage, OperationType::CheckIn);

        op.transition(OperationStatus::Syncing).unwrap();
        op.attempt_count = 2;
        storage
            .put_operation(&op, EventType::StatusChanged, "test-actor")
            .unwrap();

        let stored = storage.get_operation(&op.id).unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Syncing);
        assert_eq!(stored.attempt_count, 2);
        assert_eq!(storage.list_operations(&OperationFilter::default()).unwrap().len(), 1);

        let events = get_events(storage.conn(), "operation", &op.id, None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].old_value.as_deref(), Some("pending"));
        assert_eq!(events[1].new_value.as_deref(), Some("syncing"));
    }

    #[test]
    fn test_list_is_fifo_even_with_equal_timestamps() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let mut op = QueuedOperation::new(OperationType::TextCapture, json!({}));
            op.created_at = 1_000;
            storage
                .put_operation(&op, EventType::OperationEnqueued, "test-actor")
                .unwrap();
            ids.push(op.id);
        }

        let listed: Vec<String> = storage
            .list_operations(&OperationFilter::default())
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_list_orders_by_created_at() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut late = QueuedOperation::new(OperationType::QuickAction, json!({}));
        late.created_at = 2_000;
        let mut early = QueuedOperation::new(OperationType::QuickAction, json!({}));
        early.created_at = 1_000;
        storage.put_operation(&late, EventType::OperationEnqueued, "t").unwrap();
        storage.put_operation(&early, EventType::OperationEnqueued, "t").unwrap();

        let listed = storage.list_operations(&OperationFilter::default()).unwrap();
        assert_eq!(listed[0].id, early.id);
        assert_eq!(listed[1].id, late.id);
    }

    #[test]
    fn test_list_filters() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let a = enqueue(&mut storage, OperationType::PhotoCapture);
        let mut b = QueuedOperation::new(OperationType::VoiceNote, json!({})).with_user("u1");
        b.status = OperationStatus::Failed;
        storage.put_operation(&b, EventType::OperationEnqueued, "t").unwrap();

        let pending = storage
            .list_operations(&OperationFilter::default().with_status(OperationStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);

        let voice = storage
            .list_operations(&OperationFilter::default().with_type(OperationType::VoiceNote))
            .unwrap();
        assert_eq!(voice.len(), 1);

        let by_user = storage
            .list_operations(&OperationFilter::default().with_user("u1"))
            .unwrap();
        assert_eq!(by_user[0].id, b.id);

        let limited = storage
            .list_operations(&OperationFilter::default().with_limit(1))
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_count_active_ignores_terminal() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        enqueue(&mut storage, OperationType::CheckIn);
        let mut syncing = enqueue(&mut storage, OperationType::CheckIn);
        syncing.status = OperationStatus::Syncing;
        storage.put_operation(&syncing, EventType::StatusChanged, "t").unwrap();
        let mut failed = enqueue(&mut storage, OperationType::CheckIn);
        failed.status = OperationStatus::Failed;
        storage.put_operation(&failed, EventType::StatusChanged, "t").unwrap();

        assert_eq!(storage.count_active().unwrap(), 2);
        let counts = storage.count_by_status().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.syncing, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_delete_operation() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let op = enqueue(&mut storage, OperationType::ContentDelete);

        assert!(storage
            .delete_operation(&op.id, EventType::OperationCancelled, "t")
            .unwrap());
        assert!(!storage
            .delete_operation(&op.id, EventType::OperationCancelled, "t")
            .unwrap());
        assert!(storage.get_operation(&op.id).unwrap().is_none());
    }

    #[test]
    fn test_purge_completed_before_cutoff() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut old = enqueue(&mut storage, OperationType::CheckIn);
        old.status = OperationStatus::Completed;
        old.completed_at = Some(1_000);
        storage.put_operation(&old, EventType::StatusChanged, "t").unwrap();

        let mut fresh = enqueue(&mut storage, OperationType::CheckIn);
        fresh.status = OperationStatus::Completed;
        fresh.completed_at = Some(9_000);
        storage.put_operation(&fresh, EventType::StatusChanged, "t").unwrap();

        let pending = enqueue(&mut storage, OperationType::CheckIn);

        let purged = storage.purge_completed_before(5_000, "t").unwrap();
        assert_eq!(purged, vec![old.id.clone()]);
        assert!(storage.get_operation(&old.id).unwrap().is_none());
        assert!(storage.get_operation(&fresh.id).unwrap().is_some());
        assert!(storage.get_operation(&pending.id).unwrap().is_some());
    }

    #[test]
    fn test_put_with_event_writes_row_and_audit_together() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut op = enqueue(&mut storage, OperationType::ContentUpdate);
        op.force_overwrite = true;

        let audit = Event::new(ENTITY, &op.id, EventType::ConflictResolved, "t")
            .with_values(Some("remote".into()), Some("local".into()))
            .with_comment("last-write-wins");
        storage
            .put_operation_with_event(&op, EventType::OperationUpdated, audit, "t")
            .unwrap();

        assert!(storage.get_operation(&op.id).unwrap().unwrap().force_overwrite);
        let kinds: Vec<EventType> = get_events(storage.conn(), ENTITY, &op.id, None)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventType::OperationEnqueued,
                EventType::OperationUpdated,
                EventType::ConflictResolved,
            ]
        );
    }

    #[test]
    fn test_put_with_event_rolls_back_on_bad_audit() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut op = enqueue(&mut storage, OperationType::ContentUpdate);
        op.force_overwrite = true;

        storage
            .conn()
            .execute_batch("DROP TABLE events")
            .unwrap();
        let audit = Event::new(ENTITY, &op.id, EventType::ConflictResolved, "t");
        assert!(storage
            .put_operation_with_event(&op, EventType::OperationUpdated, audit, "t")
            .is_err());

        assert!(!storage.get_operation(&op.id).unwrap().unwrap().force_overwrite);
    }

    #[test]
    fn test_failed_write_leaves_no_partial_record() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let result: Result<()> = storage.mutate("broken", "t", |tx, _ctx| {
            tx.execute(
                "INSERT INTO queued_operations (id, op_type, payload, created_at, updated_at)
                 VALUES ('op_half', 'check-in', '{}', 0, 0)",
                [],
            )?;
            Err(Error::Other("boom".into()))
        });
        assert!(result.is_err());
        assert!(storage.get_operation("op_half").unwrap().is_none());
    }
}

//! Executor trait and per-type registry.
//!
//! An executor performs the network effect of one operation type, the same
//! call the action would have made online. Executors use async methods, so
//! the registry stores them behind an object-safe boxed wrapper.

use crate::error::{Error, Result};
use crate::model::{OperationType, QueuedOperation};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// What an executor receives for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRequest {
    pub operation_id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub payload: Value,
    /// When the operation was originally attempted (Unix milliseconds).
    /// Last-write-wins conflicts are decided on this timestamp.
    pub queued_at: i64,
    /// Overwrite server state unconditionally.
    pub force: bool,
}

impl ExecutionRequest {
    #[must_use]
    pub fn from_operation(op: &QueuedOperation) -> Self {
        Self {
            operation_id: op.id.clone(),
            op_type: op.op_type,
            payload: op.payload.clone(),
            queued_at: op.created_at,
            force: op.force_overwrite,
        }
    }

    /// The same request, reissued as a forced overwrite.
    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Why an executor attempt did not succeed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The server-side resource changed since the operation was queued.
    #[error("version conflict")]
    Conflict { server_state: Option<Value> },

    /// The payload was rejected before any network effect took place.
    #[error("payload rejected: {0}")]
    Validation(String),
}

impl ExecutorError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Convert into the crate error surfaced to callers.
    #[must_use]
    pub fn into_error(self, operation_id: &str) -> Error {
        match self {
            Self::Network(msg) => Error::NetworkFailure(msg),
            Self::Timeout(_) => Error::NetworkFailure(self.to_string()),
            Self::Conflict { .. } => Error::ConflictDetected {
                id: operation_id.to_string(),
            },
            Self::Validation(msg) => Error::ValidationFailure(msg),
        }
    }
}

pub type ExecutionResult = std::result::Result<Value, ExecutorError>;

/// Trait for operation executors.
///
/// Implementations must be safe to call again for the same operation id:
/// the queue never invokes an id twice concurrently, but a success whose
/// response was lost will be replayed.
pub trait Executor: Send + Sync {
    /// Perform the network effect for one operation.
    fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> impl Future<Output = ExecutionResult> + Send;
}

/// Object-safe version of [`Executor`] for boxing.
trait ExecutorBoxed: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = ExecutionResult> + Send + 'a>>;
}

/// Wrapper to implement `ExecutorBoxed` for any `Executor`.
struct BoxedExecutorWrapper<E: Executor + 'static>(E);

impl<E: Executor + 'static> ExecutorBoxed for BoxedExecutorWrapper<E> {
    fn execute_boxed<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = ExecutionResult> + Send + 'a>> {
        Box::pin(self.0.execute(request))
    }
}

/// Shared executor for dynamic dispatch. Cheap to clone.
#[derive(Clone)]
pub struct BoxedExecutor {
    inner: Arc<dyn ExecutorBoxed>,
}

impl BoxedExecutor {
    pub fn new<E: Executor + 'static>(executor: E) -> Self {
        Self {
            inner: Arc::new(BoxedExecutorWrapper(executor)),
        }
    }

    /// Run one attempt.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.inner.execute_boxed(request).await
    }
}

impl fmt::Debug for BoxedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedExecutor").finish_non_exhaustive()
    }
}

/// Maps each operation type to its executor.
///
/// A registry obtained from [`RegistryBuilder::build`] covers every type.
/// `ExecutorRegistry::default()` is empty and only suits a queue that is
/// never synced (listing, enqueueing, cancelling).
#[derive(Debug, Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<OperationType, BoxedExecutor>,
}

impl ExecutorRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[must_use]
    pub fn get(&self, op_type: OperationType) -> Option<&BoxedExecutor> {
        self.executors.get(&op_type)
    }

    /// Types without an executor, in declaration order.
    #[must_use]
    pub fn missing(&self) -> Vec<OperationType> {
        OperationType::ALL
            .into_iter()
            .filter(|t| !self.executors.contains_key(t))
            .collect()
    }

    /// # Errors
    ///
    /// Returns `IncompleteRegistry` naming every type without an executor.
    pub fn ensure_complete(&self) -> Result<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::IncompleteRegistry {
                missing: missing.iter().map(ToString::to_string).collect(),
            })
        }
    }
}

/// Collects executor registrations and checks them for completeness.
#[derive(Default)]
pub struct RegistryBuilder {
    executors: HashMap<OperationType, BoxedExecutor>,
}

impl RegistryBuilder {
    /// Register an executor for one type, replacing any earlier one.
    #[must_use]
    pub fn register<E: Executor + 'static>(mut self, op_type: OperationType, executor: E) -> Self {
        self.executors.insert(op_type, BoxedExecutor::new(executor));
        self
    }

    /// Register one executor for several types.
    #[must_use]
    pub fn register_many<E: Executor + 'static>(
        mut self,
        op_types: &[OperationType],
        executor: E,
    ) -> Self {
        let shared = BoxedExecutor::new(executor);
        for op_type in op_types {
            self.executors.insert(*op_type, shared.clone());
        }
        self
    }

    /// Register one executor for every type.
    #[must_use]
    pub fn register_all<E: Executor + 'static>(self, executor: E) -> Self {
        self.register_many(&OperationType::ALL, executor)
    }

    /// Finish registration.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteRegistry` if any operation type has no executor.
    pub fn build(self) -> Result<ExecutorRegistry> {
        let registry = ExecutorRegistry {
            executors: self.executors,
        };
        registry.ensure_complete()?;
        Ok(registry)
    }
}

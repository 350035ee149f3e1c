//! oq - durable offline operation queue
//!
//! User actions that need the network are persisted locally while the
//! device is offline and replayed, oldest first, once connectivity returns.
//!
//! # Architecture
//!
//! - [`queue`] - Queue service, executors, retry and conflict resolution
//! - [`connectivity`] - Connection state machine, monitor and probe
//! - [`storage`] - SQLite database layer
//! - [`model`] - Data types (QueuedOperation, OperationType, OperationStatus)
//! - [`status`] - Snapshots and progress for status indicators
//! - [`notify`] - Event bus and user-facing notifications
//! - [`runtime`] - Process-wide queue instance
//! - [`config`] - Configuration management
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod model;
pub mod notify;
pub mod queue;
pub mod runtime;
pub mod status;
pub mod storage;
pub mod validate;

pub use error::{Error, Result};
pub use model::{OperationStatus, OperationType, QueuedOperation};
pub use queue::{Executor, ExecutorRegistry, QueueService};

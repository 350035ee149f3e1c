//! Data models for the offline queue.
//!
//! - QueuedOperation
//! - OperationType
//! - OperationStatus

pub mod operation;

pub use operation::{OperationStatus, OperationType, QueuedOperation};

//! SQLite storage layer for the offline queue.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode so status reads never block a sync write
//! - Transaction discipline for atomic per-record writes
//! - Audit events for history
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod events;
pub mod schema;
pub mod sqlite;

pub use sqlite::{MutationContext, OperationFilter, SqliteStorage, StatusCounts};

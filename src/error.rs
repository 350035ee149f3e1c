//! Error types for the offline queue.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=storage, 3=not_found, 4=validation, 6=sync, etc.)
//! - Retryability flags
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Storage (exit 2)
    StorageUnavailable,
    DatabaseError,

    // Not Found (exit 3)
    OperationNotFound,

    // Validation (exit 4)
    InvalidTransition,
    OperationInFlight,
    InvalidArgument,
    ValidationFailure,

    // Sync (exit 6)
    NetworkFailure,
    ConflictDetected,
    PermanentFailure,

    // Config (exit 7)
    ConfigError,
    IncompleteRegistry,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::OperationNotFound => "OPERATION_NOT_FOUND",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::OperationInFlight => "OPERATION_IN_FLIGHT",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::ValidationFailure => "VALIDATION_FAILURE",
            Self::NetworkFailure => "NETWORK_FAILURE",
            Self::ConflictDetected => "CONFLICT_DETECTED",
            Self::PermanentFailure => "PERMANENT_FAILURE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IncompleteRegistry => "INCOMPLETE_REGISTRY",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::StorageUnavailable | Self::DatabaseError => 2,
            Self::OperationNotFound => 3,
            Self::InvalidTransition
            | Self::OperationInFlight
            | Self::InvalidArgument
            | Self::ValidationFailure => 4,
            Self::NetworkFailure | Self::ConflictDetected | Self::PermanentFailure => 6,
            Self::ConfigError | Self::IncompleteRegistry => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the caller can expect a later attempt to succeed.
    ///
    /// Network failures clear up on their own; a permanently failed
    /// operation can be retried by hand. Validation errors cannot.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure
                | Self::PermanentFailure
                | Self::OperationInFlight
                | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in queue operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Offline storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    #[error("Operation not found: {id}")]
    OperationNotFound { id: String },

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Operation {id} is currently syncing")]
    OperationInFlight { id: String },

    #[error("No executor registered for: {}", missing.join(", "))]
    IncompleteRegistry { missing: Vec<String> },

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Conflict persisted after forced overwrite of {id}")]
    ConflictDetected { id: String },

    #[error("Operation {id} failed after {attempts} attempts: {last_error}")]
    PermanentFailure {
        id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Payload rejected: {0}")]
    ValidationFailure(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::StorageUnavailable { .. } => ErrorCode::StorageUnavailable,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::OperationNotFound { .. } => ErrorCode::OperationNotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::OperationInFlight { .. } => ErrorCode::OperationInFlight,
            Self::IncompleteRegistry { .. } => ErrorCode::IncompleteRegistry,
            Self::NetworkFailure(_) => ErrorCode::NetworkFailure,
            Self::ConflictDetected { .. } => ErrorCode::ConflictDetected,
            Self::PermanentFailure { .. } => ErrorCode::PermanentFailure,
            Self::ValidationFailure(_) => ErrorCode::ValidationFailure,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::StorageUnavailable { .. } => Some(
                "Queuing is disabled until the database can be opened. \
                 Check the path passed with --db or OQ_DB."
                    .to_string(),
            ),

            Self::OperationNotFound { id } => Some(format!(
                "No operation with ID '{id}'. Completed operations are purged \
                 shortly after syncing. Use `oq list` to see queued operations."
            )),

            Self::OperationInFlight { id } => Some(format!(
                "Wait for the current sync to finish, then run `oq show {id}`."
            )),

            Self::PermanentFailure { id, .. } => {
                Some(format!("Retry it with: oq retry {id}"))
            }

            Self::IncompleteRegistry { .. } => Some(
                "Every operation type needs an executor. Register the missing types \
                 or use HttpExecutor for all of them."
                    .to_string(),
            ),

            Self::NetworkFailure(_) => Some(
                "The operation stays queued and will be retried on the next sync."
                    .to_string(),
            ),

            Self::Config(_) => Some("Check ~/.oq/config.json for syntax errors.".to_string()),

            Self::InvalidArgument(msg) => {
                if msg.contains("status") {
                    Some(
                        "Valid statuses: pending, syncing, completed, failed. \
                         Synonyms: queued→pending, done→completed, error→failed"
                            .to_string(),
                    )
                } else if msg.contains("type") {
                    Some(
                        "Valid types: photo-capture, voice-capture, text-capture, quick-action, \
                         voice-note, property-share, check-in, content-create, content-update, \
                         content-delete"
                            .to_string(),
                    )
                } else {
                    None
                }
            }

            Self::InvalidTransition { .. }
            | Self::ConflictDetected { .. }
            | Self::ValidationFailure(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

//! Configuration management.
//!
//! Resolves the queue database path and loads queue settings from
//! `~/.oq/config.json`, with environment overrides for the network
//! endpoints.
//!
//! # Layout
//!
//! - **Database**: `~/.oq/data/queue.db` (or `--db` / `OQ_DB`)
//! - **Settings**: `~/.oq/config.json`
//! - **Test database**: `~/.oq/test/queue.db` when `OQ_TEST_DB` is set

mod settings;

pub use settings::QueueSettings;

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the global oq directory location.
#[must_use]
pub fn global_oq_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".oq"))
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `OQ_TEST_DB=1` (or any non-empty value).
/// This redirects all database operations to an isolated test database.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("OQ_TEST_DB")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided (`--db` or `OQ_DB`), use it directly
/// 2. `OQ_TEST_DB` environment variable → isolated test database
/// 3. Global location: `~/.oq/data/queue.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return global_oq_dir().map(|dir| dir.join("test").join("queue.db"));
    }

    global_oq_dir().map(|dir| dir.join("data").join("queue.db"))
}

/// Get the config file path.
fn config_path() -> Result<PathBuf> {
    global_oq_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or(Error::Config("Could not determine home directory".into()))
}

/// Load queue settings from the config file, then apply environment overrides.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_settings() -> Result<QueueSettings> {
    let path = config_path()?;
    let settings = load_settings_from(&path)?;
    Ok(settings.with_env_overrides())
}

/// Load queue settings from an explicit file.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_settings_from(path: &Path) -> Result<QueueSettings> {
    if !path.exists() {
        return Ok(QueueSettings::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Default actor name for the audit trail.
#[must_use]
pub fn default_actor() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "oq".to_string())
}

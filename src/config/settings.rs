//! Queue settings stored in `~/.oq/config.json`.

use crate::connectivity::{EffectiveType, SyncPolicy};
use crate::queue::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the queue, the retry loop and the connectivity monitor.
///
/// Every field is optional in the file; missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Attempts before an operation is marked failed.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Budget for one executor call.
    pub attempt_timeout_ms: u64,
    /// How long a completed operation stays visible before it is purged.
    pub completed_grace_ms: u64,
    /// Queue depth above which a warning is raised.
    pub queue_warning_threshold: usize,
    pub debounce_ms: u64,
    pub sample_interval_ms: u64,
    pub suppress_on_metered: bool,
    /// Whether the current connection is metered. There is no portable way
    /// to detect this, so it is configured.
    pub metered: bool,
    pub min_effective_type: EffectiveType,
    /// Base URL executors post operations to.
    pub endpoint: Option<String>,
    /// URL probed to detect connectivity.
    pub health_url: Option<String>,
    pub auth_token: Option<String>,
    pub user_id: Option<String>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            attempt_timeout_ms: 30_000,
            completed_grace_ms: 5_000,
            queue_warning_threshold: 100,
            debounce_ms: 1_000,
            sample_interval_ms: 30_000,
            suppress_on_metered: false,
            metered: false,
            min_effective_type: EffectiveType::Slow2g,
            endpoint: None,
            health_url: None,
            auth_token: None,
            user_id: None,
        }
    }
}

impl QueueSettings {
    /// Apply `OQ_ENDPOINT`, `OQ_HEALTH_URL`, `OQ_AUTH_TOKEN` and `OQ_USER`.
    ///
    /// Priority: env var > config > default.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = env("OQ_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(url) = env("OQ_HEALTH_URL") {
            self.health_url = Some(url);
        }
        if let Some(token) = env("OQ_AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
        if let Some(user) = env("OQ_USER") {
            self.user_id = Some(user);
        }
        self
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    #[must_use]
    pub fn completed_grace(&self) -> Duration {
        Duration::from_millis(self.completed_grace_ms)
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Retry policy derived from the backoff settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }

    /// Auto-sync policy for the connectivity monitor.
    #[must_use]
    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            suppress_on_metered: self.suppress_on_metered,
            min_effective_type: self.min_effective_type,
        }
    }

    /// Settings with no waiting anywhere, for tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            debounce_ms: 0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = QueueSettings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.attempt_timeout(), Duration::from_secs(30));
        assert_eq!(settings.completed_grace(), Duration::from_secs(5));
        assert_eq!(settings.queue_warning_threshold, 100);
    }

    #[test]
    fn test_retry_policy_never_zero_attempts() {
        let settings = QueueSettings {
            max_retries: 0,
            ..QueueSettings::default()
        };
        assert_eq!(settings.retry_policy().max_attempts, 1);
    }

    #[test]
    fn test_round_trips_through_json() {
        let settings = QueueSettings {
            endpoint: Some("https://api.example.com".into()),
            min_effective_type: EffectiveType::ThreeG,
            ..QueueSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"3g\""));
        let back: QueueSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}

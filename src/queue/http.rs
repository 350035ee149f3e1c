//! HTTP executor.
//!
//! Posts each operation to `{endpoint}/operations/{type}`. The operation id
//! doubles as the idempotency key, so a replay of a write whose response was
//! lost is recognized by the server.

use super::executor::{ExecutionRequest, ExecutionResult, Executor, ExecutorError};
use crate::config::QueueSettings;
use crate::error::{Error, Result};
use crate::model::OperationType;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Header carrying the operation id.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Executor backed by a JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

#[derive(Serialize)]
struct OperationBody<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    op_type: OperationType,
    payload: &'a Value,
    queued_at: i64,
    force: bool,
}

impl HttpExecutor {
    /// Create an executor for the given base URL.
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// Create from settings.
    ///
    /// # Errors
    ///
    /// Returns a config error if no endpoint is configured.
    pub fn from_settings(settings: &QueueSettings) -> Result<Self> {
        let endpoint = settings.endpoint.as_deref().ok_or_else(|| {
            Error::Config("No endpoint configured. Set OQ_ENDPOINT or \"endpoint\" in ~/.oq/config.json".into())
        })?;
        Ok(Self::new(endpoint).with_token(settings.auth_token.clone()))
    }

    #[must_use]
    pub fn url_for(&self, op_type: OperationType) -> String {
        format!("{}/operations/{}", self.endpoint, op_type)
    }
}

impl Executor for HttpExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let url = self.url_for(request.op_type);
        let body = OperationBody {
            id: &request.operation_id,
            op_type: request.op_type,
            payload: &request.payload,
            queued_at: request.queued_at,
            force: request.force,
        };

        let mut builder = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_HEADER, &request.operation_id)
            .json(&body);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        debug!(%url, id = %request.operation_id, force = request.force, "POST operation");

        let response = builder
            .send()
            .await
            .map_err(|e| ExecutorError::Network(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExecutorError::Network(e.to_string()))?;

        if status.is_success() {
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null));
        }

        Err(classify_status(status, &String::from_utf8_lossy(&bytes)))
    }
}

/// Map a non-success response onto the executor error taxonomy.
///
/// 409/412 are version conflicts, and their body is taken as the current
/// server state. 408, 429 and 5xx are transient. Any other status means the
/// server refused the payload.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> ExecutorError {
    match status.as_u16() {
        409 | 412 => ExecutorError::Conflict {
            server_state: serde_json::from_str(body).ok(),
        },
        408 | 429 => ExecutorError::Network(format!("server busy ({status})")),
        s if s >= 500 => ExecutorError::Network(format!("server error ({status})")),
        _ => {
            let detail = body.trim();
            if detail.is_empty() {
                ExecutorError::Validation(status.to_string())
            } else {
                ExecutorError::Validation(format!("{status}: {detail}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_strips_trailing_slash() {
        let exec = HttpExecutor::new("https://api.example.com/");
        assert_eq!(
            exec.url_for(OperationType::CheckIn),
            "https://api.example.com/operations/check-in"
        );
    }

    #[test]
    fn test_conflict_carries_server_state() {
        let err = classify_status(StatusCode::CONFLICT, r#"{"title":"server"}"#);
        assert_eq!(
            err,
            ExecutorError::Conflict {
                server_state: Some(json!({"title": "server"}))
            }
        );

        let err = classify_status(StatusCode::PRECONDITION_FAILED, "not json");
        assert_eq!(err, ExecutorError::Conflict { server_state: None });
    }

    #[test]
    fn test_transient_statuses() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(classify_status(status, "").is_transient(), "{status}");
        }
    }

    #[test]
    fn test_client_errors_are_validation() {
        let err = classify_status(StatusCode::UNPROCESSABLE_ENTITY, "title is required");
        assert!(matches!(err, ExecutorError::Validation(ref m) if m.contains("title is required")));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_settings_requires_endpoint() {
        let err = HttpExecutor::from_settings(&QueueSettings::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let settings = QueueSettings {
            endpoint: Some("https://api.example.com".into()),
            auth_token: Some("secret".into()),
            ..QueueSettings::default()
        };
        let exec = HttpExecutor::from_settings(&settings).unwrap();
        assert_eq!(exec.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_body_shape() {
        let payload = json!({"title": "X"});
        let body = OperationBody {
            id: "op_1",
            op_type: OperationType::ContentCreate,
            payload: &payload,
            queued_at: 42,
            force: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "content-create");
        assert_eq!(json["payload"]["title"], "X");
        assert_eq!(json["queued_at"], 42);
    }
}

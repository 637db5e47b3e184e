//! Authoritative store client.
//!
//! Every request is `{ type, action?, ...fields }`; every response is
//! classified into `ok | error | timeout | unspecified`. The transport sits
//! behind [`RemoteStore`] so the reconciliation layer can be driven by a
//! scripted store in tests.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{Result, StockError, Transient};
use crate::models::EntityKind;

/// Slack on top of the call timeout so reqwest never fires first.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the remote endpoint URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_endpoint_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RemoteRequest {
    /// Collection read, e.g. `{ type: "products" }`.
    pub fn read(kind: EntityKind) -> Self {
        Self {
            kind: kind.cache_key().to_string(),
            action: None,
            fields: Map::new(),
        }
    }

    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            action: None,
            fields: Map::new(),
        }
    }

    pub fn action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Ok,
    Error,
    Timeout,
    /// The body carried no status field (bare arrays from list reads).
    Unspecified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: RemoteStatus,
    pub message: Option<String>,
    pub body: Value,
}

impl RemoteResponse {
    pub fn from_body(body: Value) -> Self {
        let status = match body.get("status").and_then(Value::as_str) {
            Some(s) => match s.trim().to_ascii_lowercase().as_str() {
                "ok" => RemoteStatus::Ok,
                "timeout" => RemoteStatus::Timeout,
                _ => RemoteStatus::Error,
            },
            None if body.is_null() => RemoteStatus::Error,
            None => RemoteStatus::Unspecified,
        };
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            status,
            message,
            body,
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self {
            status: RemoteStatus::Timeout,
            message: Some(format!("API timeout after {} ms", after.as_millis())),
            body: Value::Null,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RemoteStatus::Error,
            message: Some(message.into()),
            body: Value::Null,
        }
    }

    /// Only an explicit `status: "ok"` confirms a write.
    pub fn is_ok(&self) -> bool {
        self.status == RemoteStatus::Ok
    }

    /// Classification of a non-ok outcome, `None` when the call succeeded.
    pub fn transient(&self, timeout: Duration) -> Option<Transient> {
        match self.status {
            RemoteStatus::Ok | RemoteStatus::Unspecified => None,
            RemoteStatus::Timeout => Some(Transient::Timeout(timeout.as_millis() as u64)),
            RemoteStatus::Error => Some(Transient::Remote(
                self.message
                    .clone()
                    .unwrap_or_else(|| "no response".to_string()),
            )),
        }
    }

    /// A top-level string field of the body (server-assigned ids etc).
    pub fn str_field(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| {
            self.body
                .get(*k)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Send one request and return the decoded JSON body. Transport-level
    /// failures come back as `Err(message)`.
    async fn call(&self, request: &RemoteRequest) -> std::result::Result<Value, String>;
}

/// Issue `request` with a hard deadline. Never hangs and never errors: a
/// missed deadline is its own `Timeout` outcome.
pub async fn call_with_timeout(
    remote: &dyn RemoteStore,
    request: &RemoteRequest,
    timeout: Duration,
) -> RemoteResponse {
    let start = Instant::now();
    let response = match tokio::time::timeout(timeout, remote.call(request)).await {
        Ok(Ok(body)) => RemoteResponse::from_body(body),
        Ok(Err(message)) => {
            if is_connectivity_error(&message) {
                debug!(request = %request.kind, error = %message, "remote unreachable");
            } else {
                warn!(request = %request.kind, error = %message, "remote call failed");
            }
            RemoteResponse::failed(message)
        }
        Err(_) => {
            debug!(
                request = %request.kind,
                timeout_ms = timeout.as_millis() as u64,
                "remote call timed out"
            );
            RemoteResponse::timed_out(timeout)
        }
    };
    trace!(
        request = %request.kind,
        action = request.action.as_deref().unwrap_or(""),
        status = ?response.status,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "remote call settled"
    );
    response
}

fn is_connectivity_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    lower.contains("cannot reach")
        || lower.contains("timed out")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("dns")
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach remote store at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid remote store URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Operator not authorized".to_string(),
        404 => "Remote store endpoint not found".to_string(),
        s if s >= 500 => format!("Remote store server error (HTTP {s})"),
        s => format!("Unexpected response from remote store (HTTP {s})"),
    }
}

/// JSON-over-HTTP store: every request is POSTed to a single endpoint.
pub struct HttpRemote {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRemote {
    pub fn new(endpoint: &str, api_key: Option<String>, call_timeout: Duration) -> Result<Self> {
        let endpoint = normalize_endpoint_url(endpoint);
        if endpoint.is_empty() {
            return Err(StockError::Config("remote endpoint URL is empty".into()));
        }
        let client = Client::builder()
            .timeout(call_timeout + CLIENT_TIMEOUT_SLACK)
            .build()
            .map_err(|e| StockError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn call(&self, request: &RemoteRequest) -> std::result::Result<Value, String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("X-Request-Id", &request_id)
            .json(&request.to_value());
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            req = req.header("X-API-Key", key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.endpoint, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|json| {
                    json.get("message")
                        .or_else(|| json.get("error"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| status_error(status));
            return Err(format!("{detail} (HTTP {})", status.as_u16()));
        }

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| format!("Invalid JSON from remote store: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRemote, Reply};
    use serde_json::json;

    #[test]
    fn test_normalize_endpoint_url() {
        assert_eq!(normalize_endpoint_url("store.example/exec/"), "https://store.example/exec");
        assert_eq!(normalize_endpoint_url("localhost:8080"), "http://localhost:8080");
        assert_eq!(normalize_endpoint_url(" https://x.example "), "https://x.example");
        assert_eq!(normalize_endpoint_url(""), "");
    }

    #[test]
    fn test_request_wire_shape() {
        let req = RemoteRequest::new("stockAdjust")
            .field("product_id", "P1")
            .field("delta", -2);
        assert_eq!(
            req.to_value(),
            json!({ "type": "stockAdjust", "product_id": "P1", "delta": -2 })
        );
        let read = RemoteRequest::read(EntityKind::Ledger).to_value();
        assert_eq!(read, json!({ "type": "stockLedger" }));
    }

    #[test]
    fn test_response_classification() {
        assert!(RemoteResponse::from_body(json!({ "status": "ok" })).is_ok());
        assert_eq!(
            RemoteResponse::from_body(json!({ "status": "OK" })).status,
            RemoteStatus::Ok
        );
        let err = RemoteResponse::from_body(json!({ "status": "error", "message": "nope" }));
        assert_eq!(err.status, RemoteStatus::Error);
        assert_eq!(err.message.as_deref(), Some("nope"));
        assert_eq!(
            RemoteResponse::from_body(json!([1, 2])).status,
            RemoteStatus::Unspecified
        );
        // A missing response is a rejection, never a confirmation.
        assert_eq!(RemoteResponse::from_body(Value::Null).status, RemoteStatus::Error);
        assert!(!RemoteResponse::from_body(json!([])).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_timeout_yields_timeout_outcome() {
        let remote = FakeRemote::new();
        remote.script("products", Reply::Hang);
        let resp = call_with_timeout(
            &remote,
            &RemoteRequest::read(EntityKind::Products),
            Duration::from_millis(8000),
        )
        .await;
        assert_eq!(resp.status, RemoteStatus::Timeout);
        assert_eq!(
            resp.transient(Duration::from_millis(8000)),
            Some(Transient::Timeout(8000))
        );
    }

    #[tokio::test]
    async fn test_call_with_timeout_maps_transport_error() {
        let remote = FakeRemote::new();
        remote.script("products", Reply::Fail("Cannot reach remote store".into()));
        let resp = call_with_timeout(
            &remote,
            &RemoteRequest::read(EntityKind::Products),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(resp.status, RemoteStatus::Error);
        assert!(matches!(resp.transient(Duration::from_secs(1)), Some(Transient::Remote(_))));
    }
}

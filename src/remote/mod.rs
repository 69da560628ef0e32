//! Client for the remote authoritative service.
//!
//! Snapshots come wrapped in the `{success, data}` envelope. A `data` array,
//! even an empty one, is authoritative; anything else is reported as an
//! invalid payload so the caller can tell "empty" from "unknown".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::RemoteError;
use crate::models::EntityType;

const MAX_LOG_BODY_CHARS: usize = 512;

/// Where remote snapshots come from.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Reachability check. Resolves to false on timeout or transport error.
    async fn probe(&self, timeout: Duration) -> bool;

    /// Full snapshot of one collection, optionally scoped to a caller identity.
    async fn fetch_collection(
        &self,
        entity: EntityType,
        identity: Option<&str>,
    ) -> Result<Vec<Value>, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// HTTP implementation of [`RemoteSource`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn probe(&self, timeout: Duration) -> bool {
        let request = self.client.get(self.url("/health")).send();

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(response)) => {
                let reachable = response.status().is_success();
                if !reachable {
                    tracing::debug!("Probe answered with status {}", response.status());
                }
                reachable
            }
            Ok(Err(e)) => {
                tracing::debug!("Probe failed: {}", e);
                false
            }
            Err(_) => {
                tracing::debug!("Probe timed out after {:?}", timeout);
                false
            }
        }
    }

    async fn fetch_collection(
        &self,
        entity: EntityType,
        identity: Option<&str>,
    ) -> Result<Vec<Value>, RemoteError> {
        let mut request = self.client.get(self.url(entity.collection_path()));
        if let Some(seller_id) = identity {
            request = request.query(&[("sellerId", seller_id)]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized {
                status: status.as_u16(),
                message: preview(&body),
            });
        }
        if !status.is_success() {
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: preview(&body),
            });
        }

        parse_snapshot(&body)
    }
}

/// Parse a snapshot body, rejecting anything that is not an authoritative list.
pub fn parse_snapshot(body: &str) -> Result<Vec<Value>, RemoteError> {
    let envelope: SnapshotEnvelope = serde_json::from_str(body)
        .map_err(|e| RemoteError::InvalidPayload(format!("malformed body: {}", e)))?;

    if envelope.success == Some(false) {
        let reason = envelope
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no error details".to_string());
        return Err(RemoteError::InvalidPayload(format!(
            "remote reported failure: {}",
            reason
        )));
    }

    match envelope.data {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Err(RemoteError::InvalidPayload(
            "snapshot has no data".to_string(),
        )),
        Some(other) => Err(RemoteError::InvalidPayload(format!(
            "expected a list, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn preview(body: &str) -> String {
    let mut text = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode},
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_snapshot_distinguishes_empty_from_missing() {
        assert_eq!(
            parse_snapshot(r#"{"success":true,"data":[]}"#).unwrap(),
            Vec::<Value>::new()
        );
        assert!(matches!(
            parse_snapshot(r#"{"success":true,"data":null}"#),
            Err(RemoteError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_snapshot(r#"{"success":true}"#),
            Err(RemoteError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_snapshot(r#"{"success":true,"data":{"id":"p1"}}"#),
            Err(RemoteError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_snapshot(r#"{"success":false,"data":[],"error":{"code":"X"}}"#),
            Err(RemoteError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_snapshot("<html>"),
            Err(RemoteError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_reachable() {
        let base = spawn(Router::new().route("/health", get(|| async { "OK" }))).await;
        let remote = HttpRemote::new(&base, None).unwrap();
        assert!(remote.probe(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_probe_times_out_to_unreachable() {
        let app = Router::new().route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "OK"
            }),
        );
        let base = spawn(app).await;
        let remote = HttpRemote::new(&base, None).unwrap();
        assert!(!remote.probe(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_probe_connection_refused_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let remote = HttpRemote::new(&format!("http://{}", addr), None).unwrap();
        assert!(!remote.probe(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_fetch_scopes_by_identity_and_sends_token() {
        let app = Router::new().route(
            "/api/customers",
            get(
                |Query(params): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    Json(json!({
                        "success": true,
                        "data": [{
                            "_id": "r1",
                            "name": "Asha",
                            "seller": params.get("sellerId"),
                            "auth": auth
                        }]
                    }))
                },
            ),
        );
        let base = spawn(app).await;
        let remote = HttpRemote::new(&format!("{}/", base), Some("tok-1".into())).unwrap();

        let items = remote
            .fetch_collection(EntityType::Customer, Some("seller-7"))
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["seller"], "seller-7");
        assert_eq!(items[0]["auth"], "Bearer tok-1");
    }

    #[tokio::test]
    async fn test_fetch_maps_auth_failures() {
        let app = Router::new().route(
            "/api/orders",
            get(|| async { (StatusCode::UNAUTHORIZED, "token expired") }),
        );
        let base = spawn(app).await;
        let remote = HttpRemote::new(&base, None).unwrap();

        match remote.fetch_collection(EntityType::Order, None).await {
            Err(RemoteError::Unauthorized { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "token expired");
            }
            other => panic!("expected unauthorized, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_maps_server_errors() {
        let app = Router::new().route(
            "/api/purchase-orders",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let base = spawn(app).await;
        let remote = HttpRemote::new(&base, None).unwrap();

        let err = remote
            .fetch_collection(EntityType::PurchaseOrder, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Api { status: 502, .. }));
    }
}

//! Authenticated request pipeline for the Etsy API v3
//!
//! Every call through [`ApiClient::request`] gets the same treatment:
//! a fixed minimum inter-request spacing, Bearer + API-key headers from
//! the token lifecycle manager (which may refresh as a side effect), body
//! encoding by kind, bounded sleep-and-retry on 429, and typed error
//! classification for everything else non-2xx.
//!
//! The throttle is cooperative, not a token bucket: it only delays this
//! call relative to the previous one on a monotonic clock. Server-reported
//! rate-limit headers are recorded as an advisory snapshot and never gate
//! outgoing requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use etsy_auth::TokenManager;

use crate::classify::classify_response;
use crate::error::{Error, Result};
use crate::form::FormData;
use crate::models::RateLimitSnapshot;

/// Application API base for all authenticated calls.
pub const API_BASE_URL: &str = "https://api.etsy.com/v3/application";

/// Minimum spacing between consecutive requests (safe under the 10/sec limit).
const MIN_REQUEST_SPACING: Duration = Duration::from_millis(500);

/// Total attempts per request when the server answers 429. A bounded loop,
/// not open-ended recursion: a server issuing endless 429s surfaces
/// [`Error::RateLimited`] instead of hanging forever.
const MAX_RATE_LIMIT_ATTEMPTS: u32 = 3;

/// Fallback sleep when a 429 carries no `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Request body, selected by precedence: JSON, else multipart, else form.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    /// Exact JSON serialization with `Content-Type: application/json`.
    Json(serde_json::Value),
    /// Custom form encoding (`key[]=` array expansion).
    Form(FormData),
    /// File upload. No explicit content-type override; the transport sets
    /// the multipart boundary.
    Multipart {
        field_name: String,
        file_name: String,
        bytes: Vec<u8>,
        /// Additional plain-text fields alongside the file part.
        fields: Vec<(String, String)>,
    },
}

/// API client carrying the shared HTTP transport, credentials, throttle
/// state, and the advisory rate-limit snapshot.
pub struct ApiClient {
    http: reqwest::Client,
    api_key: String,
    tokens: Arc<TokenManager>,
    base_url: String,
    last_request: Mutex<Option<Instant>>,
    rate_limit: Mutex<RateLimitSnapshot>,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            tokens,
            base_url: API_BASE_URL.to_string(),
            last_request: Mutex::new(None),
            rate_limit: Mutex::new(RateLimitSnapshot::default()),
        }
    }

    /// Point the client at a different API base. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Shared HTTP transport (connection pooling is an optimization, not
    /// a correctness requirement).
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Issue an authenticated request and parse the JSON response.
    ///
    /// A 2xx with an empty body yields `Value::Null` rather than a parse
    /// attempt. 429 is retried here; all other non-success statuses come
    /// back as typed errors.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        self.throttle().await;

        let url = format!("{}{}", self.base_url, path);
        debug!(%method, path, "api request");

        for attempt in 1..=MAX_RATE_LIMIT_ATTEMPTS {
            // Resolved per attempt: a Retry-After sleep can outlive the
            // token, and the manager may refresh underneath us.
            let access_token = self
                .tokens
                .access_token()
                .await?
                .ok_or_else(|| {
                    Error::NotAuthenticated("no access token stored; connect to Etsy first".into())
                })?;

            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&access_token)
                .header("x-api-key", &self.api_key);
            if !query.is_empty() {
                req = req.query(query);
            }

            req = match body.clone() {
                RequestBody::Empty => req,
                RequestBody::Json(value) => req.json(&value),
                RequestBody::Form(form) => req
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(form.encode()),
                RequestBody::Multipart {
                    field_name,
                    file_name,
                    bytes,
                    fields,
                } => {
                    let mut multipart = reqwest::multipart::Form::new().part(
                        field_name,
                        reqwest::multipart::Part::bytes(bytes).file_name(file_name),
                    );
                    for (key, value) in fields {
                        multipart = multipart.text(key, value);
                    }
                    req.multipart(multipart)
                }
            };

            let response = req.send().await.map_err(|e| {
                error!(%method, path, error = %e, "request failed");
                Error::Http(e.to_string())
            })?;

            self.record_rate_limits(response.headers()).await;

            let status = response.status();
            if status.as_u16() == 429 {
                if attempt == MAX_RATE_LIMIT_ATTEMPTS {
                    return Err(Error::RateLimited {
                        attempts: MAX_RATE_LIMIT_ATTEMPTS,
                    });
                }
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                warn!(retry_after, attempt, "rate limited, waiting before retry");
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            let text = response.text().await.map_err(|e| Error::Http(e.to_string()))?;

            if !status.is_success() {
                return Err(classify_response(status.as_u16(), &text));
            }

            if text.trim().is_empty() {
                return Ok(serde_json::Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| Error::Http(format!("invalid JSON response: {e}")));
        }
        unreachable!("retry loop always returns")
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value> {
        self.request(Method::GET, path, RequestBody::Empty, query).await
    }

    pub async fn post(&self, path: &str, body: RequestBody) -> Result<serde_json::Value> {
        self.request(Method::POST, path, body, &[]).await
    }

    pub async fn put(&self, path: &str, body: RequestBody) -> Result<serde_json::Value> {
        self.request(Method::PUT, path, body, &[]).await
    }

    pub async fn patch(&self, path: &str, body: RequestBody) -> Result<serde_json::Value> {
        self.request(Method::PATCH, path, body, &[]).await
    }

    pub async fn delete(&self, path: &str) -> Result<serde_json::Value> {
        self.request(Method::DELETE, path, RequestBody::Empty, &[]).await
    }

    /// Validate the API key against the public ping endpoint.
    ///
    /// Requires only the API-key header — works before any OAuth flow.
    pub async fn ping(&self) -> Result<serde_json::Value> {
        let url = format!("{}/openapi-ping", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(classify_response(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| Error::Http(format!("invalid JSON response: {e}")))
    }

    /// Three-step health check: API key via the public ping, stored-token
    /// presence, then an authenticated `/users/me` call. Never errors; the
    /// failure mode is part of the status.
    pub async fn test_connection(&self) -> crate::models::ConnectionStatus {
        use crate::models::ConnectionStatus;

        if let Err(e) = self.ping().await {
            return ConnectionStatus {
                success: false,
                message: format!("API key check failed: {e}"),
                api_key_valid: false,
                authenticated: false,
            };
        }

        if !self.tokens.is_authenticated().await {
            return ConnectionStatus {
                success: false,
                message: "API key valid, but not connected to Etsy yet".to_string(),
                api_key_valid: true,
                authenticated: false,
            };
        }

        match self.get("/users/me", &[]).await {
            Ok(user) => {
                let name = user
                    .get("login_name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("unknown user");
                ConnectionStatus {
                    success: true,
                    message: format!("Connected to Etsy as {name}"),
                    api_key_valid: true,
                    authenticated: true,
                }
            }
            Err(e) => ConnectionStatus {
                success: false,
                message: format!("Authenticated call failed: {e}"),
                api_key_valid: true,
                authenticated: false,
            },
        }
    }

    /// Last-observed rate-limit counters. Informational only.
    pub async fn rate_limit_status(&self) -> RateLimitSnapshot {
        *self.rate_limit.lock().await
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Enforce the fixed minimum spacing since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_SPACING {
                let wait = MIN_REQUEST_SPACING - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "throttling request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Opportunistically record rate-limit headers when present.
    async fn record_rate_limits(&self, headers: &HeaderMap) {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u32>().ok())
        };

        let mut snapshot = self.rate_limit.lock().await;
        if let Some(v) = parse("X-Limit-Per-Second") {
            snapshot.per_second_limit = Some(v);
        }
        if let Some(v) = parse("X-Remaining-This-Second") {
            snapshot.per_second_remaining = Some(v);
        }
        if let Some(v) = parse("X-Limit-Per-Day") {
            snapshot.daily_limit = Some(v);
        }
        if let Some(v) = parse("X-Remaining-Today") {
            snapshot.daily_remaining = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap as AxumHeaderMap, StatusCode};
    use axum::routing::{delete, get, post};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use etsy_auth::{CredentialStore, TokenResponse};

    async fn spawn_app(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Client with a long-lived stored token, pointed at a mock base URL.
    async fn authed_client(dir: &tempfile::TempDir, base_url: String) -> ApiClient {
        let store = Arc::new(CredentialStore::load(dir.path()).await.unwrap());
        let tokens = TokenManager::new(store, reqwest::Client::new());
        tokens
            .save_tokens(&TokenResponse {
                access_token: "at_test".into(),
                refresh_token: Some("rt_test".into()),
                expires_in: 3600,
            })
            .await
            .unwrap();
        ApiClient::new(reqwest::Client::new(), "test-api-key", Arc::new(tokens))
            .with_base_url(base_url)
    }

    #[tokio::test]
    async fn attaches_bearer_and_api_key_headers() {
        let app = Router::new().route(
            "/check",
            get(|headers: AxumHeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                let key = headers
                    .get("x-api-key")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if auth == "Bearer at_test" && key == "test-api-key" {
                    (StatusCode::OK, r#"{"ok":true}"#.to_string())
                } else {
                    (StatusCode::UNAUTHORIZED, r#"{"error":"bad headers"}"#.to_string())
                }
            }),
        );
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let client = authed_client(&dir, base).await;
        let body = client.get("/check", &[]).await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn unauthenticated_client_fails_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::load(dir.path()).await.unwrap());
        let tokens = Arc::new(TokenManager::new(store, reqwest::Client::new()));
        // Unroutable base: an attempted send would fail differently
        let client = ApiClient::new(reqwest::Client::new(), "key", tokens)
            .with_base_url("http://127.0.0.1:1");

        assert!(matches!(
            client.get("/shops/1", &[]).await,
            Err(Error::NotAuthenticated(_))
        ));
    }

    #[tokio::test]
    async fn rate_limited_response_sleeps_and_retries_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = hits.clone();
        let app = Router::new().route(
            "/limited",
            get(move || {
                let hits = hits_handler.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        let mut headers = AxumHeaderMap::new();
                        headers.insert("Retry-After", "2".parse().unwrap());
                        (StatusCode::TOO_MANY_REQUESTS, headers, String::new())
                    } else {
                        (
                            StatusCode::OK,
                            AxumHeaderMap::new(),
                            r#"{"recovered":true}"#.to_string(),
                        )
                    }
                }
            }),
        );
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let client = authed_client(&dir, base).await;

        let started = Instant::now();
        let body = client.get("/limited", &[]).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(body["recovered"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 2, "exactly two underlying calls");
        assert!(
            elapsed >= Duration::from_secs(2),
            "must honor Retry-After, only waited {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn retry_after_rate_limit_resolves_token_afresh() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = hits.clone();
        let app = Router::new().route(
            "/limited",
            get(move |headers: AxumHeaderMap| {
                let hits = hits_handler.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        let mut headers = AxumHeaderMap::new();
                        headers.insert("Retry-After", "2".parse().unwrap());
                        (StatusCode::TOO_MANY_REQUESTS, headers, String::new())
                    } else {
                        (
                            StatusCode::OK,
                            AxumHeaderMap::new(),
                            format!(r#"{{"auth":"{auth}"}}"#),
                        )
                    }
                }
            }),
        );
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::load(dir.path()).await.unwrap());
        let tokens = Arc::new(TokenManager::new(store, reqwest::Client::new()));
        tokens
            .save_tokens(&TokenResponse {
                access_token: "at_before".into(),
                refresh_token: Some("rt".into()),
                expires_in: 3600,
            })
            .await
            .unwrap();
        let client = ApiClient::new(reqwest::Client::new(), "test-api-key", tokens.clone())
            .with_base_url(base);

        let request = tokio::spawn(async move { client.get("/limited", &[]).await });

        // New token lands while the client is sleeping out Retry-After
        tokio::time::sleep(Duration::from_millis(500)).await;
        tokens
            .save_tokens(&TokenResponse {
                access_token: "at_after".into(),
                refresh_token: Some("rt".into()),
                expires_in: 3600,
            })
            .await
            .unwrap();

        let body = request.await.unwrap().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(
            body["auth"], "Bearer at_after",
            "retry must not reuse the pre-sleep token"
        );
    }

    #[tokio::test]
    async fn persistent_429_exhausts_bounded_retries() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = hits.clone();
        let app = Router::new().route(
            "/always-limited",
            get(move || {
                let hits = hits_handler.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let mut headers = AxumHeaderMap::new();
                    headers.insert("Retry-After", "1".parse().unwrap());
                    (StatusCode::TOO_MANY_REQUESTS, headers, String::new())
                }
            }),
        );
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let client = authed_client(&dir, base).await;

        match client.get("/always-limited", &[]).await {
            Err(Error::RateLimited { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_classified() {
        let app = Router::new().route(
            "/missing",
            get(|| async {
                (
                    StatusCode::NOT_FOUND,
                    r#"{"error":"Listing not found"}"#.to_string(),
                )
            }),
        );
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let client = authed_client(&dir, base).await;

        match client.get("/missing", &[]).await {
            Err(Error::NotFound(msg)) => assert_eq!(msg, "Listing not found"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_success_body_is_null_not_parse_error() {
        let app = Router::new().route("/gone", delete(|| async { (StatusCode::NO_CONTENT, String::new()) }));
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let client = authed_client(&dir, base).await;
        assert_eq!(client.delete("/gone").await.unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn form_body_uses_custom_array_encoding() {
        let app = Router::new().route(
            "/listings",
            post(|headers: AxumHeaderMap, body: String| async move {
                let content_type = headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if content_type == "application/x-www-form-urlencoded"
                    && body == "title=Mug&tags[]=a&tags[]=b"
                {
                    (StatusCode::OK, r#"{"ok":true}"#.to_string())
                } else {
                    (StatusCode::BAD_REQUEST, format!(r#"{{"error":"{body}"}}"#))
                }
            }),
        );
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let client = authed_client(&dir, base).await;

        let form = FormData::new().text("title", "Mug").list("tags", ["a", "b"]);
        let body = client.post("/listings", RequestBody::Form(form)).await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn consecutive_requests_are_spaced() {
        let app = Router::new().route("/fast", get(|| async { r#"{}"#.to_string() }));
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let client = authed_client(&dir, base).await;

        client.get("/fast", &[]).await.unwrap();
        let started = Instant::now();
        client.get("/fast", &[]).await.unwrap();
        assert!(
            started.elapsed() >= Duration::from_millis(400),
            "second request must wait out the spacing floor"
        );
    }

    #[tokio::test]
    async fn rate_limit_snapshot_updates_from_headers() {
        let app = Router::new().route(
            "/snapshot",
            get(|| async {
                let mut headers = AxumHeaderMap::new();
                headers.insert("X-Limit-Per-Second", "10".parse().unwrap());
                headers.insert("X-Remaining-This-Second", "7".parse().unwrap());
                headers.insert("X-Limit-Per-Day", "10000".parse().unwrap());
                headers.insert("X-Remaining-Today", "9876".parse().unwrap());
                (headers, r#"{}"#.to_string())
            }),
        );
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let client = authed_client(&dir, base).await;

        let before = client.rate_limit_status().await;
        assert_eq!(before.daily_remaining, None);

        client.get("/snapshot", &[]).await.unwrap();

        let after = client.rate_limit_status().await;
        assert_eq!(after.per_second_limit, Some(10));
        assert_eq!(after.per_second_remaining, Some(7));
        assert_eq!(after.daily_limit, Some(10000));
        assert_eq!(after.daily_remaining, Some(9876));
    }

    #[tokio::test]
    async fn test_connection_reports_missing_tokens() {
        let app = Router::new().route(
            "/openapi-ping",
            get(|| async { r#"{"application_id":123}"#.to_string() }),
        );
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::load(dir.path()).await.unwrap());
        let tokens = Arc::new(TokenManager::new(store, reqwest::Client::new()));
        let client =
            ApiClient::new(reqwest::Client::new(), "test-api-key", tokens).with_base_url(base);

        let status = client.test_connection().await;
        assert!(!status.success);
        assert!(status.api_key_valid);
        assert!(!status.authenticated);
    }

    #[tokio::test]
    async fn test_connection_succeeds_end_to_end() {
        let app = Router::new()
            .route(
                "/openapi-ping",
                get(|| async { r#"{"application_id":123}"#.to_string() }),
            )
            .route(
                "/users/me",
                get(|| async { r#"{"user_id":1,"login_name":"maker"}"#.to_string() }),
            );
        let base = spawn_app(app).await;

        let dir = tempfile::tempdir().unwrap();
        let client = authed_client(&dir, base).await;

        let status = client.test_connection().await;
        assert!(status.success);
        assert!(status.authenticated);
        assert!(status.message.contains("maker"));
    }

    #[tokio::test]
    async fn ping_needs_only_the_api_key() {
        let app = Router::new().route(
            "/openapi-ping",
            get(|headers: AxumHeaderMap| async move {
                // No Authorization header required or expected
                if headers.get("x-api-key").is_some() {
                    (StatusCode::OK, r#"{"application_id":123}"#.to_string())
                } else {
                    (StatusCode::UNAUTHORIZED, r#"{"error":"missing key"}"#.to_string())
                }
            }),
        );
        let base = spawn_app(app).await;

        // Note: no stored tokens at all
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::load(dir.path()).await.unwrap());
        let tokens = Arc::new(TokenManager::new(store, reqwest::Client::new()));
        let client =
            ApiClient::new(reqwest::Client::new(), "test-api-key", tokens).with_base_url(base);

        let body = client.ping().await.unwrap();
        assert_eq!(body["application_id"], 123);
    }
}

//! Authenticated HTTP client for the SmartThings REST API
//!
//! Wraps reqwest::Client with bearer token injection, retry with backoff on
//! network failures / 5xx / 429, and one refresh-and-reissue on 401.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde_json::Value;

use crate::auth::{AccessToken, TokenAuthority};
use crate::error::{Error, Result};
use crate::models::{
    Command, CommandRequest, Device, DevicePage, DeviceStatus, StatusResponse, MAIN_COMPONENT,
};

pub const DEFAULT_API_BASE: &str = "https://api.smartthings.com/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for a server-provided `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Retry budget for transient failures (network, 5xx, 429).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    /// Delay before the first retry; doubles for each further retry.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_number` (1-based).
    pub(crate) fn backoff(&self, retry_number: usize) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8) as u32;
        self.base_backoff.saturating_mul(1u32 << shift)
    }
}

/// SmartThings API client bound to one token authority (one account).
pub struct SmartThingsClient {
    http: reqwest::Client,
    base: String,
    auth: Arc<TokenAuthority>,
    retry: RetryPolicy,
}

impl SmartThingsClient {
    pub fn new(
        base: impl Into<String>,
        auth: Arc<TokenAuthority>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            auth,
            retry,
        })
    }

    /// Accepts either an API path (`/devices`) or an absolute URL (paging links).
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base, path)
        }
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Method::GET, &self.url(path), None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Response> {
        self.request(Method::POST, &self.url(path), Some(body)).await
    }

    /// One logical request: transient retries, then at most one
    /// refresh-and-reissue if the vendor answers 401.
    async fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response> {
        let (resp, token) = self.send_with_retry(&method, url, body).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check_response(resp, url).await;
        }

        tracing::info!("401 Unauthorized for {}, refreshing token and retrying once", url);
        self.auth.refresh_after(token.generation).await?;

        let (resp, _) = self.send_with_retry(&method, url, body).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                "{} still returns 401 after token refresh; re-authentication may be required",
                url
            );
            return Err(Error::AuthExpired);
        }
        check_response(resp, url).await
    }

    /// Send with retry on network failures, 5xx and 429. The bearer token is
    /// read per attempt so a refresh in between is picked up.
    async fn send_with_retry(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<(Response, AccessToken)> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let token = self.auth.access_token().await?;

            let mut builder = self
                .http
                .request(method.clone(), url)
                .bearer_auth(&token.secret);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            tracing::debug!("{} {} (attempt {}/{})", method, url, attempt, attempts);

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if !is_retryable_status(status) {
                        return Ok((resp, token));
                    }
                    if attempt >= attempts {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Error::TransientHttp {
                            attempts: attempt,
                            status: Some(status.as_u16()),
                            message: body,
                        });
                    }
                    let delay = retry_after(&resp)
                        .map_or(self.retry.backoff(attempt), |ra| {
                            ra.max(self.retry.backoff(attempt))
                        });
                    tracing::warn!(
                        "HTTP {} for {} {}, retrying in {:?}",
                        status.as_u16(),
                        method,
                        url,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt >= attempts {
                        return Err(Error::TransientHttp {
                            attempts: attempt,
                            status: None,
                            message: e.to_string(),
                        });
                    }
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!("{} {} failed: {}, retrying in {:?}", method, url, e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// All devices visible to the token, following `_links.next`.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let mut devices = Vec::new();
        let mut next = Some("/devices".to_string());

        while let Some(path) = next.take() {
            let page: DevicePage = self
                .get(&path)
                .await?
                .json()
                .await
                .map_err(|e| Error::Decode(format!("device list: {}", e)))?;
            next = page.next_href().map(String::from);
            devices.extend(page.items);
        }

        tracing::debug!("Fetched {} devices", devices.len());
        Ok(devices)
    }

    /// Status of the `main` component. Not cached; see `StatusCache`.
    pub async fn device_status(&self, device_id: &str) -> Result<DeviceStatus> {
        let mut response: StatusResponse = self
            .get(&format!("/devices/{}/status", device_id))
            .await?
            .json()
            .await
            .map_err(|e| Error::Decode(format!("status of {}: {}", device_id, e)))?;

        response
            .components
            .remove(MAIN_COMPONENT)
            .ok_or_else(|| Error::Decode(format!("status of {} has no main component", device_id)))
    }

    pub async fn send_commands(&self, device_id: &str, commands: &[Command]) -> Result<()> {
        let body = serde_json::to_value(CommandRequest { commands })
            .map_err(|e| Error::Decode(format!("command body: {}", e)))?;
        self.post(&format!("/devices/{}/commands", device_id), &body)
            .await?;
        tracing::info!("Command sent to {}: {}", device_id, body);
        Ok(())
    }

    /// GET a webhook confirmation URL delivered in a CONFIRMATION lifecycle
    /// event. The URL is pre-signed; no bearer token is attached.
    pub async fn confirm_webhook(&self, confirmation_url: &str) -> Result<()> {
        tracing::info!("Confirming webhook at {}", confirmation_url);
        let resp = self
            .http
            .get(confirmation_url)
            .send()
            .await
            .map_err(|e| Error::TransientHttp {
                attempts: 1,
                status: None,
                message: e.to_string(),
            })?;

        if resp.status() != StatusCode::OK {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!("Webhook confirmation failed with HTTP {}", status);
            return Err(Error::Http { status, body });
        }
        tracing::info!("Webhook confirmed");
        Ok(())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn retry_after(resp: &Response) -> Option<Duration> {
    let secs: u64 = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Map non-2xx responses to `Error::Http` carrying the vendor body.
async fn check_response(resp: Response, url: &str) -> Result<Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::debug!("HTTP {} for {}: {}", status.as_u16(), url, body);
        return Err(Error::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::oauth::tests::{authority_with, token_body};
    use crate::auth::TokenPair;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(10),
        }
    }

    pub(crate) fn valid_pair(access: &str) -> TokenPair {
        TokenPair::new(access.into(), "refresh-1".into(), 86_400)
    }

    /// Client whose API base and token endpoint both point at `server`.
    pub(crate) async fn client_for(
        server: &MockServer,
        dir: &tempfile::TempDir,
        pair: TokenPair,
    ) -> SmartThingsClient {
        let authority = authority_with(server, dir, pair).await;
        SmartThingsClient::new(
            server.uri(),
            Arc::new(authority),
            Duration::from_secs(5),
            fast_retry(),
        )
        .unwrap()
    }

    pub(crate) fn status_body(main: serde_json::Value) -> serde_json::Value {
        json!({"components": {"main": main}})
    }

    #[tokio::test]
    async fn test_bearer_token_attached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices/dev-1/status"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(json!({
                "switch": {"switch": {"value": "on"}}
            }))))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir, valid_pair("access-1")).await;

        let status = client.device_status("dev-1").await.unwrap();
        assert_eq!(status.str_value("switch", "switch"), Some("on"));
    }

    #[tokio::test]
    async fn test_retries_server_errors_until_success() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        Mock::given(method("GET"))
            .and(path("/devices"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({"items": []}))
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir, valid_pair("a")).await;

        assert!(client.list_devices().await.unwrap().is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir, valid_pair("a")).await;

        match client.device_status("dev-1").await {
            Err(Error::TransientHttp {
                attempts,
                status,
                message,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(status, Some(429));
                assert_eq!(message, "slow down");
            }
            other => panic!("expected TransientHttp, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "NotFoundError", "message": "device not found"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir, valid_pair("a")).await;

        match client.device_status("missing").await {
            Err(Error::Http { status, body }) => {
                assert_eq!(status, 404);
                assert!(body.contains("NotFoundError"));
            }
            other => panic!("expected Http error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_network_failure_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // requests now fail with ECONNREFUSED

        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let authority = authority_with(&server, &dir, valid_pair("a")).await;
        let client = SmartThingsClient::new(
            format!("http://{}", addr),
            Arc::new(authority),
            Duration::from_secs(2),
            RetryPolicy {
                max_attempts: 2,
                base_backoff: Duration::from_millis(5),
            },
        )
        .unwrap();

        assert!(matches!(
            client.list_devices().await,
            Err(Error::TransientHttp {
                attempts: 2,
                status: None,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices/dev-1/status"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/devices/dev-1/status"))
            .and(header("authorization", "Bearer renewed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(json!({
                "switch": {"switch": {"value": "off"}}
            }))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("renewed", "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir, valid_pair("stale")).await;

        let status = client.device_status("dev-1").await.unwrap();
        assert_eq!(status.str_value("switch", "switch"), Some("off"));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices/dev-1/status"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/devices/dev-1/status"))
            .and(header("authorization", "Bearer renewed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(json!({
                "switch": {"switch": {"value": "on"}}
            }))))
            .expect(6)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("renewed", "r2"))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(client_for(&server, &dir, valid_pair("stale")).await);

        let calls = (0..6).map(|_| {
            let client = Arc::clone(&client);
            async move { client.device_status("dev-1").await }
        });
        for result in futures::future::join_all(calls).await {
            assert_eq!(result.unwrap().str_value("switch", "switch"), Some("on"));
        }
    }

    #[tokio::test]
    async fn test_second_401_fails_without_another_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("renewed", "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir, valid_pair("stale")).await;

        assert!(matches!(
            client.list_devices().await,
            Err(Error::AuthExpired)
        ));
    }

    #[tokio::test]
    async fn test_list_devices_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"deviceId": "dev-2", "label": "Bedroom AC"}],
                "_links": {}
            })))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"deviceId": "dev-1", "label": "Living Room AC", "name": "Samsung Room A/C"}],
                "_links": {"next": {"href": format!("{}/devices?page=1", server.uri())}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir, valid_pair("a")).await;

        let devices = client.list_devices().await.unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["dev-1", "dev-2"]);
        assert_eq!(devices[0].name.as_deref(), Some("Samsung Room A/C"));
    }

    #[tokio::test]
    async fn test_send_commands_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/devices/dev-1/commands"))
            .and(body_json(json!({
                "commands": [{"component": "main", "capability": "switch", "command": "off"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "1", "status": "ACCEPTED"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir, valid_pair("a")).await;

        tokio_test::assert_ok!(
            client
                .send_commands("dev-1", &[Command::main("switch", "off", vec![])])
                .await
        );
    }

    #[tokio::test]
    async fn test_confirm_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/confirm"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/expired"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir, valid_pair("a")).await;

        tokio_test::assert_ok!(
            client
                .confirm_webhook(&format!("{}/confirm", server.uri()))
                .await
        );
        assert!(matches!(
            client
                .confirm_webhook(&format!("{}/expired", server.uri()))
                .await,
            Err(Error::Http { status: 403, .. })
        ));
    }
}

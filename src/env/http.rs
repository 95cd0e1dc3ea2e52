//! HTTP capability behind `$httpClient`
//!
//! Requests go through a [`Transport`] so tests can substitute an in-process
//! server. Every request is raced against its own timeout; a request that
//! loses the race is dropped (aborted) and reported as a timeout error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::common::{Error, Result};

/// HTTP methods exposed to scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Patch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// Parse a method name, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
    }

    /// Whether a request body is sent for this method
    pub fn accepts_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
    /// Deliver the body as raw bytes instead of text
    pub binary: bool,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: Duration::from_millis(5_000),
            binary: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a request from script parameters
    ///
    /// `params` is either a bare URL string or an object with `url`,
    /// `headers`, `timeout` (ms), `body` and `binary-mode`. The body is kept
    /// only for methods that accept one; non-string bodies are sent as JSON.
    pub fn from_params(
        method: HttpMethod,
        params: &Value,
        default_timeout: Duration,
    ) -> Result<Self> {
        let mut request = match params {
            Value::String(url) => HttpRequest::new(method, url.clone()),
            Value::Object(map) => {
                let url = map
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidRequest("missing 'url'".to_string()))?;
                let mut request = HttpRequest::new(method, url);

                if let Some(Value::Object(headers)) = map.get("headers") {
                    for (name, value) in headers {
                        let value = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        request.headers.insert(name.clone(), value);
                    }
                }

                request.timeout = map
                    .get("timeout")
                    .and_then(Value::as_f64)
                    .filter(|ms| *ms > 0.0)
                    .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok())
                    .unwrap_or(default_timeout);

                if method.accepts_body() {
                    request.body = match map.get("body") {
                        None | Some(Value::Null) => None,
                        Some(Value::String(s)) if s.is_empty() => None,
                        Some(Value::String(s)) => Some(s.clone()),
                        Some(other) => Some(other.to_string()),
                    };
                }

                request.binary = map
                    .get("binary-mode")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                return Ok(request);
            }
            other => {
                return Err(Error::InvalidRequest(format!(
                    "expected a URL string or an options object, got {}",
                    other
                )))
            }
        };
        request.timeout = default_timeout;
        Ok(request)
    }

    /// Whether a header is set, compared case-insensitively
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// Status and headers handed to the script callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased
    pub headers: BTreeMap<String, String>,
}

/// Response body as delivered to the script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Text(String),
    Binary(Vec<u8>),
}

impl ResponseBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(s) => Some(s),
            ResponseBody::Binary(_) => None,
        }
    }
}

/// What a transport returns for a completed exchange
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Network backend for the HTTP capability
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one exchange. Timeouts are enforced by the caller.
    async fn send(&self, request: &HttpRequest) -> Result<TransportResponse>;
}

/// Real network transport
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<TransportResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| Error::Http(e.to_string()))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Outcome delivered to a script callback
pub type HttpOutcome = Result<(HttpResponse, ResponseBody)>;

/// HTTP client shared by all runs
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    user_agent: String,
    default_timeout: Duration,
}

impl HttpClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        user_agent: impl Into<String>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            user_agent: user_agent.into(),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Perform a request, racing it against its timeout
    pub async fn execute(&self, mut request: HttpRequest) -> HttpOutcome {
        if !request.has_header("user-agent") && !self.user_agent.is_empty() {
            request
                .headers
                .insert("User-Agent".to_string(), self.user_agent.clone());
        }

        let exchange = self.transport.send(&request);
        let response = match tokio::time::timeout(request.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::HttpTimeout(request.timeout.as_millis() as u64)),
        };

        let headers = response
            .headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        let body = if request.binary {
            ResponseBody::Binary(response.body)
        } else {
            ResponseBody::Text(String::from_utf8_lossy(&response.body).into_owned())
        };

        Ok((
            HttpResponse {
                status: response.status,
                headers,
            },
            body,
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Transport answering from a fixed route table
    #[derive(Default)]
    pub(crate) struct MockTransport {
        routes: Vec<(String, TransportResponse)>,
        delay: Option<Duration>,
        pub(crate) seen: Mutex<Vec<HttpRequest>>,
    }

    impl MockTransport {
        pub(crate) fn route(mut self, url: &str, status: u16, body: &str) -> Self {
            self.routes.push((
                url.to_string(),
                TransportResponse {
                    status,
                    headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
                    body: body.as_bytes().to_vec(),
                },
            ));
            self
        }

        pub(crate) fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: &HttpRequest) -> Result<TransportResponse> {
            self.seen.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.routes
                .iter()
                .find(|(url, _)| url == &request.url)
                .map(|(_, response)| response.clone())
                .ok_or_else(|| Error::Http(format!("connection refused: {}", request.url)))
        }
    }

    fn client(transport: MockTransport) -> HttpClient {
        HttpClient::new(Arc::new(transport), "Loon/3.0.0", Duration::from_millis(5_000))
    }

    #[tokio::test]
    async fn test_get_returns_status_headers_and_text() {
        let http = client(MockTransport::default().route("https://example.test/ping", 200, "ok"));
        let request = HttpRequest::from_params(
            HttpMethod::Get,
            &json!("https://example.test/ping"),
            http.default_timeout(),
        )
        .unwrap();

        let (response, data) = http.execute(request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("content-type").map(String::as_str), Some("text/plain"));
        assert_eq!(data.as_text(), Some("ok"));
    }

    #[tokio::test]
    async fn test_network_error_is_returned() {
        let http = client(MockTransport::default());
        let request = HttpRequest::new(HttpMethod::Get, "https://nowhere.test/");

        let err = http.execute(request).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_slow_request_is_aborted_as_timeout() {
        let http = client(
            MockTransport::default()
                .route("https://slow.test/", 200, "late")
                .delayed(Duration::from_secs(5)),
        );
        let request = HttpRequest::new(HttpMethod::Get, "https://slow.test/")
            .with_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let err = http.execute(request).await.unwrap_err();
        assert!(matches!(err, Error::HttpTimeout(50)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_binary_mode_keeps_bytes() {
        let http = client(MockTransport::default().route("https://bin.test/", 200, "\u{1}\u{2}"));
        let request = HttpRequest::from_params(
            HttpMethod::Get,
            &json!({"url": "https://bin.test/", "binary-mode": true}),
            http.default_timeout(),
        )
        .unwrap();

        let (_, body) = http.execute(request).await.unwrap();
        assert_eq!(body, ResponseBody::Binary(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_default_user_agent_is_added() {
        let transport = Arc::new(MockTransport::default().route("https://ua.test/", 204, ""));
        let http = HttpClient::new(transport.clone(), "Loon/3.0.0", Duration::from_secs(1));
        http.execute(HttpRequest::new(HttpMethod::Head, "https://ua.test/"))
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].headers.get("User-Agent").map(String::as_str), Some("Loon/3.0.0"));
    }

    #[test]
    fn test_params_object() {
        let request = HttpRequest::from_params(
            HttpMethod::Post,
            &json!({
                "url": "https://api.test/items",
                "headers": {"X-Token": "abc", "X-Retry": 2},
                "timeout": 1500,
                "body": {"name": "item"}
            }),
            Duration::from_millis(5_000),
        )
        .unwrap();

        assert_eq!(request.url, "https://api.test/items");
        assert_eq!(request.headers["X-Token"], "abc");
        assert_eq!(request.headers["X-Retry"], "2");
        assert_eq!(request.timeout, Duration::from_millis(1500));
        assert_eq!(request.body.as_deref(), Some(r#"{"name":"item"}"#));
        assert!(!request.binary);
    }

    #[test]
    fn test_fractional_timeout_is_kept() {
        let request = HttpRequest::from_params(
            HttpMethod::Get,
            &json!({"url": "https://api.test/", "timeout": 0.5}),
            Duration::from_millis(5_000),
        )
        .unwrap();
        assert_eq!(request.timeout, Duration::from_micros(500));

        let request = HttpRequest::from_params(
            HttpMethod::Get,
            &json!({"url": "https://api.test/", "timeout": 1e300}),
            Duration::from_millis(5_000),
        )
        .unwrap();
        assert_eq!(request.timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn test_body_dropped_for_get() {
        let request = HttpRequest::from_params(
            HttpMethod::Get,
            &json!({"url": "https://api.test/", "body": "ignored"}),
            Duration::from_millis(5_000),
        )
        .unwrap();
        assert!(request.body.is_none());
        assert_eq!(request.timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn test_params_without_url_rejected() {
        let err = HttpRequest::from_params(HttpMethod::Get, &json!({"headers": {}}), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(HttpMethod::parse("patch"), Some(HttpMethod::Patch));
        assert_eq!(HttpMethod::parse("TRACE"), None);
        assert!(HttpMethod::Put.accepts_body());
        assert!(!HttpMethod::Delete.accepts_body());
    }
}

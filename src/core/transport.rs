//! HTTP Transport
//!
//! HTTP client interface and implementations. Everything above this layer sees
//! only [`HttpRequest`], [`HttpResponse`] and typed [`SharedoError`]s.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::error::Error as _;
use std::time::Duration;

use crate::error::{sanitize_message, NetworkError, SharedoError, SharedoResult};
use crate::types::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a request without headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Look up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, names lowercased.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Create a response with no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Create a JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string()).with_header("content-type", "application/json")
    }

    /// Add a header. The name is stored lowercased.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Check for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    ///
    /// Any received response is `Ok`, whatever its status. `Err` means no
    /// response arrived.
    async fn send(&self, request: HttpRequest) -> SharedoResult<HttpResponse>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ReqwestHttpTransport {
    /// Create transport with default settings.
    pub fn new() -> SharedoResult<Self> {
        Self::with_options(DEFAULT_TIMEOUT, DEFAULT_USER_AGENT)
    }

    /// Create transport with custom options.
    pub fn with_options(timeout: Duration, user_agent: &str) -> SharedoResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| NetworkError::RequestFailed {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> SharedoResult<HttpResponse> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a reqwest failure to a network error.
fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> SharedoError {
    if error.is_timeout() {
        return NetworkError::Timeout { timeout }.into();
    }

    let chain = sanitize_message(&error_chain(&error)).to_ascii_lowercase();
    let network = if chain.contains("dns") || chain.contains("failed to lookup address") {
        NetworkError::DnsResolutionFailed {
            host: error
                .url()
                .and_then(|u| u.host_str())
                .unwrap_or("unknown")
                .to_string(),
        }
    } else if chain.contains("certificate") || chain.contains("tls") {
        NetworkError::TlsError { message: chain }
    } else if chain.contains("reset") || chain.contains("broken pipe") {
        NetworkError::ConnectionReset { message: chain }
    } else if error.is_connect() {
        NetworkError::ConnectionFailed { message: chain }
    } else {
        NetworkError::RequestFailed { message: chain }
    };
    network.into()
}

fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Scripted reply for [`MockHttpTransport`].
#[derive(Clone, Debug)]
pub struct MockReply {
    result: Result<HttpResponse, SharedoError>,
    delay: Option<Duration>,
}

impl MockReply {
    /// Reply with a response.
    pub fn response(response: HttpResponse) -> Self {
        Self {
            result: Ok(response),
            delay: None,
        }
    }

    /// Fail as if no response arrived.
    pub fn error(error: impl Into<SharedoError>) -> Self {
        Self {
            result: Err(error.into()),
            delay: None,
        }
    }

    /// Wait before replying.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Mock HTTP transport for testing.
///
/// Replies are served first-in first-out; once the queue is empty the default
/// reply (if any) is used.
#[derive(Default)]
pub struct MockHttpTransport {
    replies: Mutex<VecDeque<MockReply>>,
    request_history: Mutex<Vec<HttpRequest>>,
    default_reply: Mutex<Option<MockReply>>,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply.
    pub fn queue(&self, reply: MockReply) -> &Self {
        self.replies.lock().push_back(reply);
        self
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        self.queue(MockReply::response(response))
    }

    /// Queue a JSON response.
    pub fn queue_json_response(&self, status: u16, body: &serde_json::Value) -> &Self {
        self.queue_response(HttpResponse::json(status, body))
    }

    /// Queue a transport failure.
    pub fn queue_error(&self, error: impl Into<SharedoError>) -> &Self {
        self.queue(MockReply::error(error))
    }

    /// Set default reply when queue is empty.
    pub fn set_default(&self, reply: MockReply) -> &Self {
        *self.default_reply.lock() = Some(reply);
        self
    }

    /// Set default response when queue is empty.
    pub fn set_default_response(&self, response: HttpResponse) -> &Self {
        self.set_default(MockReply::response(response))
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        self.request_history.lock().clone()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        self.request_history.lock().last().cloned()
    }

    /// Count requests whose URL contains `fragment`.
    pub fn count_requests_to(&self, fragment: &str) -> usize {
        self.request_history
            .lock()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }

    /// Clear request history.
    pub fn clear_history(&self) {
        self.request_history.lock().clear();
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> SharedoResult<HttpResponse> {
        self.request_history.lock().push(request);

        let reply = self
            .replies
            .lock()
            .pop_front()
            .or_else(|| self.default_reply.lock().clone());

        let reply = reply.ok_or_else(|| NetworkError::ConnectionFailed {
            message: "No mock response available".to_string(),
        })?;

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result
    }
}

/// Create production HTTP transport.
pub fn create_transport(timeout: Duration, user_agent: &str) -> SharedoResult<ReqwestHttpTransport> {
    ReqwestHttpTransport::with_options(timeout, user_agent)
}

/// Create mock HTTP transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}

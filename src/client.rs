//! ShareDo Client
//!
//! Authenticated HTTP client with transparent re-authentication and retries.
//!
//! Every request runs through the same pipeline:
//!
//! 1. `inject_auth`: attach the bearer token (unless `skip_auth`)
//! 2. `dispatch`: send through the transport
//! 3. `classify`: turn non-2xx responses into typed errors
//! 4. retry decision: a 401 triggers one coordinated re-authentication,
//!    rate limiting and transient failures are retried with backoff

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::auth::AuthenticationService;
use crate::core::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestHttpTransport};
use crate::error::{
    create_error_from_response, sanitize_message, AuthenticationError, ResponseError,
    SharedoError, SharedoResult, ValidationError,
};
use crate::resilience::{RetryConfig, RetryStrategy};
use crate::telemetry::{log_request, log_response, no_op_metrics, ClientMetrics};
use crate::types::ClientConfig;

/// Per-request options.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Extra headers; they override the defaults but never the bearer token.
    pub headers: HashMap<String, String>,
    /// Query parameters, appended url-encoded.
    pub params: Vec<(String, String)>,
    /// Timeout for each attempt.
    pub timeout: Option<Duration>,
    /// Send without a bearer token.
    pub skip_auth: bool,
}

impl RequestOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    /// Set per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Skip bearer token injection.
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }
}

/// Authenticated, resilient ShareDo HTTP client.
#[derive(Clone)]
pub struct ResilientHttpClient {
    base_url: Url,
    timeout: Duration,
    transport: Arc<dyn HttpTransport>,
    auth: AuthenticationService,
    retry: RetryStrategy,
    metrics: Arc<dyn ClientMetrics>,
}

impl ResilientHttpClient {
    /// Create client with the default reqwest transport.
    pub fn new(config: ClientConfig) -> SharedoResult<Self> {
        let transport = Arc::new(ReqwestHttpTransport::with_options(
            config.timeout,
            &config.user_agent,
        )?);
        Self::with_transport(config, transport)
    }

    /// Create client over a custom transport, used for both the token
    /// endpoint and API calls.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> SharedoResult<Self> {
        let auth = AuthenticationService::new(&config, Arc::clone(&transport))?;
        Ok(Self::with_components(config, transport, auth, no_op_metrics()))
    }

    /// Create client with custom components.
    pub fn with_components(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        auth: AuthenticationService,
        metrics: Arc<dyn ClientMetrics>,
    ) -> Self {
        Self {
            retry: RetryStrategy::new(RetryConfig::from(&config)),
            base_url: config.base_url,
            timeout: config.timeout,
            transport,
            auth,
            metrics,
        }
    }

    /// Get the authentication service.
    pub fn auth(&self) -> &AuthenticationService {
        &self.auth
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Send a request and return the raw successful response.
    #[instrument(
        name = "sharedo.request",
        skip_all,
        fields(method = %method, path = %path)
    )]
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
        options: Option<RequestOptions>,
    ) -> SharedoResult<HttpResponse> {
        let options = options.unwrap_or_default();
        let request = self.build_request(method, path, body.as_ref(), &options)?;

        let start = Instant::now();
        let result = self.execute(request, options.skip_auth).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(response) => {
                self.metrics
                    .record_request_duration(method.as_str(), Some(response.status), elapsed_ms);
            }
            Err(e) => {
                self.metrics
                    .record_request_duration(method.as_str(), e.status(), elapsed_ms);
                self.metrics.record_error(e.error_code());
            }
        }
        result
    }

    /// Send a request and decode the JSON response. An empty body decodes
    /// as `null`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
        options: Option<RequestOptions>,
    ) -> SharedoResult<T> {
        let response = self.request(method, path, body, options).await?;
        decode_body(&response.body)
    }

    /// GET request.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: Option<RequestOptions>,
    ) -> SharedoResult<T> {
        self.request_json(HttpMethod::Get, path, None, options).await
    }

    /// POST request.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
        options: Option<RequestOptions>,
    ) -> SharedoResult<T> {
        self.request_json(HttpMethod::Post, path, body, options).await
    }

    /// PUT request.
    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
        options: Option<RequestOptions>,
    ) -> SharedoResult<T> {
        self.request_json(HttpMethod::Put, path, body, options).await
    }

    /// PATCH request.
    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
        options: Option<RequestOptions>,
    ) -> SharedoResult<T> {
        self.request_json(HttpMethod::Patch, path, body, options).await
    }

    /// DELETE request.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: Option<RequestOptions>,
    ) -> SharedoResult<T> {
        self.request_json(HttpMethod::Delete, path, None, options).await
    }

    /// Resolve `path` against the base URL. Absolute URLs are kept as is.
    fn resolve_url(&self, path: &str, params: &[(String, String)]) -> SharedoResult<Url> {
        let invalid = |e: url::ParseError| ValidationError::InvalidUrl {
            field: "path".to_string(),
            message: e.to_string(),
        };

        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path).map_err(invalid)?
        } else {
            self.base_url
                .join(path.trim_start_matches('/'))
                .map_err(invalid)?
        };

        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
    ) -> SharedoResult<HttpRequest> {
        let url = self.resolve_url(path, &options.params)?;

        let mut headers = HashMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        if body.is_some() {
            headers.insert("content-type".to_string(), "application/json".to_string());
        }
        for (name, value) in &options.headers {
            if name.trim().is_empty() {
                return Err(ValidationError::InvalidHeader { name: name.clone() }.into());
            }
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        Ok(HttpRequest {
            method,
            url: url.to_string(),
            headers,
            body: body.map(|b| b.to_string()),
            timeout: Some(options.timeout.unwrap_or(self.timeout)),
        })
    }

    async fn execute(&self, request: HttpRequest, skip_auth: bool) -> SharedoResult<HttpResponse> {
        let mut token = if skip_auth {
            None
        } else {
            Some(self.auth.get_access_token().await?)
        };
        let mut retries = 0u32;
        let mut reauthenticated = false;

        loop {
            let attempt = inject_auth(request.clone(), token.as_deref());
            let error = match self.dispatch(attempt, retries).await.and_then(classify) {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if is_unauthorized(&error) && !skip_auth {
                if reauthenticated {
                    warn!("Request still unauthorized after re-authentication");
                    return Err(error);
                }
                reauthenticated = true;
                token = Some(self.reauthenticate(token.as_deref()).await?);
                continue;
            }

            if self.retry.should_retry(retries, &error) {
                retries += 1;
                let delay = self.retry.delay_for(retries, &error);
                warn!(
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying request"
                );
                self.metrics
                    .record_retry(request.method.as_str(), error.status());
                tokio::time::sleep(delay).await;
                continue;
            }

            if error.is_retryable() {
                return Err(SharedoError::RetriesExhausted {
                    attempts: retries + 1,
                    source: Box::new(error),
                });
            }
            return Err(error);
        }
    }

    async fn dispatch(&self, request: HttpRequest, retries: u32) -> SharedoResult<HttpResponse> {
        log_request(request.method.as_str(), &request.url, retries);
        let start = Instant::now();
        let response = self.transport.send(request).await?;
        log_response(
            response.status,
            start.elapsed().as_millis() as u64,
            &response.body,
        );
        Ok(response)
    }

    /// Get a token to replace `rejected`. Reuses a token another request
    /// already obtained; otherwise runs a coordinated refresh.
    async fn reauthenticate(&self, rejected: Option<&str>) -> SharedoResult<String> {
        if let Some(current) = self.replaced_token(rejected) {
            debug!("Token already replaced by another request");
            return Ok(current);
        }

        debug!("Token rejected; refreshing");
        match self.auth.refresh_token().await {
            Ok(token) => Ok(token.access_token),
            // A refresh finished between the check above and ours.
            Err(
                e @ SharedoError::Authentication(AuthenticationError::RefreshTooFrequent { .. }),
            ) => self.replaced_token(rejected).ok_or(e),
            Err(e) => Err(e),
        }
    }

    fn replaced_token(&self, rejected: Option<&str>) -> Option<String> {
        self.auth
            .current_token()
            .map(|token| token.access_token)
            .filter(|token| Some(token.as_str()) != rejected)
    }
}

fn inject_auth(mut request: HttpRequest, token: Option<&str>) -> HttpRequest {
    if let Some(token) = token {
        request
            .headers
            .insert("authorization".to_string(), format!("Bearer {}", token));
    }
    request
}

fn classify(response: HttpResponse) -> SharedoResult<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(create_error_from_response(
            response.status,
            &response.headers,
            &response.body,
        ))
    }
}

fn is_unauthorized(error: &SharedoError) -> bool {
    matches!(
        error,
        SharedoError::Authentication(AuthenticationError::Unauthorized { .. })
    )
}

fn decode_body<T: DeserializeOwned>(body: &str) -> SharedoResult<T> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|e| {
        ResponseError::InvalidJson {
            message: sanitize_message(&e.to_string()),
        }
        .into()
    })
}

/// Create a client with the default transport.
pub fn sharedo_client(config: ClientConfig) -> SharedoResult<ResilientHttpClient> {
    ResilientHttpClient::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::ClientConfigBuilder;
    use crate::core::MockHttpTransport;

    fn create_test_config() -> ClientConfig {
        ClientConfigBuilder::new()
            .base_url("https://demo.sharedo.tech/api")
            .client_id("client")
            .client_secret("secret")
            .token_endpoint("https://identity.sharedo.tech/connect/token")
            .build()
            .unwrap()
    }

    fn create_test_client() -> ResilientHttpClient {
        ResilientHttpClient::with_transport(create_test_config(), Arc::new(MockHttpTransport::new()))
            .unwrap()
    }

    #[test]
    fn test_client_creation() {
        assert!(ResilientHttpClient::new(create_test_config()).is_ok());
    }

    #[test]
    fn test_resolve_url() {
        let client = create_test_client();

        let url = client.resolve_url("/v1/worktypes", &[]).unwrap();
        assert_eq!(url.as_str(), "https://demo.sharedo.tech/api/v1/worktypes");

        let url = client
            .resolve_url(
                "v1/search",
                &[("q".to_string(), "a b&c".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://demo.sharedo.tech/api/v1/search?q=a+b%26c"
        );

        let url = client
            .resolve_url("https://other.example.com/x", &[])
            .unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/x");
    }

    #[test]
    fn test_build_request_headers() {
        let client = create_test_client();
        let options = RequestOptions::new().header("X-Trace", "abc");

        let request = client
            .build_request(
                HttpMethod::Post,
                "items",
                Some(&serde_json::json!({"a": 1})),
                &options,
            )
            .unwrap();

        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("x-trace"), Some("abc"));
        assert_eq!(request.body.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));

        let request = client
            .build_request(HttpMethod::Get, "items", None, &RequestOptions::new())
            .unwrap();
        assert!(request.header("content-type").is_none());
    }

    #[test]
    fn test_inject_auth() {
        let request = HttpRequest::new(HttpMethod::Get, "https://example.com");
        let request = inject_auth(request, Some("t1"));
        assert_eq!(request.header("authorization"), Some("Bearer t1"));
    }

    #[test]
    fn test_decode_empty_body_as_null() {
        let value: Option<serde_json::Value> = decode_body("").unwrap();
        assert!(value.is_none());
        decode_body::<()>("  ").unwrap();

        let error = decode_body::<serde_json::Value>("<html>").unwrap_err();
        assert!(matches!(
            error,
            SharedoError::Response(ResponseError::InvalidJson { .. })
        ));
    }

    #[test]
    fn test_classify() {
        assert!(classify(HttpResponse::new(204, "")).is_ok());
        let error = classify(HttpResponse::new(401, "")).unwrap_err();
        assert!(is_unauthorized(&error));
    }
}

//! Impersonation Grant
//!
//! Token request against the ShareDo identity server. Sends the
//! `Impersonate.Specified` extension grant (or plain `client_credentials`) with
//! the client authenticated through HTTP Basic.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{
    extract_error_message, parse_error_response, sanitize_message, AuthenticationError,
    SharedoError, SharedoResult,
};
use crate::types::{ClientConfig, Credentials, GrantType, ImpersonationContext, Token};

/// Token grant interface.
#[async_trait]
pub trait TokenGrant: Send + Sync {
    /// Request a new access token.
    async fn request_token(&self) -> SharedoResult<Token>;
}

/// Parameters of one token request.
#[derive(Clone, Debug)]
pub struct GrantRequest {
    /// Grant type.
    pub grant_type: GrantType,
    /// Requested scope.
    pub scope: String,
    /// User to act as.
    pub impersonation: Option<ImpersonationContext>,
}

impl GrantRequest {
    /// Take grant parameters from the client configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            grant_type: config.grant_type,
            scope: config.scope.clone(),
            impersonation: config.impersonation.clone(),
        }
    }

    /// Form-encode the request body.
    pub fn to_form_body(&self) -> String {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", self.grant_type.as_str());
        if !self.scope.is_empty() {
            form.append_pair("scope", &self.scope);
        }
        if let Some(impersonation) = &self.impersonation {
            form.append_pair("impersonate_user", &impersonation.user);
            form.append_pair("impersonate_provider", &impersonation.provider);
        }
        form.finish()
    }
}

/// Token grant over an HTTP transport.
pub struct ImpersonationGrant<T: HttpTransport + ?Sized> {
    credentials: Credentials,
    request: GrantRequest,
    timeout: Duration,
    transport: Arc<T>,
}

impl<T: HttpTransport + ?Sized> ImpersonationGrant<T> {
    /// Create grant from client configuration.
    pub fn new(config: &ClientConfig, transport: Arc<T>) -> Self {
        Self {
            credentials: config.credentials.clone(),
            request: GrantRequest::from_config(config),
            timeout: config.timeout,
            transport,
        }
    }

    fn build_request_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        headers.insert("accept".to_string(), "application/json".to_string());

        let credentials = format!(
            "{}:{}",
            self.credentials.client_id,
            self.credentials.client_secret.expose_secret()
        );
        headers.insert(
            "authorization".to_string(),
            format!("Basic {}", STANDARD.encode(credentials)),
        );

        headers
    }
}

#[async_trait]
impl<T: HttpTransport + ?Sized> TokenGrant for ImpersonationGrant<T> {
    #[instrument(
        name = "sharedo.token_request",
        skip(self),
        fields(
            grant_type = self.request.grant_type.as_str(),
            impersonating = self.request.impersonation.is_some()
        )
    )]
    async fn request_token(&self) -> SharedoResult<Token> {
        let http_request = HttpRequest {
            method: HttpMethod::Post,
            url: self.credentials.token_endpoint.to_string(),
            headers: self.build_request_headers(),
            body: Some(self.request.to_form_body()),
            timeout: Some(self.timeout),
        };

        let response = self.transport.send(http_request).await?;

        if !response.is_success() {
            let message = parse_error_response(&response.body)
                .map(|e| match e.error_description {
                    Some(description) => format!("{}: {}", e.error, description),
                    None => e.error,
                })
                .map(|m| sanitize_message(&m))
                .or_else(|| extract_error_message(&response.body))
                .unwrap_or_else(|| format!("HTTP {}", response.status));

            warn!(status = response.status, %message, "Token request rejected");
            return Err(AuthenticationError::TokenRequestFailed {
                status: response.status,
                message,
            }
            .into());
        }

        let token = Token::from_response_body(&response.body)?;
        debug!(expires_in = token.expires_in, "Token issued");
        Ok(token)
    }
}

/// Mock token grant for testing.
///
/// Replies are served in order; once exhausted, tokens `mock-token-<n>` are
/// issued.
#[derive(Default)]
pub struct MockTokenGrant {
    replies: Mutex<VecDeque<SharedoResult<Token>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MockTokenGrant {
    /// Create new mock grant.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a token to return.
    pub fn queue_token(&self, token: Token) -> &Self {
        self.replies.lock().push_back(Ok(token));
        self
    }

    /// Queue an error to return.
    pub fn queue_error(&self, error: impl Into<SharedoError>) -> &Self {
        self.replies.lock().push_back(Err(error.into()));
        self
    }

    /// Wait this long before every reply.
    pub fn set_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Number of token requests made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenGrant for MockTokenGrant {
    async fn request_token(&self) -> SharedoResult<Token> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().pop_front();
        reply.unwrap_or_else(|| Ok(Token::bearer(format!("mock-token-{}", n), 3600)))
    }
}

/// Create mock token grant for testing.
pub fn create_mock_token_grant() -> MockTokenGrant {
    MockTokenGrant::new()
}

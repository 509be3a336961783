//! Configuration Builder
//!
//! Fluent builder for client configuration. Every field is validated in
//! [`ClientConfigBuilder::build`], so a misconfigured client fails at
//! construction time instead of on its first request.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use crate::error::{SharedoError, SharedoResult, ValidationError};
use crate::types::{
    ClientConfig, Credentials, GrantType, ImpersonationContext, DEFAULT_EXPIRY_BUFFER,
    DEFAULT_JITTER_RANGE, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_DELAY,
    DEFAULT_MIN_REFRESH_INTERVAL, DEFAULT_RETRY_DELAY, DEFAULT_SCOPE, DEFAULT_TIMEOUT,
    DEFAULT_USER_AGENT,
};

/// Client configuration builder.
#[derive(Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    token_endpoint: Option<String>,
    impersonate_user: Option<String>,
    impersonate_provider: Option<String>,
    grant_type: Option<GrantType>,
    scope: Option<String>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    jitter_range: Option<f64>,
    expiry_buffer: Option<Duration>,
    min_refresh_interval: Option<Duration>,
    single_flight_acquisition: Option<bool>,
    master_key: Option<SecretString>,
    user_agent: Option<String>,
}

impl ClientConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set client ID.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set client secret.
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(client_secret.into()));
        self
    }

    /// Set token endpoint.
    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Impersonate a user from the given identity provider.
    pub fn impersonate(mut self, user: impl Into<String>, provider: impl Into<String>) -> Self {
        self.impersonate_user = Some(user.into());
        self.impersonate_provider = Some(provider.into());
        self
    }

    /// Set grant type.
    pub fn grant_type(mut self, grant_type: GrantType) -> Self {
        self.grant_type = Some(grant_type);
        self
    }

    /// Set requested scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set maximum retries.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set base backoff delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set backoff ceiling.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    /// Set jitter range (0.0-1.0).
    pub fn jitter_range(mut self, jitter: f64) -> Self {
        self.jitter_range = Some(jitter);
        self
    }

    /// Set token expiry buffer.
    pub fn expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = Some(buffer);
        self
    }

    /// Set minimum interval between reactive refreshes.
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = Some(interval);
        self
    }

    /// Enable or disable single-flight for first-time token acquisition.
    pub fn single_flight_acquisition(mut self, enable: bool) -> Self {
        self.single_flight_acquisition = Some(enable);
        self
    }

    /// Set master key for the encrypted token cache.
    pub fn master_key(mut self, key: impl Into<String>) -> Self {
        self.master_key = Some(SecretString::new(key.into()));
        self
    }

    /// Set User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Load unset values from `SHAREDO_*` environment variables.
    ///
    /// Values already set on the builder win over the environment.
    pub fn from_env(mut self) -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        fn millis(name: &str) -> Option<Duration> {
            var(name)?.parse().ok().map(Duration::from_millis)
        }

        self.base_url = self.base_url.or_else(|| var("SHAREDO_BASE_URL"));
        self.client_id = self.client_id.or_else(|| var("SHAREDO_CLIENT_ID"));
        self.client_secret = self
            .client_secret
            .or_else(|| var("SHAREDO_CLIENT_SECRET").map(SecretString::new));
        self.token_endpoint = self.token_endpoint.or_else(|| var("SHAREDO_TOKEN_ENDPOINT"));
        self.timeout = self.timeout.or_else(|| millis("SHAREDO_TIMEOUT_MS"));
        self.max_retries = self
            .max_retries
            .or_else(|| var("SHAREDO_MAX_RETRIES")?.parse().ok());
        self.retry_delay = self.retry_delay.or_else(|| millis("SHAREDO_RETRY_DELAY_MS"));
        self.impersonate_user = self
            .impersonate_user
            .or_else(|| var("SHAREDO_IMPERSONATE_USER"));
        self.impersonate_provider = self
            .impersonate_provider
            .or_else(|| var("SHAREDO_IMPERSONATE_PROVIDER"));
        self.master_key = self
            .master_key
            .or_else(|| var("SHAREDO_MASTER_KEY").map(SecretString::new));
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> SharedoResult<ClientConfig> {
        let mut base_url = parse_http_url("base_url", self.base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let token_endpoint = parse_http_url("token_endpoint", self.token_endpoint)?;

        let client_id = required("client_id", self.client_id)?;
        if client_id.contains(':') {
            return Err(invalid("client_id", "must not contain ':'"));
        }

        let client_secret = self
            .client_secret
            .filter(|s| !s.expose_secret().is_empty())
            .ok_or_else(|| missing("client_secret"))?;

        let impersonation = match (self.impersonate_user, self.impersonate_provider) {
            (None, None) => None,
            (Some(user), Some(provider))
                if !user.trim().is_empty() && !provider.trim().is_empty() =>
            {
                Some(ImpersonationContext { user, provider })
            }
            _ => {
                return Err(invalid(
                    "impersonation",
                    "user and provider must both be set and non-empty",
                ))
            }
        };

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(invalid("timeout", "must be greater than zero"));
        }

        let jitter_range = self.jitter_range.unwrap_or(DEFAULT_JITTER_RANGE);
        if !(0.0..=1.0).contains(&jitter_range) {
            return Err(invalid("jitter_range", "must be between 0.0 and 1.0"));
        }

        let retry_delay = self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY);
        let max_retry_delay = self.max_retry_delay.unwrap_or(DEFAULT_MAX_RETRY_DELAY);
        if max_retry_delay < retry_delay {
            return Err(invalid("max_retry_delay", "must not be below retry_delay"));
        }

        let scope = self.scope.unwrap_or_else(|| DEFAULT_SCOPE.to_string());

        Ok(ClientConfig {
            base_url,
            credentials: Credentials {
                client_id,
                client_secret,
                token_endpoint,
            },
            impersonation,
            grant_type: self.grant_type.unwrap_or_default(),
            scope,
            timeout,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay,
            max_retry_delay,
            jitter_range,
            expiry_buffer: self.expiry_buffer.unwrap_or(DEFAULT_EXPIRY_BUFFER),
            min_refresh_interval: self
                .min_refresh_interval
                .unwrap_or(DEFAULT_MIN_REFRESH_INTERVAL),
            single_flight_acquisition: self.single_flight_acquisition.unwrap_or(true),
            master_key: self.master_key,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        })
    }
}

fn missing(field: &str) -> SharedoError {
    ValidationError::MissingField {
        field: field.to_string(),
    }
    .into()
}

fn invalid(field: &str, message: &str) -> SharedoError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn required(field: &str, value: Option<String>) -> SharedoResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing(field))
}

fn parse_http_url(field: &str, value: Option<String>) -> SharedoResult<Url> {
    let raw = required(field, value)?;
    let url = Url::parse(&raw).map_err(|e| ValidationError::InvalidUrl {
        field: field.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidUrl {
            field: field.to_string(),
            message: format!("unsupported scheme: {}", url.scheme()),
        }
        .into());
    }
    Ok(url)
}

/// Create a new client configuration builder.
pub fn client_config() -> ClientConfigBuilder {
    ClientConfigBuilder::new()
}

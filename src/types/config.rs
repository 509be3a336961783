//! Configuration Types
//!
//! Client configuration with named, typed fields. Build it with
//! [`crate::builders::ClientConfigBuilder`], which validates every field.

use secrecy::SecretString;
use std::time::Duration;
use url::Url;

/// Default HTTP timeout per call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default maximum retries for rate-limited and transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Default upper bound for a single backoff delay.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Default jitter range, as a fraction of the computed delay.
pub const DEFAULT_JITTER_RANGE: f64 = 0.3;
/// Tokens are treated as expired this long before their real expiry.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(60);
/// Minimum spacing between two reactive token refreshes.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
/// Scope requested from the token endpoint.
pub const DEFAULT_SCOPE: &str = "sharedo";
/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = concat!("sharedo-client/", env!("CARGO_PKG_VERSION"));

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the ShareDo API; always ends with `/`.
    pub base_url: Url,
    /// OAuth2 client credentials and token endpoint.
    pub credentials: Credentials,
    /// Optional user impersonation.
    pub impersonation: Option<ImpersonationContext>,
    /// Grant type sent to the token endpoint.
    pub grant_type: GrantType,
    /// Scope sent to the token endpoint.
    pub scope: String,
    /// Per-call HTTP timeout.
    pub timeout: Duration,
    /// Maximum retries for retryable failures.
    pub max_retries: u32,
    /// Base backoff delay.
    pub retry_delay: Duration,
    /// Backoff ceiling.
    pub max_retry_delay: Duration,
    /// Jitter range (0.0-1.0).
    pub jitter_range: f64,
    /// Safety margin subtracted from token expiry.
    pub expiry_buffer: Duration,
    /// Minimum spacing between reactive refreshes.
    pub min_refresh_interval: Duration,
    /// Coordinate concurrent first-time token acquisition as well.
    pub single_flight_acquisition: bool,
    /// Master secret for the encrypted token cache.
    ///
    /// When absent, a fixed built-in key is used. That key is public and only
    /// fit for development.
    pub master_key: Option<SecretString>,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

/// OAuth2 client credentials. Immutable for the lifetime of a service.
#[derive(Clone)]
pub struct Credentials {
    /// Client identifier.
    pub client_id: String,
    /// Client secret.
    pub client_secret: SecretString,
    /// Token endpoint URL.
    pub token_endpoint: Url,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish()
    }
}

/// User to act as when requesting tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImpersonationContext {
    /// User to impersonate.
    pub user: String,
    /// Identity provider of that user.
    pub provider: String,
}

/// Grant type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GrantType {
    /// ShareDo impersonation extension grant.
    #[default]
    ImpersonateSpecified,
    /// Plain RFC 6749 client credentials.
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImpersonateSpecified => "Impersonate.Specified",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_type_as_str() {
        assert_eq!(GrantType::ImpersonateSpecified.as_str(), "Impersonate.Specified");
        assert_eq!(GrantType::ClientCredentials.as_str(), "client_credentials");
        assert_eq!(GrantType::default(), GrantType::ImpersonateSpecified);
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let credentials = Credentials {
            client_id: "client".to_string(),
            client_secret: SecretString::new("hunter2".to_string()),
            token_endpoint: Url::parse("https://identity.example.com/connect/token").unwrap(),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("client"));
        assert!(!debug.contains("hunter2"));
    }
}

//! Error Types
//!
//! Error hierarchy for the authenticated HTTP client. Every failure that reaches
//! a caller is one of these types; raw transport errors are mapped before they
//! leave the transport layer.

pub mod sanitize;

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use sanitize::{sanitize_message, MAX_MESSAGE_LENGTH};

/// HTTP statuses that are worth retrying.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Root error type for the client.
///
/// `Clone` so that the result of a shared token refresh can be handed to every
/// task waiting on it.
#[derive(Error, Debug, Clone)]
pub enum SharedoError {
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Response error: {0}")]
    Response(#[from] ResponseError),

    #[error("Request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<SharedoError>,
    },
}

impl SharedoError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "SHAREDO_AUTH",
            Self::Network(NetworkError::Timeout { .. }) => "SHAREDO_TIMEOUT",
            Self::Network(_) => "SHAREDO_NETWORK",
            Self::RateLimit(_) => "SHAREDO_RATE_LIMIT",
            Self::Server(_) => "SHAREDO_SERVER",
            Self::Validation(_) => "SHAREDO_VALIDATION",
            Self::Storage(_) => "SHAREDO_STORAGE",
            Self::Response(_) => "SHAREDO_RESPONSE",
            Self::RetriesExhausted { .. } => "SHAREDO_RETRIES_EXHAUSTED",
        }
    }

    /// HTTP status that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication(AuthenticationError::Unauthorized { .. }) => Some(401),
            Self::Authentication(AuthenticationError::TokenRequestFailed { status, .. }) => {
                Some(*status)
            }
            Self::RateLimit(_) => Some(429),
            Self::Server(ServerError::HttpStatus { status, .. }) => Some(*status),
            Self::Response(ResponseError::ClientError { status, .. }) => Some(*status),
            Self::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Check if error is retryable.
    ///
    /// Authentication errors are never retried here; the request pipeline owns
    /// the single re-authentication retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::RateLimit(_) => true,
            Self::Server(ServerError::HttpStatus { status, .. })
            | Self::Response(ResponseError::ClientError { status, .. }) => {
                RETRYABLE_STATUSES.contains(status)
            }
            _ => false,
        }
    }

    /// Get the server-requested delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit(RateLimitError::TooManyRequests { retry_after, .. }) => *retry_after,
            Self::Server(ServerError::HttpStatus { retry_after, .. }) => *retry_after,
            _ => None,
        }
    }

    /// Number of attempts made before giving up, for exhausted retries.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

}

/// Authentication error.
#[derive(Error, Debug, Clone)]
pub enum AuthenticationError {
    #[error("Token endpoint rejected the request (HTTP {status}): {message}")]
    TokenRequestFailed { status: u16, message: String },

    #[error("Malformed token response: {message}")]
    MalformedTokenResponse { message: String },

    #[error("Request unauthorized after token refresh: {message}")]
    Unauthorized { message: String },

    #[error("Token refresh requested too frequently, retry in {retry_in:?}")]
    RefreshTooFrequent { retry_in: Duration },

    #[error("Token refresh failed: {message}")]
    RefreshFailed { message: String },
}

/// Network/transport error. No response was received.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Connection reset: {message}")]
    ConnectionReset { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("DNS resolution failed: {host}")]
    DnsResolutionFailed { host: String },

    #[error("TLS error: {message}")]
    TlsError { message: String },

    #[error("Request failed: {message}")]
    RequestFailed { message: String },
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::TlsError { .. })
    }
}

/// Rate limiting (HTTP 429).
#[derive(Error, Debug, Clone)]
pub enum RateLimitError {
    #[error("Too many requests: {message}")]
    TooManyRequests {
        retry_after: Option<Duration>,
        message: String,
    },
}

/// Server-side failure (HTTP 5xx).
#[derive(Error, Debug, Clone)]
pub enum ServerError {
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
}

/// Invalid input to the client. Raised at construction time, never retried.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid URL for {field}: {message}")]
    InvalidUrl { field: String, message: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid header: {name}")]
    InvalidHeader { name: String },
}

/// Secure storage error.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Key derivation failed: {message}")]
    KeyDerivationFailed { message: String },

    #[error("Encryption failed: {message}")]
    EncryptionFailed { message: String },

    #[error("Decryption failed: {message}")]
    DecryptionFailed { message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },
}

/// Non-retryable response failures (other 4xx, undecodable bodies).
#[derive(Error, Debug, Clone)]
pub enum ResponseError {
    #[error("HTTP {status}: {message}")]
    ClientError { status: u16, message: String },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },
}

/// Result type for client operations.
pub type SharedoResult<T> = Result<T, SharedoError>;

/// OAuth2 error response from the token endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Parse an OAuth2 error response from an HTTP body.
pub fn parse_error_response(body: &str) -> Option<OAuth2ErrorResponse> {
    serde_json::from_str(body).ok()
}

/// Pull a human-readable message out of a generic JSON error body.
///
/// Understands OAuth2 (`error_description`/`error`), `message`, `errorMessage`,
/// `title`, and a nested `{"error": {"message": ..}}` shape.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    ["error_description", "message", "errorMessage", "title"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .or_else(|| match value.get("error") {
            Some(serde_json::Value::String(s)) => Some(s.as_str()),
            Some(nested) => nested.get("message").and_then(|m| m.as_str()),
            None => None,
        })
        .filter(|s| !s.trim().is_empty())
        .map(sanitize_message)
}

/// Longest server-requested delay that is honoured.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Parse a `Retry-After` header given in seconds or as an HTTP date.
///
/// Values are capped at [`MAX_RETRY_AFTER`]; negative or unparseable values
/// are ignored.
pub fn parse_retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    let value = headers.get("retry-after")?.trim();

    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_nan() || secs < 0.0 {
            return None;
        }
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER);
        return Some(delay.min(MAX_RETRY_AFTER));
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO).min(MAX_RETRY_AFTER))
}

/// Create a typed error from a non-success HTTP response.
pub fn create_error_from_response(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> SharedoError {
    let message = extract_error_message(body).unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        401 => AuthenticationError::Unauthorized { message }.into(),
        429 => RateLimitError::TooManyRequests {
            retry_after: parse_retry_after(headers),
            message,
        }
        .into(),
        500..=599 => ServerError::HttpStatus {
            status,
            message,
            retry_after: parse_retry_after(headers),
        }
        .into(),
        _ => ResponseError::ClientError { status, message }.into(),
    }
}

/// Get user-friendly error message.
pub fn get_user_message(error: &SharedoError) -> String {
    match error {
        SharedoError::Authentication(AuthenticationError::RefreshTooFrequent { .. }) => {
            "Authentication is being refreshed too often. Please wait a moment and try again."
                .to_string()
        }
        SharedoError::Authentication(_) => {
            "Could not authenticate with ShareDo. Please check the client credentials.".to_string()
        }
        SharedoError::Network(NetworkError::Timeout { .. }) => {
            "The request timed out. Please check your connection and try again.".to_string()
        }
        SharedoError::Network(_) => {
            "Could not reach ShareDo. Please check your connection and try again.".to_string()
        }
        SharedoError::RateLimit(_) => {
            "Too many requests. Please wait a moment and try again.".to_string()
        }
        SharedoError::Server(_) => {
            "ShareDo is temporarily unavailable. Please try again later.".to_string()
        }
        SharedoError::Validation(e) => format!("Invalid configuration: {}", e),
        SharedoError::RetriesExhausted { source, .. } => get_user_message(source),
        _ => "The request to ShareDo failed. Please try again.".to_string(),
    }
}

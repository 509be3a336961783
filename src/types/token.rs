//! Token Types
//!
//! Token definitions for the ShareDo identity server.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{sanitize_message, AuthenticationError};

/// Longest token lifetime accepted from the token endpoint (ten years).
pub const MAX_EXPIRES_IN: u64 = 10 * 365 * 24 * 60 * 60;

/// Access token issued by the token endpoint.
///
/// Replaced as a whole on every authentication; never partially updated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Access token.
    pub access_token: String,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// Lifetime in seconds from issue.
    pub expires_in: u64,
    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Token {
    /// Create a bearer token.
    pub fn bearer(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            expires_in,
            refresh_token: None,
            scope: None,
        }
    }

    /// Parse and validate a token endpoint response body.
    pub fn from_response_body(body: &str) -> Result<Self, AuthenticationError> {
        let response: TokenResponse = serde_json::from_str(body).map_err(|e| {
            AuthenticationError::MalformedTokenResponse {
                message: sanitize_message(&format!("invalid JSON: {}", e)),
            }
        })?;
        response.into_token()
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scope", &self.scope)
            .finish()
    }
}

/// Raw token endpoint response, before validation.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Some servers send this as a string.
    #[serde(default)]
    pub expires_in: Option<serde_json::Value>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Validate required fields and convert into a [`Token`].
    pub fn into_token(self) -> Result<Token, AuthenticationError> {
        let access_token = self
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| missing_field("access_token"))?;

        let token_type = self
            .token_type
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| missing_field("token_type"))?;

        let expires_in = match self.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
        .filter(|secs| *secs > 0)
        .ok_or_else(|| missing_field("expires_in"))?;

        if expires_in > MAX_EXPIRES_IN {
            return Err(AuthenticationError::MalformedTokenResponse {
                message: format!("expires_in out of range: {}", expires_in),
            });
        }

        Ok(Token {
            access_token,
            token_type,
            expires_in,
            refresh_token: self.refresh_token,
            scope: self.scope,
        })
    }
}

fn missing_field(field: &str) -> AuthenticationError {
    AuthenticationError::MalformedTokenResponse {
        message: format!("missing or empty field: {}", field),
    }
}

/// Token together with its absolute lifetime, as persisted by secure storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedToken {
    /// The token itself.
    pub token: Token,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the server stops accepting the token.
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Stamp a freshly issued token.
    pub fn issued_now(token: Token) -> Self {
        Self::issued_at(token, Utc::now())
    }

    /// Stamp a token issued at a given instant.
    ///
    /// Lifetimes past the representable range saturate at the latest instant.
    pub fn issued_at(token: Token, issued_at: DateTime<Utc>) -> Self {
        let expires_at = i64::try_from(token.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            token,
            issued_at,
            expires_at,
        }
    }

    /// Time left before the server rejects the token.
    pub fn remaining_lifetime(&self) -> std::time::Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

//! Token Manager
//!
//! Holds the current access token and decides when it is too close to expiry
//! to hand out.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;

use crate::types::{CachedToken, Token, DEFAULT_EXPIRY_BUFFER};

/// In-memory holder for the current token.
///
/// Thread-safe; share it through an `Arc`.
#[derive(Debug)]
pub struct TokenManager {
    current: RwLock<Option<CachedToken>>,
    expiry_buffer: chrono::Duration,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_BUFFER)
    }
}

impl TokenManager {
    /// Create a token manager with the given expiry buffer.
    pub fn new(expiry_buffer: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            expiry_buffer: chrono::Duration::from_std(expiry_buffer)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    /// Replace the current token with one issued now.
    pub fn set_token(&self, token: Token) -> CachedToken {
        let cached = CachedToken::issued_now(token);
        *self.current.write() = Some(cached.clone());
        cached
    }

    /// Replace the current token with one restored from storage.
    pub fn restore_token(&self, cached: CachedToken) {
        *self.current.write() = Some(cached);
    }

    /// Get the current token if it is still usable. An expired token is
    /// cleared.
    pub fn get_token(&self) -> Option<Token> {
        let now = Utc::now();
        {
            let current = self.current.read();
            match current.as_ref() {
                None => return None,
                Some(cached) if !self.expired(cached, now) => return Some(cached.token.clone()),
                Some(_) => {}
            }
        }

        let mut current = self.current.write();
        if current
            .as_ref()
            .map(|cached| self.expired(cached, now))
            .unwrap_or(false)
        {
            *current = None;
        }
        current.as_ref().map(|cached| cached.token.clone())
    }

    /// Get the current token with its lifetime, without expiry checks.
    pub fn cached_token(&self) -> Option<CachedToken> {
        self.current.read().clone()
    }

    /// Check whether the current token should no longer be used. True when no
    /// token is held.
    pub fn is_token_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against a given instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.current
            .read()
            .as_ref()
            .map(|cached| self.expired(cached, now))
            .unwrap_or(true)
    }

    fn expired(&self, cached: &CachedToken, now: DateTime<Utc>) -> bool {
        match cached.expires_at.checked_sub_signed(self.expiry_buffer) {
            Some(deadline) => now >= deadline,
            None => true,
        }
    }

    /// Drop the current token.
    pub fn clear_token(&self) {
        *self.current.write() = None;
    }

    /// Check if a usable token is held.
    pub fn has_valid_token(&self) -> bool {
        !self.is_token_expired()
    }

    /// When the server stops accepting the current token.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current.read().as_ref().map(|cached| cached.expires_at)
    }
}

//! Authentication Service
//!
//! Owns the token lifecycle for one set of credentials: acquisition, the
//! in-memory and encrypted caches, and coordinated refresh.

use ring::digest;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::core::HttpTransport;
use crate::error::{AuthenticationError, SharedoResult};
use crate::flows::{ImpersonationGrant, TokenGrant};
use crate::telemetry::{no_op_metrics, ClientMetrics};
use crate::token::{SecureStorage, SecureStorageConfig, TokenManager, TokenRefreshManager};
use crate::types::{ClientConfig, Token};

struct AuthInner {
    grant: Arc<dyn TokenGrant>,
    grant_type: &'static str,
    token_manager: TokenManager,
    storage: SecureStorage,
    storage_key: String,
    expiry_buffer: Duration,
    metrics: Arc<dyn ClientMetrics>,
}

impl AuthInner {
    async fn authenticate(&self) -> SharedoResult<Token> {
        let result = self
            .grant
            .request_token()
            .await
            .and_then(|token| self.check_lifetime(token));
        self.metrics
            .record_token_request(self.grant_type, result.is_ok());
        let token = result?;

        let cached = self.token_manager.set_token(token.clone());
        match self.storage.store_token(&self.storage_key, &cached).await {
            Ok(true) => debug!("Token persisted to secure storage"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to persist token; continuing with in-memory token"),
        }

        info!(expires_in = token.expires_in, "Authenticated with ShareDo");
        Ok(token)
    }

    /// A token must outlive the expiry buffer to be usable at all.
    fn check_lifetime(&self, token: Token) -> SharedoResult<Token> {
        if token.expires_in <= self.expiry_buffer.as_secs() {
            warn!(
                expires_in = token.expires_in,
                expiry_buffer_secs = self.expiry_buffer.as_secs(),
                "Token endpoint issued a token that expires within the expiry buffer"
            );
            return Err(AuthenticationError::MalformedTokenResponse {
                message: format!(
                    "expires_in {}s does not exceed the {}s expiry buffer",
                    token.expires_in,
                    self.expiry_buffer.as_secs()
                ),
            }
            .into());
        }
        Ok(token)
    }
}

/// Storage key for the token of one credential and impersonation identity.
///
/// Components are length-prefixed before hashing so that no two identities
/// share a key.
fn storage_key(config: &ClientConfig) -> String {
    let mut context = digest::Context::new(&digest::SHA256);
    let mut add = |part: &str| {
        context.update(&(part.len() as u64).to_be_bytes());
        context.update(part.as_bytes());
    };

    add(config.credentials.token_endpoint.as_str());
    add(&config.credentials.client_id);
    match &config.impersonation {
        Some(impersonation) => {
            add("impersonate");
            add(&impersonation.user);
            add(&impersonation.provider);
        }
        None => add("client"),
    }

    let hash = context.finish();
    let mut key = String::from("sharedo.token.");
    for byte in hash.as_ref() {
        let _ = write!(key, "{:02x}", byte);
    }
    key
}

/// Token lifecycle for one client.
///
/// Cheap to clone; clones share the same caches and refresh coordination.
#[derive(Clone)]
pub struct AuthenticationService {
    inner: Arc<AuthInner>,
    refresh_manager: TokenRefreshManager,
    acquisition_gate: Option<TokenRefreshManager>,
}

impl AuthenticationService {
    /// Create service that requests tokens over `transport`, caching them in
    /// an in-memory encrypted store.
    pub fn new(config: &ClientConfig, transport: Arc<dyn HttpTransport>) -> SharedoResult<Self> {
        let grant = Arc::new(ImpersonationGrant::new(config, transport));
        let storage =
            SecureStorage::in_memory(SecureStorageConfig::with_master_key(config.master_key.clone()))?;
        Ok(Self::with_components(config, grant, storage, no_op_metrics()))
    }

    /// Create service with custom components.
    pub fn with_components(
        config: &ClientConfig,
        grant: Arc<dyn TokenGrant>,
        storage: SecureStorage,
        metrics: Arc<dyn ClientMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                grant,
                grant_type: config.grant_type.as_str(),
                token_manager: TokenManager::new(config.expiry_buffer),
                storage,
                storage_key: storage_key(config),
                expiry_buffer: config.expiry_buffer,
                metrics,
            }),
            refresh_manager: TokenRefreshManager::new(config.min_refresh_interval),
            acquisition_gate: config
                .single_flight_acquisition
                .then(|| TokenRefreshManager::new(std::time::Duration::ZERO)),
        }
    }

    /// Request a new token from the token endpoint, replacing the cached one.
    pub async fn authenticate(&self) -> SharedoResult<Token> {
        self.inner.authenticate().await
    }

    /// Get an access token that stays valid for at least the expiry buffer.
    ///
    /// Served from memory, then from secure storage, then from the token
    /// endpoint.
    #[instrument(name = "sharedo.get_access_token", skip(self))]
    pub async fn get_access_token(&self) -> SharedoResult<String> {
        if let Some(token) = self.inner.token_manager.get_token() {
            return Ok(token.access_token);
        }

        if let Some(cached) = self.inner.storage.get_token(&self.inner.storage_key).await {
            self.inner.token_manager.restore_token(cached);
            if let Some(token) = self.inner.token_manager.get_token() {
                debug!("Restored token from secure storage");
                return Ok(token.access_token);
            }
        }

        let token = match &self.acquisition_gate {
            Some(gate) => {
                let inner = Arc::clone(&self.inner);
                gate.execute_refresh(move || async move {
                    if let Some(token) = inner.token_manager.get_token() {
                        return Ok(token);
                    }
                    inner.authenticate().await
                })
                .await?
            }
            None => self.inner.authenticate().await?,
        };
        Ok(token.access_token)
    }

    /// Replace the token after the server rejected it.
    ///
    /// Single-flight: concurrent callers share one token request. Throttled:
    /// fails with `RefreshTooFrequent` shortly after a previous refresh.
    #[instrument(name = "sharedo.refresh_token", skip(self))]
    pub async fn refresh_token(&self) -> SharedoResult<Token> {
        let inner = Arc::clone(&self.inner);
        let result = self
            .refresh_manager
            .execute_refresh(move || async move { inner.authenticate().await })
            .await;
        self.inner.metrics.record_token_refresh(result.is_ok());
        result
    }

    /// Check if a usable token is held in memory.
    pub fn is_authenticated(&self) -> bool {
        self.inner.token_manager.has_valid_token()
    }

    /// Get the in-memory token if it is still usable.
    pub fn current_token(&self) -> Option<Token> {
        self.inner.token_manager.get_token()
    }

    /// Check if a reactive refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.refresh_manager.is_refreshing()
    }

    /// Drop the token from memory and secure storage.
    pub async fn clear_authentication(&self) {
        self.inner.token_manager.clear_token();
        if let Err(e) = self.inner.storage.remove(&self.inner.storage_key).await {
            warn!(error = %e, "Failed to remove stored token");
        }
        info!("Authentication cleared");
    }
}

//! Shared helpers for integration tests.

#![allow(dead_code)]

use secrecy::SecretString;
use serde_json::json;
use sharedo_client::{
    AuthenticationService, ClientConfig, ClientConfigBuilder, HttpTransport, ImpersonationGrant,
    InMemoryMetrics, ResilientHttpClient, SecureStorage, SecureStorageConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::{Request, Respond, ResponseTemplate};

/// Config with fast retries, pointing at `server_uri`.
pub fn test_config(server_uri: &str) -> ClientConfigBuilder {
    ClientConfigBuilder::new()
        .base_url(format!("{}/api", server_uri))
        .client_id("test-client")
        .client_secret("test-secret")
        .token_endpoint(format!("{}/connect/token", server_uri))
        .retry_delay(Duration::from_millis(10))
        .max_retry_delay(Duration::from_millis(50))
}

/// Storage with a cheap key derivation.
pub fn test_storage() -> SecureStorage {
    SecureStorage::in_memory(SecureStorageConfig {
        master_key: Some(SecretString::new("integration-test-key".to_string())),
        salt: b"integration-salt".to_vec(),
        iterations: 10,
    })
    .expect("storage")
}

/// Build a client whose token flow and API calls share `transport`.
pub fn build_client(
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
) -> (ResilientHttpClient, Arc<InMemoryMetrics>) {
    let metrics = Arc::new(InMemoryMetrics::new());
    let grant = Arc::new(ImpersonationGrant::new(&config, Arc::clone(&transport)));
    let auth = AuthenticationService::with_components(&config, grant, test_storage(), metrics.clone());
    let client = ResilientHttpClient::with_components(config, transport, auth, metrics.clone());
    (client, metrics)
}

/// Token endpoint body.
pub fn token_body(access_token: &str, expires_in: u64) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": "sharedo"
    })
}

/// Issues `token-1`, `token-2`, ... on successive calls.
#[derive(Clone, Default)]
pub struct SequentialTokens {
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl SequentialTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Arc::default(),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Respond for SequentialTokens {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let template =
            ResponseTemplate::new(200).set_body_json(token_body(&format!("token-{}", n), 3600));
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

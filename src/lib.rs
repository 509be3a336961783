//! ShareDo Client
//!
//! Authenticated, resilient HTTP client for the ShareDo API.
//!
//! # Features
//!
//! - OAuth2 token acquisition with the `Impersonate.Specified` grant
//! - In-memory token cache with an expiry buffer
//! - AES-256-GCM encrypted token persistence
//! - Single-flight, throttled token refresh
//! - Transparent re-authentication on 401
//! - Exponential backoff with jitter on 429, 5xx and network failures
//!
//! # Example
//!
//! ```rust,ignore
//! use sharedo_client::{client_config, ResilientHttpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = client_config()
//!         .base_url("https://demo.sharedo.tech")
//!         .client_id("my-client")
//!         .client_secret("my-secret")
//!         .token_endpoint("https://demo-identity.sharedo.tech/connect/token")
//!         .impersonate("jane@example.com", "idsrv")
//!         .from_env()
//!         .build()?;
//!
//!     let client = ResilientHttpClient::new(config)?;
//!     let work_types: serde_json::Value = client.get("api/modeller/types", None).await?;
//!     println!("{}", work_types);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: configuration and token data structures
//! - `error`: error hierarchy and message sanitization
//! - `core`: HTTP transport seam
//! - `flows`: token request against the identity server
//! - `token`: token manager, encrypted storage, refresh coordination
//! - `resilience`: retry strategy
//! - `auth`: authentication service tying the token pieces together
//! - `client`: the request pipeline
//! - `telemetry`: logging setup and metrics
//! - `builders`: fluent configuration builder

pub mod auth;
pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod flows;
pub mod resilience;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export main client
pub use client::{sharedo_client, RequestOptions, ResilientHttpClient};

// Re-export authentication
pub use auth::AuthenticationService;

// Re-export builders
pub use builders::{client_config, ClientConfigBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, get_user_message, sanitize_message, AuthenticationError,
    NetworkError, RateLimitError, ResponseError, ServerError, SharedoError, SharedoResult,
    StorageError, ValidationError, MAX_RETRY_AFTER,
};

// Re-export types
pub use types::{CachedToken, ClientConfig, Credentials, GrantType, ImpersonationContext, Token};

// Re-export core components
pub use crate::core::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport, MockReply,
    ReqwestHttpTransport,
};

// Re-export flows
pub use flows::{ImpersonationGrant, MockTokenGrant, TokenGrant};

// Re-export token management
pub use token::{
    EncryptedEntry, FileStorageBackend, InMemoryStorageBackend, SecureStorage,
    SecureStorageConfig, StorageBackend, TokenManager, TokenRefreshManager,
};

// Re-export resilience
pub use resilience::{RetryConfig, RetryStrategy};

// Re-export telemetry
pub use telemetry::{
    init_logging, ClientMetrics, InMemoryMetrics, LogFormat, LogLevel, LoggingConfig, NoOpMetrics,
};

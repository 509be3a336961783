//! Token Management
//!
//! Token lifecycle: in-memory holder, encrypted persistence and refresh
//! coordination.
//!
//! This module provides:
//!
//! - **Token Manager**: the current token and its expiry buffer
//! - **Secure Storage**: AES-256-GCM encrypted, TTL-aware token cache
//! - **Refresh Manager**: single-flight, throttled token refresh

pub mod cipher;
pub mod manager;
pub mod refresh;
pub mod storage;

// Token Manager
pub use manager::TokenManager;

// Secure Storage
pub use cipher::{SealedData, TokenCipher};
pub use storage::{
    create_file_backend, create_in_memory_backend, EncryptedEntry, FileStorageBackend,
    InMemoryStorageBackend, SecureStorage, SecureStorageConfig, StorageBackend,
    DEFAULT_KEY_ITERATIONS, DEFAULT_SALT, TOKEN_STORAGE_MARGIN,
};

// Refresh Manager
pub use refresh::TokenRefreshManager;

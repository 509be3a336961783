//! Token Storage
//!
//! Encrypted, TTL-aware key/value storage for tokens. Values are serialized to
//! JSON, sealed with AES-256-GCM and handed to a pluggable [`StorageBackend`]
//! which only ever sees [`EncryptedEntry`] values.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::cipher::{SealedData, TokenCipher};
use crate::error::{sanitize_message, SharedoResult, StorageError};
use crate::types::CachedToken;

/// Default PBKDF2 iteration count.
pub const DEFAULT_KEY_ITERATIONS: u32 = 100_000;

/// Default PBKDF2 salt.
pub const DEFAULT_SALT: &[u8] = b"sharedo-client.token-cache.v1";

/// Entries expire this long before the token they hold.
pub const TOKEN_STORAGE_MARGIN: Duration = Duration::from_secs(60);

/// Development-only master secret used when none is configured.
const DEFAULT_MASTER_KEY: &str = "sharedo-client-insecure-default-master-key";

/// Encrypted value as persisted by a backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEntry {
    /// Base64 ciphertext.
    pub ciphertext: String,
    /// Base64 96-bit IV.
    pub iv: String,
    /// Base64 GCM tag.
    pub auth_tag: String,
    /// Entry is dropped from this instant on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl EncryptedEntry {
    fn seal(sealed: SealedData, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            ciphertext: STANDARD.encode(sealed.ciphertext),
            iv: STANDARD.encode(sealed.iv),
            auth_tag: STANDARD.encode(sealed.auth_tag),
            expires_at,
        }
    }

    fn open(&self) -> Result<SealedData, StorageError> {
        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| StorageError::DecryptionFailed {
                    message: format!("invalid base64 in {}: {}", field, e),
                })
        };
        Ok(SealedData {
            ciphertext: decode("ciphertext", &self.ciphertext)?,
            iv: decode("iv", &self.iv)?,
            auth_tag: decode("auth_tag", &self.auth_tag)?,
        })
    }

    /// Check whether the entry has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Persistence medium for encrypted entries.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read an entry.
    async fn read(&self, key: &str) -> SharedoResult<Option<EncryptedEntry>>;

    /// Write an entry, replacing any previous one.
    async fn write(&self, key: &str, entry: EncryptedEntry) -> SharedoResult<()>;

    /// Delete an entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> SharedoResult<bool>;

    /// Delete all entries.
    async fn clear(&self) -> SharedoResult<()>;
}

/// In-memory storage backend.
#[derive(Default)]
pub struct InMemoryStorageBackend {
    entries: Mutex<HashMap<String, EncryptedEntry>>,
}

impl InMemoryStorageBackend {
    /// Create new in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the backend holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorageBackend {
    async fn read(&self, key: &str) -> SharedoResult<Option<EncryptedEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, entry: EncryptedEntry) -> SharedoResult<()> {
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SharedoResult<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn clear(&self) -> SharedoResult<()> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// File storage backend: one JSON document holding every entry.
pub struct FileStorageBackend {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileStorageBackend {
    /// Create backend for the given file. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Get file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> SharedoResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed {
                message: e.to_string(),
            }
            .into()),
        }
    }

    fn parse_entries(bytes: &[u8]) -> SharedoResult<HashMap<String, EncryptedEntry>> {
        serde_json::from_slice(bytes).map_err(|e| {
            StorageError::ReadFailed {
                message: format!("invalid storage file: {}", e),
            }
            .into()
        })
    }

    async fn load(&self) -> SharedoResult<HashMap<String, EncryptedEntry>> {
        match self.read_file().await? {
            Some(bytes) => Self::parse_entries(&bytes),
            None => Ok(HashMap::new()),
        }
    }

    async fn save(&self, entries: &HashMap<String, EncryptedEntry>) -> SharedoResult<()> {
        let write_failed = |e: std::io::Error| StorageError::WriteFailed {
            message: e.to_string(),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }

        let bytes = serde_json::to_vec_pretty(entries).map_err(|e| StorageError::Serialization {
            message: e.to_string(),
        })?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(write_failed)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_failed)?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorageBackend {
    async fn read(&self, key: &str) -> SharedoResult<Option<EncryptedEntry>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn write(&self, key: &str, entry: EncryptedEntry) -> SharedoResult<()> {
        let _guard = self.lock.lock().await;
        // A corrupt file is overwritten; an unreadable one is an error.
        let mut entries = match self.read_file().await? {
            Some(bytes) => Self::parse_entries(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "Discarding corrupt storage file");
                HashMap::new()
            }),
            None => HashMap::new(),
        };
        entries.insert(key.to_string(), entry);
        self.save(&entries).await
    }

    async fn delete(&self, key: &str) -> SharedoResult<bool> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        let existed = entries.remove(key).is_some();
        if existed {
            self.save(&entries).await?;
        }
        Ok(existed)
    }

    async fn clear(&self) -> SharedoResult<()> {
        let _guard = self.lock.lock().await;
        self.save(&HashMap::new()).await
    }
}

/// Secure storage configuration.
#[derive(Clone)]
pub struct SecureStorageConfig {
    /// Master secret. A fixed development key is used when absent.
    pub master_key: Option<SecretString>,
    /// PBKDF2 salt.
    pub salt: Vec<u8>,
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

impl Default for SecureStorageConfig {
    fn default() -> Self {
        Self {
            master_key: None,
            salt: DEFAULT_SALT.to_vec(),
            iterations: DEFAULT_KEY_ITERATIONS,
        }
    }
}

impl SecureStorageConfig {
    /// Config with the given master key and default derivation settings.
    pub fn with_master_key(master_key: Option<SecretString>) -> Self {
        Self {
            master_key,
            ..Self::default()
        }
    }
}

/// Encrypted key/value storage.
pub struct SecureStorage {
    cipher: TokenCipher,
    backend: Arc<dyn StorageBackend>,
}

impl SecureStorage {
    /// Create secure storage over a backend.
    pub fn new(config: SecureStorageConfig, backend: Arc<dyn StorageBackend>) -> SharedoResult<Self> {
        let cipher = match &config.master_key {
            Some(key) => {
                TokenCipher::derive(key.expose_secret().as_bytes(), &config.salt, config.iterations)?
            }
            None => {
                warn!("No master key configured for token storage; using the built-in development key");
                TokenCipher::derive(DEFAULT_MASTER_KEY.as_bytes(), &config.salt, config.iterations)?
            }
        };

        Ok(Self { cipher, backend })
    }

    /// Create secure storage over a fresh in-memory backend.
    pub fn in_memory(config: SecureStorageConfig) -> SharedoResult<Self> {
        Self::new(config, Arc::new(InMemoryStorageBackend::new()))
    }

    /// Encrypt and store a value. With a `ttl`, the value is dropped once it
    /// elapses.
    pub async fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> SharedoResult<()> {
        let expires_at = match ttl {
            Some(ttl) => Some(
                chrono::Duration::from_std(ttl)
                    .ok()
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .ok_or_else(|| StorageError::Serialization {
                        message: format!("invalid ttl: {:?}", ttl),
                    })?,
            ),
            None => None,
        };
        self.store_until(key, value, expires_at).await
    }

    async fn store_until<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expires_at: Option<DateTime<Utc>>,
    ) -> SharedoResult<()> {
        let plaintext = serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
            message: e.to_string(),
        })?;
        let sealed = self.cipher.encrypt(&plaintext)?;
        self.backend
            .write(key, EncryptedEntry::seal(sealed, expires_at))
            .await
    }

    /// Retrieve and decrypt a value.
    ///
    /// Returns `None` when the key is absent, the entry has expired, or it
    /// cannot be read, decrypted or parsed. Expired and corrupt entries are
    /// removed.
    pub async fn retrieve<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = match self.backend.read(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key, error = %e, "Failed to read from token storage");
                return None;
            }
        };

        if entry.is_expired_at(Utc::now()) {
            debug!(key, "Stored entry expired");
            self.evict(key).await;
            return None;
        }

        match self.decode(&entry) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %sanitize_message(&e.to_string()), "Discarding unreadable stored entry");
                self.evict(key).await;
                None
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, entry: &EncryptedEntry) -> Result<T, StorageError> {
        let plaintext = self.cipher.decrypt(&entry.open()?)?;
        serde_json::from_slice(&plaintext).map_err(|e| StorageError::Serialization {
            message: e.to_string(),
        })
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            warn!(key, error = %e, "Failed to evict stored entry");
        }
    }

    /// Remove a value.
    pub async fn remove(&self, key: &str) -> SharedoResult<()> {
        self.backend.delete(key).await.map(|_| ())
    }

    /// Remove all values.
    pub async fn clear(&self) -> SharedoResult<()> {
        self.backend.clear().await
    }

    /// Store a token so that it is evicted before the server stops accepting
    /// it. Returns `false` when the token is too short-lived to be worth
    /// storing.
    pub async fn store_token(&self, key: &str, token: &CachedToken) -> SharedoResult<bool> {
        let margin = chrono::Duration::seconds(TOKEN_STORAGE_MARGIN.as_secs() as i64);
        let evict_at = token
            .expires_at
            .checked_sub_signed(margin)
            .unwrap_or(token.expires_at);

        if token.token.expires_in <= TOKEN_STORAGE_MARGIN.as_secs() || evict_at <= Utc::now() {
            debug!(key, "Token too short-lived to store");
            return Ok(false);
        }

        self.store_until(key, token, Some(evict_at)).await?;
        Ok(true)
    }

    /// Retrieve a stored token.
    pub async fn get_token(&self, key: &str) -> Option<CachedToken> {
        self.retrieve(key).await
    }
}

/// Create in-memory storage backend.
pub fn create_in_memory_backend() -> Arc<dyn StorageBackend> {
    Arc::new(InMemoryStorageBackend::new())
}

/// Create file storage backend.
pub fn create_file_backend(path: impl Into<PathBuf>) -> Arc<dyn StorageBackend> {
    Arc::new(FileStorageBackend::new(path))
}

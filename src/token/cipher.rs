//! Token Cipher
//!
//! AES-256-GCM with a PBKDF2-HMAC-SHA256 derived key.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

use crate::error::StorageError;

/// Derived key length in bytes.
pub const KEY_LEN: usize = 32;

/// Output of one encryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedData {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

/// Authenticated cipher bound to one derived key.
pub struct TokenCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl TokenCipher {
    /// Derive the key from a master secret.
    pub fn derive(secret: &[u8], salt: &[u8], iterations: u32) -> Result<Self, StorageError> {
        let iterations =
            NonZeroU32::new(iterations).ok_or_else(|| StorageError::KeyDerivationFailed {
                message: "iteration count must be non-zero".to_string(),
            })?;

        let mut key_bytes = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            secret,
            &mut key_bytes,
        );

        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| {
            StorageError::KeyDerivationFailed {
                message: "derived key rejected by cipher".to_string(),
            }
        })?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt with a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedData, StorageError> {
        let mut iv = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut iv)
            .map_err(|_| StorageError::EncryptionFailed {
                message: "failed to generate IV".to_string(),
            })?;

        let mut in_out = plaintext.to_vec();
        let tag = self
            .key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(iv),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| StorageError::EncryptionFailed {
                message: "seal failed".to_string(),
            })?;

        Ok(SealedData {
            ciphertext: in_out,
            iv: iv.to_vec(),
            auth_tag: tag.as_ref().to_vec(),
        })
    }

    /// Decrypt and verify.
    pub fn decrypt(&self, sealed: &SealedData) -> Result<Vec<u8>, StorageError> {
        let iv: [u8; NONCE_LEN] =
            sealed
                .iv
                .as_slice()
                .try_into()
                .map_err(|_| StorageError::DecryptionFailed {
                    message: format!("IV must be {} bytes", NONCE_LEN),
                })?;

        let mut in_out = Vec::with_capacity(sealed.ciphertext.len() + sealed.auth_tag.len());
        in_out.extend_from_slice(&sealed.ciphertext);
        in_out.extend_from_slice(&sealed.auth_tag);

        let plaintext = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
            .map_err(|_| StorageError::DecryptionFailed {
                message: "authentication tag mismatch".to_string(),
            })?;

        Ok(plaintext.to_vec())
    }
}

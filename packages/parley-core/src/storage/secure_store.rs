//! # In-Memory Secure Store
//!
//! A [`SecureStorage`] backed by a process-local map. Used by tests, the
//! demo, and hosts that have no keychain (CI, desktop dev builds).
//!
//! With [`MemorySecureStore::with_encryption`] every value is sealed before
//! it is kept:
//!
//! ```text
//! stored = base64( nonce ‖ XChaCha20-Poly1305(key, value, aad = slot name) )
//! ```
//!
//! Binding the slot name as associated data means a value copied into a
//! different slot no longer opens.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::SecureStorage;
use crate::crypto::{decrypt, encoding, encrypt, Algorithm, EncryptionKey, Nonce};
use crate::error::{Error, Result};

const SEAL_ALGORITHM: Algorithm = Algorithm::XChaCha20Poly1305;

/// Process-local secure storage
pub struct MemorySecureStore {
    memory: RwLock<HashMap<String, String>>,
    /// Optional encryption key for values at rest
    encryption_key: Option<EncryptionKey>,
}

impl MemorySecureStore {
    /// Create an unencrypted store
    pub fn new() -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            encryption_key: None,
        }
    }

    /// Create a store that seals every value with `key`
    pub fn with_encryption(key: [u8; 32]) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            encryption_key: Some(EncryptionKey::from_bytes(key)),
        }
    }

    /// Number of populated slots
    pub fn len(&self) -> usize {
        self.memory.read().len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.memory.read().is_empty()
    }

    /// Raw stored form of a slot, exactly as kept in memory
    pub fn raw(&self, key: &str) -> Option<String> {
        self.memory.read().get(key).cloned()
    }

    fn seal(&self, key: &str, value: &str) -> Result<String> {
        let Some(ref enc_key) = self.encryption_key else {
            return Ok(value.to_string());
        };

        let (nonce, ciphertext) = encrypt(enc_key, value.as_bytes(), key.as_bytes(), SEAL_ALGORITHM)
            .map_err(|e| Error::StorageWriteError(e.to_string()))?;
        let mut sealed = nonce.as_bytes().to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(encoding::encode(&sealed))
    }

    fn open(&self, key: &str, stored: String) -> Result<String> {
        let Some(ref enc_key) = self.encryption_key else {
            return Ok(stored);
        };

        let data = encoding::decode(&stored)
            .map_err(|e| Error::StorageReadError(format!("Sealed value is not base64: {}", e)))?;
        let nonce_len = SEAL_ALGORITHM.nonce_size();
        if data.len() < nonce_len {
            return Err(Error::StorageReadError("Stored data too short".into()));
        }

        let (nonce, ciphertext) = data.split_at(nonce_len);
        let nonce = Nonce::from_bytes(SEAL_ALGORITHM, nonce.to_vec())?;
        let plaintext = decrypt(enc_key, &nonce, ciphertext, key.as_bytes(), SEAL_ALGORITHM)
            .map_err(|e| Error::StorageReadError(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::StorageReadError("Stored value is not UTF-8".into()))
    }
}

impl Default for MemorySecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStorage for MemorySecureStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let stored = self.memory.read().get(key).cloned();
        stored.map(|value| self.open(key, value)).transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let sealed = self.seal(key, value)?;
        self.memory.write().insert(key.to_string(), sealed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.memory.write().remove(key);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

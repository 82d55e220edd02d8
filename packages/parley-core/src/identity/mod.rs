//! # Identity Module
//!
//! Lifecycle of this device's long-term X25519 identity key.
//!
//! ## Key Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      IDENTITY KEY LIFECYCLE                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  generate_identity_key_pair()                                          │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  store_identity_key(kp, password)                                      │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  salt       = 16 random bytes                                │       │
//! │  │  wrap_key   = PBKDF2-HMAC-SHA256(password, salt, iterations) │       │
//! │  │  ciphertext = XChaCha20-Poly1305(wrap_key, private_key)      │       │
//! │  │                                                              │       │
//! │  │  StoredIdentityKey { publicKey, encryptedPrivateKey, nonce,  │       │
//! │  │                      salt, iterations, version, createdAt }  │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  unlock_identity_key(password) ──► Some(kp)   (wrong password: None)   │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  SessionKeyCache  ◄── get_identity_key_pair() reads here first         │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  logout: clear_cached_private_key()   (barrier)                        │
//! │  delete: delete_identity_key()        (record + cache)                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Semantics
//!
//! | Situation | Result |
//! |-----------|--------|
//! | Wrong password | `Ok(None)` |
//! | No stored record | `Ok(None)` |
//! | Decrypted key does not match stored public key | `Ok(None)` |
//! | Storage backend failure | `Err(StorageReadError / StorageWriteError)` |
//! | Record cannot be parsed | `Err(StorageCorrupted)` |
//! | No secure RNG | `Err(RngUnavailable)` |

mod pin;
mod session;

pub use pin::PinGate;
pub use session::SessionKeyCache;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::E2eeConfig;
use crate::crypto::kdf::domain;
use crate::crypto::{
    decrypt, derive_key_from_password, encoding, encrypt, generate_key_pair, key_fingerprint,
    random_salt, Algorithm, EncryptionKey, IdentityKeyPair, Nonce,
};
use crate::error::{Error, Result};
use crate::storage::{slots, SecureStorage};
use crate::time;

/// Current `StoredIdentityKey` format version
pub const STORED_KEY_VERSION: u32 = 1;

/// The private key is always wrapped with this AEAD
const WRAP_ALGORITHM: Algorithm = Algorithm::XChaCha20Poly1305;

/// Password-protected, at-rest form of the identity key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentityKey {
    /// Base64 X25519 public key
    pub public_key: String,
    /// Base64 wrapped private key (ciphertext + tag)
    pub encrypted_private_key: String,
    /// Base64 nonce of the wrap
    pub nonce: String,
    /// Base64 PBKDF2 salt
    pub salt: String,
    /// PBKDF2 iterations this record was written with
    pub iterations: u32,
    /// Record format version
    pub version: u32,
    /// Creation time (unix millis)
    #[serde(default)]
    pub created_at: i64,
}

impl StoredIdentityKey {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::StorageCorrupted(format!("Invalid identity key record: {}", e)))
    }

    /// Decoded public key
    pub fn public_key_bytes(&self) -> Result<[u8; 32]> {
        encoding::decode_key32(&self.public_key)
    }

    /// Fingerprint of the public key
    pub fn fingerprint(&self) -> Result<String> {
        Ok(key_fingerprint(&self.public_key_bytes()?))
    }
}

/// Associated data for the wrapped private key, bound to its public key
fn wrap_aad(public_key: &[u8; 32]) -> Vec<u8> {
    let mut aad = domain::IDENTITY_WRAP.to_vec();
    aad.extend_from_slice(public_key);
    aad
}

/// Run PBKDF2 off the async executor
async fn derive_wrapping_key(password: &str, salt: Vec<u8>, iterations: u32) -> Result<EncryptionKey> {
    let password = Zeroizing::new(password.as_bytes().to_vec());
    let key = tokio::task::spawn_blocking(move || {
        derive_key_from_password(&password, &salt, iterations)
    })
    .await??;
    Ok(EncryptionKey::from_bytes(*key))
}

/// Owner of the device identity key
pub struct IdentityKeyManager {
    storage: Arc<dyn SecureStorage>,
    session: Arc<SessionKeyCache>,
    record_slot: String,
    kdf_iterations: u32,
}

impl IdentityKeyManager {
    /// Create a manager over `storage`, sharing `session` with other components
    pub fn new(
        storage: Arc<dyn SecureStorage>,
        session: Arc<SessionKeyCache>,
        config: &E2eeConfig,
    ) -> Self {
        Self {
            storage,
            session,
            record_slot: config.storage_key(slots::IDENTITY_KEY),
            kdf_iterations: config.kdf_iterations,
        }
    }

    /// The session cache this manager writes to
    pub fn session(&self) -> &Arc<SessionKeyCache> {
        &self.session
    }

    /// Generate a fresh identity key pair (not stored)
    pub async fn generate_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        let pair = generate_key_pair()?;
        debug!(fingerprint = %pair.fingerprint(), "Generated identity key pair");
        Ok(pair)
    }

    /// Wrap `pair` under `password` and persist it, replacing any prior record
    pub async fn store_identity_key(
        &self,
        pair: &IdentityKeyPair,
        password: &str,
    ) -> Result<StoredIdentityKey> {
        let record = self
            .wrap(pair, password, time::now_timestamp_millis())
            .await?;
        self.storage
            .set(&self.record_slot, &record.to_json()?)
            .await?;

        info!(
            fingerprint = %pair.fingerprint(),
            iterations = record.iterations,
            "Stored identity key"
        );
        Ok(record)
    }

    /// Read the stored record without decrypting it
    pub async fn get_stored_identity_key(&self) -> Result<Option<StoredIdentityKey>> {
        match self.storage.get(&self.record_slot).await? {
            Some(json) => Ok(Some(StoredIdentityKey::from_json(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn has_identity_key(&self) -> Result<bool> {
        Ok(self.storage.get(&self.record_slot).await?.is_some())
    }

    /// Decrypt the stored private key with `password`
    ///
    /// A wrong password yields `Ok(None)`. So does a record whose private key
    /// does not reproduce its stored public key.
    pub async fn unlock_identity_key(&self, password: &str) -> Result<Option<IdentityKeyPair>> {
        let Some(record) = self.get_stored_identity_key().await? else {
            debug!("Unlock requested but no identity key is stored");
            return Ok(None);
        };
        if record.version != STORED_KEY_VERSION {
            return Err(Error::UnsupportedVersion(record.version));
        }

        let corrupted = |what: &str| Error::StorageCorrupted(format!("Identity key record has invalid {}", what));
        let public_key = record.public_key_bytes().map_err(|_| corrupted("publicKey"))?;
        let salt = encoding::decode(&record.salt).map_err(|_| corrupted("salt"))?;
        let nonce = encoding::decode(&record.nonce)
            .and_then(|bytes| Nonce::from_bytes(WRAP_ALGORITHM, bytes))
            .map_err(|_| corrupted("nonce"))?;
        let ciphertext =
            encoding::decode(&record.encrypted_private_key).map_err(|_| corrupted("encryptedPrivateKey"))?;
        if record.iterations == 0 || salt.is_empty() {
            return Err(corrupted("key derivation parameters"));
        }

        let wrapping_key = derive_wrapping_key(password, salt, record.iterations).await?;
        let secret = match decrypt(
            &wrapping_key,
            &nonce,
            &ciphertext,
            &wrap_aad(&public_key),
            WRAP_ALGORITHM,
        ) {
            Ok(secret) => Zeroizing::new(secret),
            Err(e) if e.is_decryption_failure() => {
                debug!("Identity key unlock failed: wrong password");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let secret: Zeroizing<[u8; 32]> = match secret.as_slice().try_into() {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(_) => {
                warn!("Unwrapped identity key has the wrong length");
                return Ok(None);
            }
        };
        let pair = IdentityKeyPair::from_private_bytes(&secret);
        if pair.public_bytes() != public_key {
            warn!("Unwrapped identity key does not match the stored public key");
            return Ok(None);
        }

        info!(fingerprint = %pair.fingerprint(), "Identity key unlocked");
        Ok(Some(pair))
    }

    /// Put an unlocked key pair into the session cache
    pub async fn cache_unlocked_private_key(&self, pair: &IdentityKeyPair) -> Result<()> {
        self.session.set(pair).await
    }

    /// Key pair from the session cache, if present
    pub async fn get_cached_private_key(&self) -> Result<Option<IdentityKeyPair>> {
        self.session.get().await
    }

    /// Drop the session-cached key; must run on logout
    pub async fn clear_cached_private_key(&self) -> Result<()> {
        self.session.clear().await
    }

    /// Canonical accessor for the local key pair
    ///
    /// 1. Session cache hit → that pair.
    /// 2. Miss with a password → unlock, cache, return.
    /// 3. Miss without a password → `None` (caller must prompt).
    ///
    /// If the session is cleared while the unlock runs, the unlocked pair is
    /// discarded and `None` is returned.
    pub async fn get_identity_key_pair(
        &self,
        password: Option<&str>,
    ) -> Result<Option<IdentityKeyPair>> {
        if let Some(pair) = self.session.get().await? {
            return Ok(Some(pair));
        }
        let Some(password) = password else {
            return Ok(None);
        };

        let epoch = self.session.epoch().await;
        let Some(pair) = self.unlock_identity_key(password).await? else {
            return Ok(None);
        };

        if self.session.set_if_epoch(&pair, epoch).await? {
            Ok(Some(pair))
        } else {
            Ok(None)
        }
    }

    /// Erase the stored record and the session cache
    pub async fn delete_identity_key(&self) -> Result<()> {
        self.storage.delete(&self.record_slot).await?;
        self.session.clear().await?;
        info!("Identity key deleted");
        Ok(())
    }

    /// Replace the identity key: delete, generate, store, cache
    ///
    /// Envelopes addressed to the old key become unreadable on this device;
    /// peers learn the new key (and a bumped key version) from the directory.
    pub async fn rotate_identity_key(&self, password: &str) -> Result<IdentityKeyPair> {
        self.delete_identity_key().await?;
        let pair = self.generate_identity_key_pair().await?;
        self.store_identity_key(&pair, password).await?;
        self.session.set(&pair).await?;
        info!(fingerprint = %pair.fingerprint(), "Identity key rotated");
        Ok(pair)
    }

    /// Re-wrap the stored key under a new password
    ///
    /// `Ok(None)` if `old_password` is wrong or no key is stored.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<Option<StoredIdentityKey>> {
        let Some(existing) = self.get_stored_identity_key().await? else {
            return Ok(None);
        };
        let Some(pair) = self.unlock_identity_key(old_password).await? else {
            return Ok(None);
        };

        let record = self.wrap(&pair, new_password, existing.created_at).await?;
        self.storage
            .set(&self.record_slot, &record.to_json()?)
            .await?;
        info!(fingerprint = %pair.fingerprint(), "Identity key password changed");
        Ok(Some(record))
    }

    async fn wrap(
        &self,
        pair: &IdentityKeyPair,
        password: &str,
        created_at: i64,
    ) -> Result<StoredIdentityKey> {
        let salt = random_salt()?;
        let wrapping_key = derive_wrapping_key(password, salt.to_vec(), self.kdf_iterations).await?;

        let public_key = pair.public_bytes();
        let (nonce, ciphertext) = encrypt(
            &wrapping_key,
            pair.secret_bytes().as_ref(),
            &wrap_aad(&public_key),
            WRAP_ALGORITHM,
        )?;

        Ok(StoredIdentityKey {
            public_key: encoding::encode(&public_key),
            encrypted_private_key: encoding::encode(&ciphertext),
            nonce: encoding::encode(nonce.as_bytes()),
            salt: encoding::encode(&salt),
            iterations: self.kdf_iterations,
            version: STORED_KEY_VERSION,
            created_at,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

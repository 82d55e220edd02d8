//! # Encryption Module
//!
//! Authenticated symmetric encryption for envelopes and wrapped keys.
//!
//! ## Encryption Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ENVELOPE ENCRYPTION FLOW                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Step 1: Pairwise shared secret (same value every time for a pair)     │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  Sender device X25519 private key                            │       │
//! │  │           ×                                                  │       │
//! │  │  Recipient device X25519 public key                          │       │
//! │  │           ↓                                                  │       │
//! │  │  Shared Secret (32 bytes)                                    │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Step 2: Envelope key                                                  │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  HKDF-SHA256(                                                │       │
//! │  │    ikm  = shared_secret,                                    │       │
//! │  │    salt = none,                                             │       │
//! │  │    info = "parley-envelope-key-v1"                          │       │
//! │  │  )                                                          │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  Step 3: Fresh random nonce from the OS RNG (every call)               │
//! │                                                                         │
//! │  Step 4: AEAD(key, nonce, plaintext, aad) → ciphertext ‖ tag          │
//! │                                                                         │
//! │  Output: (nonce, ciphertext_with_tag)                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithms
//!
//! | Wire tag | AEAD | Nonce |
//! |----------|------|-------|
//! | `x25519-xchacha20poly1305-v1` | XChaCha20-Poly1305 (default) | 24 bytes |
//! | `x25519-aes256gcm-v1` | AES-256-GCM | 12 bytes |
//!
//! Nonces are never derived; a 24-byte random nonce makes collisions
//! negligible for any realistic number of messages per key pair.

use std::fmt;
use std::str::FromStr;

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305,
};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use super::kdf;
use super::keys::fill_random;
use crate::error::{Error, Result};

/// Size of the symmetric key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the Poly1305 / GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// AEAD algorithm of an envelope, always carried explicitly on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// X25519 + HKDF + XChaCha20-Poly1305
    #[default]
    #[serde(rename = "x25519-xchacha20poly1305-v1")]
    XChaCha20Poly1305,
    /// X25519 + HKDF + AES-256-GCM
    #[serde(rename = "x25519-aes256gcm-v1")]
    Aes256Gcm,
}

impl Algorithm {
    /// Stable wire tag
    pub fn tag(&self) -> &'static str {
        match self {
            Algorithm::XChaCha20Poly1305 => "x25519-xchacha20poly1305-v1",
            Algorithm::Aes256Gcm => "x25519-aes256gcm-v1",
        }
    }

    /// Nonce length required by this algorithm
    pub fn nonce_size(&self) -> usize {
        match self {
            Algorithm::XChaCha20Poly1305 => 24,
            Algorithm::Aes256Gcm => 12,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "x25519-xchacha20poly1305-v1" => Ok(Algorithm::XChaCha20Poly1305),
            "x25519-aes256gcm-v1" => Ok(Algorithm::Aes256Gcm),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// A nonce (number used once) for one AEAD call
///
/// ## Critical Security Requirement
///
/// **NEVER reuse a nonce with the same key!** Nonces are only ever created
/// by [`Nonce::random`] for encryption, or parsed from the wire for
/// decryption.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    /// Generate a random nonce sized for `algorithm`
    pub fn random(algorithm: Algorithm) -> Result<Self> {
        let mut bytes = vec![0u8; algorithm.nonce_size()];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Wrap received nonce bytes, checking the length for `algorithm`
    pub fn from_bytes(algorithm: Algorithm, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != algorithm.nonce_size() {
            return Err(Error::DecryptionFailed(format!(
                "Nonce must be {} bytes for {}, got {}",
                algorithm.nonce_size(),
                algorithm,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A shared secret derived from X25519 key exchange
///
/// Never used directly as a cipher key; see [`SharedSecret::derive_key`].
#[derive(ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl SharedSecret {
    /// Create from raw DH output
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes (for key derivation)
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Derive the envelope key for this device pair
    pub fn derive_key(&self) -> Result<EncryptionKey> {
        Ok(EncryptionKey(kdf::derive_envelope_key(self.as_bytes())?))
    }
}

/// A 256-bit symmetric key
///
/// Zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Encrypt `plaintext` with a fresh random nonce
///
/// ## Returns
///
/// Tuple of (nonce, ciphertext_with_tag)
///
/// ## Example
///
/// ```ignore
/// let key = EncryptionKey::from_bytes([0u8; 32]);
/// let (nonce, ciphertext) = encrypt(&key, b"hello", b"context", Algorithm::default())?;
/// ```
pub fn encrypt(
    key: &EncryptionKey,
    plaintext: &[u8],
    aad: &[u8],
    algorithm: Algorithm,
) -> Result<(Nonce, Vec<u8>)> {
    let nonce = Nonce::random(algorithm)?;
    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = match algorithm {
        Algorithm::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;
            cipher.encrypt(
                chacha20poly1305::XNonce::from_slice(nonce.as_bytes()),
                payload,
            )
        }
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;
            cipher.encrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), payload)
        }
    }
    .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    Ok((nonce, ciphertext))
}

/// Decrypt and authenticate `ciphertext`
///
/// ## Errors
///
/// Returns `DecryptionFailed` if:
/// - The ciphertext was tampered with
/// - The AAD doesn't match
/// - The key is wrong
/// - The nonce is wrong
pub fn decrypt(
    key: &EncryptionKey,
    nonce: &Nonce,
    ciphertext: &[u8],
    aad: &[u8],
    algorithm: Algorithm,
) -> Result<Vec<u8>> {
    if nonce.as_bytes().len() != algorithm.nonce_size() {
        return Err(Error::DecryptionFailed("Nonce length mismatch".into()));
    }
    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    let plaintext = match algorithm {
        Algorithm::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| Error::DecryptionFailed(format!("Invalid key: {}", e)))?;
            cipher.decrypt(
                chacha20poly1305::XNonce::from_slice(nonce.as_bytes()),
                payload,
            )
        }
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| Error::DecryptionFailed(format!("Invalid key: {}", e)))?;
            cipher.decrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), payload)
        }
    };

    plaintext
        .map_err(|_| Error::DecryptionFailed("Decryption failed: authentication tag mismatch".into()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_key_pair;
    use std::collections::HashSet;

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes([7u8; KEY_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        for algorithm in [Algorithm::XChaCha20Poly1305, Algorithm::Aes256Gcm] {
            let key = test_key();
            let (nonce, ciphertext) = encrypt(&key, b"Hello, Bob!", b"ctx", algorithm).unwrap();

            assert_eq!(nonce.as_bytes().len(), algorithm.nonce_size());
            assert_eq!(ciphertext.len(), b"Hello, Bob!".len() + TAG_SIZE);

            let decrypted = decrypt(&key, &nonce, &ciphertext, b"ctx", algorithm).unwrap();
            assert_eq!(decrypted, b"Hello, Bob!");
        }
    }

    #[test]
    fn test_pairwise_roundtrip_from_either_side() {
        let alice = generate_key_pair().unwrap();
        let bob = generate_key_pair().unwrap();

        let alice_key = alice
            .diffie_hellman(&bob.public_bytes())
            .unwrap()
            .derive_key()
            .unwrap();
        let bob_key = bob
            .diffie_hellman(&alice.public_bytes())
            .unwrap()
            .derive_key()
            .unwrap();

        let (nonce, ciphertext) =
            encrypt(&alice_key, "héllo 👋".as_bytes(), b"", Algorithm::default()).unwrap();
        let plaintext = decrypt(&bob_key, &nonce, &ciphertext, b"", Algorithm::default()).unwrap();

        assert_eq!(plaintext, "héllo 👋".as_bytes());
    }

    #[test]
    fn test_wrong_key_fails() {
        let (nonce, ciphertext) =
            encrypt(&test_key(), b"secret", b"", Algorithm::default()).unwrap();
        let wrong = EncryptionKey::from_bytes([8u8; KEY_SIZE]);

        let result = decrypt(&wrong, &nonce, &ciphertext, b"", Algorithm::default());
        assert!(matches!(result, Err(ref e) if e.is_decryption_failure()));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let (nonce, mut ciphertext) = encrypt(&key, b"secret", b"", Algorithm::default()).unwrap();
        ciphertext[0] ^= 0xFF;

        assert!(decrypt(&key, &nonce, &ciphertext, b"", Algorithm::default()).is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key();
        let (nonce, ciphertext) = encrypt(&key, b"secret", b"aad-1", Algorithm::default()).unwrap();

        assert!(decrypt(&key, &nonce, &ciphertext, b"aad-2", Algorithm::default()).is_err());
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let key = test_key();
        let (_, ciphertext) = encrypt(&key, b"secret", b"", Algorithm::default()).unwrap();
        let other = Nonce::random(Algorithm::default()).unwrap();

        assert!(decrypt(&key, &other, &ciphertext, b"", Algorithm::default()).is_err());
    }

    #[test]
    fn test_algorithm_mismatch_fails() {
        let key = test_key();
        let (nonce, ciphertext) =
            encrypt(&key, b"secret", b"", Algorithm::XChaCha20Poly1305).unwrap();

        let result = decrypt(&key, &nonce, &ciphertext, b"", Algorithm::Aes256Gcm);
        assert!(matches!(result, Err(Error::DecryptionFailed(_))));
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            let (nonce, _) = encrypt(&key, b"x", b"", Algorithm::default()).unwrap();
            assert!(seen.insert(nonce), "nonce repeated under the same key");
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_algorithm_tags() {
        assert_eq!(
            "x25519-xchacha20poly1305-v1".parse::<Algorithm>().unwrap(),
            Algorithm::XChaCha20Poly1305
        );
        assert_eq!(Algorithm::Aes256Gcm.to_string(), "x25519-aes256gcm-v1");
        assert!(matches!(
            "rot13".parse::<Algorithm>(),
            Err(Error::UnsupportedAlgorithm(_))
        ));

        let json = serde_json::to_string(&Algorithm::XChaCha20Poly1305).unwrap();
        assert_eq!(json, "\"x25519-xchacha20poly1305-v1\"");
    }

    #[test]
    fn test_nonce_length_validation() {
        assert!(Nonce::from_bytes(Algorithm::XChaCha20Poly1305, vec![0u8; 24]).is_ok());
        assert!(Nonce::from_bytes(Algorithm::XChaCha20Poly1305, vec![0u8; 12]).is_err());
        assert!(Nonce::from_bytes(Algorithm::Aes256Gcm, vec![0u8; 12]).is_ok());
    }
}

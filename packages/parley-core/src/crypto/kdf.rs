//! # Key Derivation Functions
//!
//! Password-based wrapping keys and pairwise envelope keys.
//!
//! ## Key Derivation Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION PATHS                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    ACCOUNT PASSWORD                             │   │
//! │  │                                                                 │   │
//! │  │  PBKDF2-HMAC-SHA256(                                           │   │
//! │  │    password   = account password,                              │   │
//! │  │    salt       = 16 random bytes (stored in the record),        │   │
//! │  │    iterations = stored per record,                             │   │
//! │  │  )                                                             │   │
//! │  │                                                                 │   │
//! │  │  → 32-byte wrapping key for the identity private key          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    X25519 SHARED SECRET                         │   │
//! │  │                                                                 │   │
//! │  │  HKDF-SHA256(                                                  │   │
//! │  │    ikm  = shared_secret,                                      │   │
//! │  │    salt = none,                                               │   │
//! │  │    info = "parley-envelope-key-v1"                            │   │
//! │  │  )                                                            │   │
//! │  │                                                                 │   │
//! │  │  → 32-byte envelope key for one device pair                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The iteration count is always an argument. Records written with an older
//! default keep unlocking after the default is raised.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::keys::fill_random;
use crate::error::{Error, Result};

/// Salt length for password-derived keys
pub const SALT_SIZE: usize = 16;

/// Domain separation strings for HKDF and AEAD associated data
pub mod domain {
    /// Info string for pairwise envelope keys
    pub const ENVELOPE_KEY: &[u8] = b"parley-envelope-key-v1";

    /// Associated data prefix for envelope ciphertexts
    pub const ENVELOPE_AAD: &[u8] = b"parley-envelope-v1";

    /// Associated data for the password-wrapped identity private key
    pub const IDENTITY_WRAP: &[u8] = b"parley-identity-key-v1";
}

/// Derive a 32-byte key from a password with PBKDF2-HMAC-SHA256
///
/// This is deliberately slow. Async callers should run it through
/// `tokio::task::spawn_blocking`.
pub fn derive_key_from_password(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; 32]>> {
    if iterations == 0 {
        return Err(Error::KeyDerivationFailed(
            "Iteration count must be positive".into(),
        ));
    }
    if salt.is_empty() {
        return Err(Error::KeyDerivationFailed("Salt must not be empty".into()));
    }

    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password, salt, iterations, key.as_mut());
    Ok(key)
}

/// Derive the envelope key from a raw X25519 output
pub fn derive_envelope_key(dh_output: &[u8; 32]) -> Result<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(None, dh_output);

    let mut key = [0u8; 32];
    hkdf.expand(domain::ENVELOPE_KEY, &mut key)
        .map_err(|_| Error::KeyDerivationFailed("Failed to derive envelope key".into()))?;

    Ok(key)
}

/// Fresh random salt for a password-derived key
pub fn random_salt() -> Result<[u8; SALT_SIZE]> {
    let mut salt = [0u8; SALT_SIZE];
    fill_random(&mut salt)?;
    Ok(salt)
}

/// Short, display-safe fingerprint of a public key
///
/// First 8 bytes of SHA-256, hex encoded. Used in logs and for comparing
/// keys out of band.
pub fn key_fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..8])
}

// ============================================================================
// TESTS
// ============================================================================

//! # Key Management
//!
//! Key-pair generation for a single device.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  IdentityKeyPair (X25519)                                       │   │
//! │  │  ─────────────────────────                                       │   │
//! │  │                                                                  │   │
//! │  │  Purpose:                                                       │   │
//! │  │  • Long-term key of one device                                  │   │
//! │  │  • Deriving pairwise shared secrets with other devices          │   │
//! │  │                                                                  │   │
//! │  │  Format:                                                        │   │
//! │  │  • Private key: 32 bytes (never leaves the device unwrapped)   │   │
//! │  │  • Public key: 32 bytes (published via the device directory)   │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SigningKeyPair (Ed25519)                                       │   │
//! │  │  ─────────────────────────                                       │   │
//! │  │                                                                  │   │
//! │  │  Detached signing key, reserved for authenticating devices.     │   │
//! │  │  Not used by the envelope protocol itself.                      │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every generator draws its 32-byte seed from the operating system RNG and
//! returns [`Error::RngUnavailable`] if that source fails. There is no
//! fallback generator.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::encoding;
use super::encryption::SharedSecret;
use super::kdf::key_fingerprint;
use crate::error::{Error, Result};

/// Size of X25519 / Ed25519 keys in bytes
pub const KEY_SIZE: usize = 32;

/// Fill `buf` from the OS random source, failing closed
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| Error::RngUnavailable(e.to_string()))
}

/// X25519 key pair identifying one device
///
/// ## Security
///
/// - The private scalar is zeroized when dropped
/// - `Debug` output only shows the public key fingerprint
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    /// Private key (secret)
    #[zeroize(skip)] // x25519_dalek handles its own zeroization
    secret: StaticSecret,
    /// Public key (derived from secret)
    #[zeroize(skip)]
    public: X25519PublicKey,
}

impl IdentityKeyPair {
    /// Generate a new key pair from a fresh OS-random seed
    pub fn generate() -> Result<Self> {
        let mut seed = Zeroizing::new([0u8; KEY_SIZE]);
        fill_random(seed.as_mut())?;
        Ok(Self::from_private_bytes(&seed))
    }

    /// Rebuild a key pair from its private key bytes
    pub fn from_private_bytes(bytes: &[u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair from a base64 private key
    pub fn from_private_base64(encoded: &str) -> Result<Self> {
        let mut bytes = encoding::decode_key32(encoded)?;
        let pair = Self::from_private_bytes(&bytes);
        bytes.zeroize();
        Ok(pair)
    }

    /// Get the private key bytes (for wrapping/storage)
    ///
    /// ## Security Warning
    ///
    /// Only use this for secure storage. Never log or transmit these bytes.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Public key in the base64 form used on the wire
    pub fn public_key_base64(&self) -> String {
        encoding::encode(&self.public_bytes())
    }

    /// Short fingerprint of the public key, safe to log and display
    pub fn fingerprint(&self) -> String {
        key_fingerprint(&self.public_bytes())
    }

    /// Perform X25519 Diffie-Hellman with another device's public key
    ///
    /// Both sides compute the same value:
    /// - A: a_secret × b_public
    /// - B: b_secret × a_public
    ///
    /// The result is deterministic for a given pair of devices; there is no
    /// per-message ratchet. Low-order public keys, which would force an
    /// all-zero output, are rejected.
    pub fn diffie_hellman(&self, their_public: &[u8; KEY_SIZE]) -> Result<SharedSecret> {
        let their_public = X25519PublicKey::from(*their_public);
        let shared = self.secret.diffie_hellman(&their_public);
        if !shared.was_contributory() {
            return Err(Error::InvalidKey("Public key is a low-order point".into()));
        }
        Ok(SharedSecret::from_bytes(shared.to_bytes()))
    }
}

impl Clone for IdentityKeyPair {
    fn clone(&self) -> Self {
        Self::from_private_bytes(&self.secret_bytes())
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Ed25519 signing keypair
#[derive(ZeroizeOnDrop)]
pub struct SigningKeyPair {
    /// Private signing key (secret)
    #[zeroize(skip)] // ed25519_dalek::SigningKey handles its own zeroization
    secret: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random signing keypair
    pub fn generate() -> Result<Self> {
        let mut seed = Zeroizing::new([0u8; KEY_SIZE]);
        fill_random(seed.as_mut())?;
        Ok(Self::from_bytes(&seed))
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8; KEY_SIZE]) -> Self {
        Self {
            secret: SigningKey::from_bytes(bytes),
        }
    }

    /// Get the secret key bytes (for backup/storage)
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.verifying_key().to_bytes()
    }

    /// Get the verifying key for signature verification
    pub fn verifying_key(&self) -> VerifyingKey {
        self.secret.verifying_key()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.secret
    }
}

/// Generate a device identity key pair
pub fn generate_key_pair() -> Result<IdentityKeyPair> {
    IdentityKeyPair::generate()
}

/// Generate a detached signing key pair
pub fn generate_signing_key_pair() -> Result<SigningKeyPair> {
    SigningKeyPair::generate()
}

/// Compute the pairwise shared secret between our private key and a peer's public key
pub fn derive_shared_secret(
    ours: &IdentityKeyPair,
    their_public: &[u8; KEY_SIZE],
) -> Result<SharedSecret> {
    ours.diffie_hellman(their_public)
}

// ============================================================================
// TESTS
// ============================================================================

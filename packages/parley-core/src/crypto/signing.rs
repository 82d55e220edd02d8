//! # Digital Signatures
//!
//! Detached Ed25519 signatures. The envelope protocol does not sign
//! envelopes today; this is the primitive device-authentication features
//! will build on.
//!
//! ```text
//!   sign(keypair, message)            → Signature (64 bytes, deterministic)
//!   verify(public_key, message, sig)  → Ok(()) | Err(VerificationFailed)
//! ```

use ed25519_dalek::{Signature as Ed25519Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use super::encoding;
use super::keys::SigningKeyPair;
use crate::error::{Error, Result};

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// An Ed25519 signature, base64 encoded on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create from a slice (must be exactly 64 bytes)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; SIGNATURE_SIZE] = slice.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "Signature must be {} bytes, got {}",
                SIGNATURE_SIZE,
                slice.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Base64 form
    pub fn to_base64(&self) -> String {
        encoding::encode(&self.0)
    }

    /// Parse the base64 form
    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::from_slice(&encoding::decode(encoded)?)
    }
}

impl TryFrom<String> for Signature {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_base64(&value)
    }
}

impl From<Signature> for String {
    fn from(sig: Signature) -> Self {
        sig.to_base64()
    }
}

/// Sign a message with Ed25519
pub fn sign(keypair: &SigningKeyPair, message: &[u8]) -> Signature {
    Signature(keypair.signing_key().sign(message).to_bytes())
}

/// Verify an Ed25519 signature
///
/// `Ok(())` if valid, `Err(VerificationFailed)` if not, `Err(InvalidKey)`
/// if `public_key` is not a valid curve point.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &Signature) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| Error::InvalidKey(format!("Invalid public key: {}", e)))?;

    verifying_key
        .verify(message, &Ed25519Signature::from_bytes(&signature.0))
        .map_err(|_| Error::VerificationFailed)
}

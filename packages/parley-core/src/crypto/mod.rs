//! # Cryptography Module
//!
//! Every raw cryptographic operation used by Parley Core lives here, so the
//! identity, envelope and reconciliation layers never handle algorithm
//! parameters directly.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    DEVICE KEYS                                  │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  OS RNG (fails closed) ──► 32-byte seed ──► X25519 key pair    │   │
//! │  │                                                                 │   │
//! │  │  At rest: private key wrapped with                             │   │
//! │  │    PBKDF2-HMAC-SHA256(password, salt, iterations)              │   │
//! │  │    + XChaCha20-Poly1305                                        │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 ENVELOPE ENCRYPTION                             │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  1. Key Exchange: X25519                                       │   │
//! │  │     Sender device private × Recipient device public            │   │
//! │  │                                                                 │   │
//! │  │  2. Key Derivation: HKDF-SHA256                                │   │
//! │  │     info = "parley-envelope-key-v1"                            │   │
//! │  │                                                                 │   │
//! │  │  3. AEAD: XChaCha20-Poly1305 (default) or AES-256-GCM          │   │
//! │  │     • random nonce per call                                    │   │
//! │  │     • 128-bit authentication tag                               │   │
//! │  │     • envelope metadata bound as associated data               │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | X25519 | Pairwise device key exchange |
//! | HKDF-SHA256 | Envelope key derivation |
//! | XChaCha20-Poly1305 | Envelope and key-wrap AEAD |
//! | AES-256-GCM | Alternate envelope AEAD |
//! | PBKDF2-HMAC-SHA256 | Password-derived wrapping key |
//! | Ed25519 | Detached signatures |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: secret keys and derived keys are zeroized when dropped
//! 2. **Secure Random**: `rand::rngs::OsRng` only, with no weaker fallback
//! 3. **No Nonce Reuse**: every encryption draws a fresh random nonce

pub mod encoding;
mod encryption;
pub mod kdf;
mod keys;
mod signing;

pub use encryption::{
    decrypt, encrypt, Algorithm, EncryptionKey, Nonce, SharedSecret, KEY_SIZE, TAG_SIZE,
};
pub use kdf::{derive_key_from_password, key_fingerprint, random_salt};
pub use keys::{
    derive_shared_secret, fill_random, generate_key_pair, generate_signing_key_pair,
    IdentityKeyPair, SigningKeyPair,
};
pub use signing::{sign, verify, Signature, SIGNATURE_SIZE};

/// Size of public keys in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

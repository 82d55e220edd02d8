//! # Error Handling
//!
//! Error types for the Parley E2EE core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Configuration Errors                                              │
//! │  │   └── InvalidConfig         - Rejected configuration value          │
//! │  │                                                                      │
//! │  ├── Identity Errors                                                   │
//! │  │   └── KeyDerivationFailed   - Failed to derive keys                 │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── EncryptionFailed      - Encryption operation failed           │
//! │  │   ├── DecryptionFailed      - Cannot decrypt (wrong key / tampered) │
//! │  │   ├── VerificationFailed    - Signature verification failed         │
//! │  │   ├── InvalidKey            - Invalid key format/length             │
//! │  │   ├── UnsupportedAlgorithm  - Unknown `alg` tag                     │
//! │  │   └── RngUnavailable        - No secure random source (fatal)       │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── StorageReadError      - Failed to read from secure storage    │
//! │  │   ├── StorageWriteError     - Failed to write to secure storage     │
//! │  │   └── StorageCorrupted      - Stored record cannot be parsed        │
//! │  │                                                                      │
//! │  ├── Collaborator Errors                                               │
//! │  │   ├── DirectoryError        - Device directory call failed          │
//! │  │   └── TransportError        - Message transport call failed         │
//! │  │                                                                      │
//! │  └── Envelope Errors                                                   │
//! │      └── UnsupportedVersion    - Unknown envelope/record version       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Expected outcomes (a wrong password, one malformed recipient key, an
//! envelope this device cannot open) are not errors at the API surface: the
//! operations return `Ok(None)` or skip the item. `Error` values that reach a
//! caller are either environment failures (storage, RNG) or programming
//! errors.

use thiserror::Error;

/// Result type alias for Parley Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Parley Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors (100-199)
    // ========================================================================
    /// A configuration value was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Identity Errors (200-299)
    // ========================================================================
    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================
    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Ciphertext could not be opened (wrong key, wrong nonce or tampered data)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    VerificationFailed,

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Algorithm tag is not one we implement
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The operating system did not provide secure randomness
    #[error("No secure random source available: {0}")]
    RngUnavailable(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================
    /// Failed to read from secure storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to secure storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Stored record exists but cannot be parsed
    #[error("Stored data corrupted: {0}")]
    StorageCorrupted(String),

    // ========================================================================
    // Collaborator Errors (500-599)
    // ========================================================================
    /// Device directory lookup failed
    #[error("Device directory error: {0}")]
    DirectoryError(String),

    /// Message transport call failed
    #[error("Transport error: {0}")]
    TransportError(String),

    // ========================================================================
    // Envelope Errors (700-799)
    // ========================================================================
    /// Envelope or record format version is not supported
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================
    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code for the FFI layer
    ///
    /// Error codes are organized by category:
    /// - 100-199: Configuration
    /// - 200-299: Identity
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Directory / transport
    /// - 700-799: Envelopes
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) => 100,

            Error::KeyDerivationFailed(_) => 203,

            Error::EncryptionFailed(_) => 300,
            Error::DecryptionFailed(_) => 301,
            Error::VerificationFailed => 303,
            Error::InvalidKey(_) => 304,
            Error::UnsupportedAlgorithm(_) => 305,
            Error::RngUnavailable(_) => 306,

            Error::StorageReadError(_) => 401,
            Error::StorageWriteError(_) => 402,
            Error::StorageCorrupted(_) => 404,

            Error::DirectoryError(_) => 501,
            Error::TransportError(_) => 505,

            Error::UnsupportedVersion(_) => 701,

            Error::Internal(_) => 900,
            Error::SerializationError(_) => 902,
            Error::DeserializationError(_) => 903,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by retrying later or by user
    /// action; everything else indicates a broken environment.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DirectoryError(_)
                | Error::TransportError(_)
                | Error::DecryptionFailed(_)
                | Error::InvalidKey(_)
        )
    }

    /// True for the "cannot decrypt" class
    ///
    /// Callers that process batches (reconciliation) skip items that fail
    /// with this class and keep going.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            Error::DecryptionFailed(_) | Error::UnsupportedAlgorithm(_) | Error::UnsupportedVersion(_)
        )
    }

    /// True for failures that must never be swallowed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RngUnavailable(_)
                | Error::StorageReadError(_)
                | Error::StorageWriteError(_)
                | Error::Internal(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::DeserializationError(format!("Invalid base64: {}", err))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Background task failed: {}", err))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidConfig("x".into()).code(), 100);
        assert_eq!(Error::EncryptionFailed("test".into()).code(), 300);
        assert_eq!(Error::StorageReadError("io".into()).code(), 401);
        assert_eq!(Error::TransportError("down".into()).code(), 505);
        assert_eq!(Error::UnsupportedVersion(2).code(), 701);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_decryption_failure_is_distinguishable() {
        assert!(Error::DecryptionFailed("tag".into()).is_decryption_failure());
        assert!(Error::UnsupportedAlgorithm("rot13".into()).is_decryption_failure());
        assert!(!Error::StorageReadError("io".into()).is_decryption_failure());
        assert!(!Error::RngUnavailable("none".into()).is_decryption_failure());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(Error::RngUnavailable("none".into()).is_fatal());
        assert!(Error::StorageWriteError("disk full".into()).is_fatal());
        assert!(!Error::DecryptionFailed("tag".into()).is_fatal());
        assert!(!Error::TransportError("offline".into()).is_fatal());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::TransportError("offline".into()).is_recoverable());
        assert!(Error::DecryptionFailed("tag".into()).is_recoverable());
        assert!(!Error::RngUnavailable("none".into()).is_recoverable());
    }

    #[test]
    fn test_base64_conversion() {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

        let err: Error = BASE64.decode("not base64!!").unwrap_err().into();
        assert!(matches!(err, Error::DeserializationError(_)));
    }
}

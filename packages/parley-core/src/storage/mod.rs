//! # Storage Module
//!
//! The secure-storage collaborator the core persists its secrets through.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SECURE STORAGE                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SecureStorage trait (async, string values)                     │   │
//! │  │  ──────────────────────────────────────────                      │   │
//! │  │                                                                 │   │
//! │  │  • get(key)         → Option<String>                           │   │
//! │  │  • set(key, value)                                              │   │
//! │  │  • delete(key)                                                  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Implemented by the host app over:                                     │
//! │  iOS Keychain · Android Keystore · OS keyring                          │
//! │                                                                         │
//! │  Slots written by the core (prefixed by the configured namespace):     │
//! │  ┌──────────────────────────┬──────────────────────────────────────┐   │
//! │  │  identity_key            │  password-wrapped StoredIdentityKey  │   │
//! │  │  session_private_key     │  unlocked private key (session only) │   │
//! │  │  unlock_pin              │  local UI unlock PIN                 │   │
//! │  └──────────────────────────┴──────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Access control on the storage area is the platform's job. Every failure
//! the backend reports is surfaced as `StorageReadError` / `StorageWriteError`
//! and never swallowed.

mod secure_store;

pub use secure_store::MemorySecureStore;

use async_trait::async_trait;

use crate::error::Result;

/// Slot names inside the configured storage namespace
pub mod slots {
    /// Password-wrapped identity key record (JSON)
    pub const IDENTITY_KEY: &str = "identity_key";

    /// Session-unlocked private key (base64)
    pub const SESSION_PRIVATE_KEY: &str = "session_private_key";

    /// Local unlock PIN
    pub const UNLOCK_PIN: &str = "unlock_pin";
}

/// Platform secure storage
///
/// Values are opaque strings. Deleting a missing key is not an error.
#[async_trait]
pub trait SecureStorage: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value
    async fn delete(&self, key: &str) -> Result<()>;
}

//! # Parley Core
//!
//! Multi-device end-to-end encryption for the Parley messaging client.
//! Every message is encrypted separately for each registered device of each
//! recipient, so the server only ever relays ciphertext.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         PARLEY CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────────┐  │
//! │  │    Identity      │  │    Envelope      │  │     Reconcile        │  │
//! │  │                  │  │                  │  │                      │  │
//! │  │ - Wrapped key    │  │ - Per-device     │  │ - New device signal  │  │
//! │  │ - Session cache  │  │   envelopes      │  │ - Re-encrypt history │  │
//! │  │ - PIN gate       │  │ - Selection      │  │ - Directory/Transport│  │
//! │  └────────┬─────────┘  └────────┬─────────┘  └──────────┬───────────┘  │
//! │           │                     │                       │              │
//! │           └─────────────────────┴───────────────────────┘              │
//! │                                 │                                       │
//! │  ┌──────────────────┐  ┌────────┴─────────┐                             │
//! │  │     Storage      │  │      Crypto      │                             │
//! │  │                  │  │                  │                             │
//! │  │ - Secure store   │  │ - X25519 + HKDF  │                             │
//! │  │   (Keychain /    │  │ - XChaCha / GCM  │                             │
//! │  │    Keystore)     │  │ - PBKDF2         │                             │
//! │  └──────────────────┘  └──────────────────┘                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Work factors, preview size, storage namespace
//! - [`crypto`] - Cryptographic primitives (keys, AEAD, KDF, signing)
//! - [`storage`] - Secure key-value storage seam
//! - [`identity`] - Password-wrapped identity key, session cache, PIN
//! - [`envelope`] - Envelope encryption, selection and decryption
//! - [`reconcile`] - Re-encrypting history for newly added devices
//!
//! ## Security Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SECURITY LAYERS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Layer 1: Identity at rest (PBKDF2-SHA256 + XChaCha20-Poly1305)        │
//! │  ──────────────────────────────────────────────────────────            │
//! │  The X25519 private key is stored only wrapped under a key derived     │
//! │  from the user's password. The unwrapped key lives in a session slot   │
//! │  that logout clears before any later operation can read it.           │
//! │                                                                         │
//! │  Layer 2: Per-device envelopes (X25519 + HKDF + AEAD)                  │
//! │  ────────────────────────────────────────────────────                   │
//! │  Each recipient device gets its own ciphertext. Routing metadata is    │
//! │  bound as associated data, so an envelope cannot be re-addressed.     │
//! │                                                                         │
//! │  Layer 3: Self envelope                                                │
//! │  ──────────────────────                                                 │
//! │  The sender always encrypts a copy to itself. It is the only source    │
//! │  of plaintext when history is re-encrypted for a new device.          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod reconcile;
pub mod storage;
/// Timestamp helpers for record metadata.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::E2eeConfig;
pub use crypto::{Algorithm, IdentityKeyPair};
pub use envelope::{EncryptedMessage, LocalDevice, MessageEnvelope, RecipientDevice};
pub use error::{Error, Result};
pub use identity::{IdentityKeyManager, PinGate, SessionKeyCache, StoredIdentityKey};
pub use reconcile::{
    DeviceDirectory, MessageTransport, ReconcileOutcome, ReconcileReport, Reconciler,
    ReencryptRequest,
};
pub use storage::SecureStorage;

// ============================================================================
// CORE INSTANCE
// ============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use envelope::EnvelopeCodec;

/// One device's E2EE core, wired around its collaborators
///
/// Constructed explicitly by the host; there is no process-wide instance.
/// Several cores (for example one per signed-in account in tests) can live
/// side by side as long as they use separate storage namespaces.
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        PARLEY CORE LIFECYCLE                            │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. Construct          E2eeCore::new(config, device, storage, ...)     │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  2. Sign in            keys().generate + store  (first device)         │
/// │                        keys().get_identity_key_pair(Some(pw))          │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  3. Active             encrypt_message / decrypt_message               │
/// │                        spawn_reconciler() handles new-device signals   │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  4. Logout             logout()          (session cleared, barrier)    │
/// │     or delete          delete_account()  (identity + PIN erased)       │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub struct E2eeCore {
    config: E2eeConfig,
    local: LocalDevice,
    keys: Arc<IdentityKeyManager>,
    pin: PinGate,
    codec: Arc<EnvelopeCodec>,
    reconciler: Arc<Reconciler>,
}

impl E2eeCore {
    /// Validate `config` and build every component around the shared stores
    pub fn new(
        config: E2eeConfig,
        local_device: LocalDevice,
        storage: Arc<dyn SecureStorage>,
        directory: Arc<dyn DeviceDirectory>,
        transport: Arc<dyn MessageTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let session = Arc::new(SessionKeyCache::new(storage.clone(), &config));
        let keys = Arc::new(IdentityKeyManager::new(storage.clone(), session, &config));
        let pin = PinGate::new(storage, &config);
        let codec = Arc::new(EnvelopeCodec::new(keys.clone(), &config));
        let reconciler = Arc::new(Reconciler::new(
            codec.clone(),
            keys.clone(),
            directory,
            transport,
            local_device.clone(),
            &config,
        ));

        tracing::info!(
            version = version(),
            user_id = %local_device.user_id,
            device_id = %local_device.device_id,
            algorithm = %config.algorithm,
            "Parley core initialized"
        );

        Ok(Self {
            config,
            local: local_device,
            keys,
            pin,
            codec,
            reconciler,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &E2eeConfig {
        &self.config
    }

    /// This device
    pub fn local_device(&self) -> &LocalDevice {
        &self.local
    }

    /// Identity key manager
    pub fn keys(&self) -> &Arc<IdentityKeyManager> {
        &self.keys
    }

    /// PIN gate
    pub fn pin(&self) -> &PinGate {
        &self.pin
    }

    /// Envelope codec
    pub fn codec(&self) -> &Arc<EnvelopeCodec> {
        &self.codec
    }

    /// Reconciler
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Encrypt for `recipients` as this device, with the session identity
    pub async fn encrypt_message(
        &self,
        plaintext: &str,
        recipients: &[RecipientDevice],
    ) -> Result<Option<EncryptedMessage>> {
        self.codec
            .encrypt_message_for_recipients(plaintext, recipients, &self.local, None)
            .await
    }

    /// Decrypt the envelope addressed to this device, with the session identity
    pub async fn decrypt_message(&self, envelopes: &[MessageEnvelope]) -> Result<Option<String>> {
        self.codec
            .decrypt_message_for_device(envelopes, &self.local.user_id, &self.local.device_id, None)
            .await
    }

    /// Start a worker that handles re-encryption requests in order
    ///
    /// The worker stops once every returned sender has been dropped.
    pub fn spawn_reconciler(&self, buffer: usize) -> (mpsc::Sender<ReencryptRequest>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer);
        let reconciler = self.reconciler.clone();
        let handle = tokio::spawn(async move { reconciler.run(rx).await });
        (tx, handle)
    }

    /// End the session: the unlocked key is gone before this returns
    ///
    /// The stored identity and the PIN are kept.
    pub async fn logout(&self) -> Result<()> {
        self.keys.clear_cached_private_key().await?;
        tracing::info!(device_id = %self.local.device_id, "Logged out");
        Ok(())
    }

    /// Erase the stored identity, the session key and the PIN
    pub async fn delete_account(&self) -> Result<()> {
        self.keys.delete_identity_key().await?;
        self.pin.clear_pin().await?;
        tracing::info!(device_id = %self.local.device_id, "Account key material deleted");
        Ok(())
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Parley Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        #[cfg(target_os = "ios")]
        target: "ios",
        #[cfg(target_os = "android")]
        target: "android",
        #[cfg(target_os = "macos")]
        target: "macos",
        #[cfg(target_os = "linux")]
        target: "linux",
        #[cfg(target_os = "windows")]
        target: "windows",
        #[cfg(not(any(
            target_os = "ios",
            target_os = "android",
            target_os = "macos",
            target_os = "linux",
            target_os = "windows"
        )))]
        target: "unknown",
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
        default_algorithm: Algorithm::default().tag(),
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Target OS
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
    /// Envelope algorithm tag used when none is configured
    pub default_algorithm: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{MemoryDirectory, MemoryTransport};
    use crate::storage::MemorySecureStore;

    fn core_for(device: &str, storage: Arc<dyn SecureStorage>) -> E2eeCore {
        E2eeCore::new(
            E2eeConfig::fast_for_tests(),
            LocalDevice::new("alice", device, 1),
            storage,
            Arc::new(MemoryDirectory::new()),
            Arc::new(MemoryTransport::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, version());
        assert_eq!(info.default_algorithm, "x25519-xchacha20poly1305-v1");
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = E2eeConfig {
            kdf_iterations: 1,
            ..E2eeConfig::default()
        };
        let result = E2eeCore::new(
            config,
            LocalDevice::new("alice", "A", 1),
            Arc::new(MemorySecureStore::new()),
            Arc::new(MemoryDirectory::new()),
            Arc::new(MemoryTransport::new()),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_logout_keeps_identity_and_pin() {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemorySecureStore::new());
        let core = core_for("A", storage);

        let pair = core.keys().generate_identity_key_pair().await.unwrap();
        core.keys().store_identity_key(&pair, "pw").await.unwrap();
        core.keys().cache_unlocked_private_key(&pair).await.unwrap();
        core.pin().set_pin("1234").await.unwrap();

        core.logout().await.unwrap();

        assert!(core.keys().get_cached_private_key().await.unwrap().is_none());
        assert!(core.keys().has_identity_key().await.unwrap());
        assert!(core.pin().has_pin().await.unwrap());

        let unlocked = core.keys().get_identity_key_pair(Some("pw")).await.unwrap();
        assert_eq!(unlocked.unwrap().public_bytes(), pair.public_bytes());
    }

    #[tokio::test]
    async fn test_delete_account() {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemorySecureStore::new());
        let core = core_for("A", storage.clone());

        let pair = core.keys().generate_identity_key_pair().await.unwrap();
        core.keys().store_identity_key(&pair, "pw").await.unwrap();
        core.keys().cache_unlocked_private_key(&pair).await.unwrap();
        core.pin().set_pin("1234").await.unwrap();

        core.delete_account().await.unwrap();

        assert!(!core.keys().has_identity_key().await.unwrap());
        assert!(!core.pin().has_pin().await.unwrap());
        assert!(core.keys().get_cached_private_key().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_encrypt_requires_unlocked_session() {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemorySecureStore::new());
        let core = core_for("A", storage);
        let bob = crypto::generate_key_pair().unwrap();
        let recipients = [RecipientDevice {
            user_id: "bob".into(),
            device_id: "X".into(),
            public_key: bob.public_key_base64(),
            key_version: 1,
        }];

        assert!(core.encrypt_message("hi", &recipients).await.unwrap().is_none());

        let pair = core.keys().generate_identity_key_pair().await.unwrap();
        core.keys().cache_unlocked_private_key(&pair).await.unwrap();

        let message = core.encrypt_message("hi", &recipients).await.unwrap().unwrap();
        assert_eq!(
            core.decrypt_message(&message.wire_envelopes()).await.unwrap().as_deref(),
            Some("hi")
        );
    }

    #[tokio::test]
    async fn test_cores_share_nothing_across_namespaces() {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemorySecureStore::new());
        let first = core_for("A", storage.clone());
        let second = E2eeCore::new(
            E2eeConfig {
                storage_namespace: "other".into(),
                ..E2eeConfig::fast_for_tests()
            },
            LocalDevice::new("carol", "C", 1),
            storage,
            Arc::new(MemoryDirectory::new()),
            Arc::new(MemoryTransport::new()),
        )
        .unwrap();

        let pair = first.keys().generate_identity_key_pair().await.unwrap();
        first.keys().store_identity_key(&pair, "pw").await.unwrap();

        assert!(first.keys().has_identity_key().await.unwrap());
        assert!(!second.keys().has_identity_key().await.unwrap());
    }
}

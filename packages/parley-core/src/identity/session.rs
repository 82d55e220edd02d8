//! # Session Key Cache
//!
//! Holds the unlocked identity private key for the rest of an authenticated
//! session, in its own secure-storage slot apart from the password-wrapped
//! record.
//!
//! ## Logout Barrier
//!
//! ```text
//!   unlock task                          logout
//!   ───────────                          ──────
//!   epoch = cache.epoch()   (e.g. 4)
//!   PBKDF2 … (slow, no lock held)
//!                                        clear(): write lock
//!                                          epoch 4 → 5
//!                                          delete slot
//!   set_if_epoch(kp, 4): write lock
//!     epoch is 5 ≠ 4  → not cached
//! ```
//!
//! Reads and writes of the slot happen under a `tokio::sync::RwLock`, which
//! queues fairly, so a `clear()` issued before a `get()` completes first.
//! An unlock that began before a logout can never repopulate the cache.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::E2eeConfig;
use crate::crypto::{encoding, IdentityKeyPair};
use crate::error::Result;
use crate::storage::{slots, SecureStorage};

struct SessionState {
    epoch: u64,
}

/// Session cache for the unlocked private key
pub struct SessionKeyCache {
    storage: Arc<dyn SecureStorage>,
    slot: String,
    state: RwLock<SessionState>,
}

impl SessionKeyCache {
    /// Create a cache writing to the session slot of `config`'s namespace
    pub fn new(storage: Arc<dyn SecureStorage>, config: &E2eeConfig) -> Self {
        Self {
            storage,
            slot: config.storage_key(slots::SESSION_PRIVATE_KEY),
            state: RwLock::new(SessionState { epoch: 0 }),
        }
    }

    /// Current session epoch; bumped by every `clear()`
    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    /// Read the cached key pair, if any
    ///
    /// A cached value that cannot be parsed is reported as absent; the next
    /// unlock overwrites it.
    pub async fn get(&self) -> Result<Option<IdentityKeyPair>> {
        let _state = self.state.read().await;
        let Some(encoded) = self.storage.get(&self.slot).await? else {
            return Ok(None);
        };

        match IdentityKeyPair::from_private_base64(&encoded) {
            Ok(pair) => Ok(Some(pair)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable session key");
                Ok(None)
            }
        }
    }

    /// Cache a key pair unconditionally
    pub async fn set(&self, pair: &IdentityKeyPair) -> Result<()> {
        let _state = self.state.write().await;
        self.write_slot(pair).await
    }

    /// Cache a key pair only if no `clear()` happened since `epoch` was read
    ///
    /// Returns whether the key was cached.
    pub async fn set_if_epoch(&self, pair: &IdentityKeyPair, epoch: u64) -> Result<bool> {
        let state = self.state.write().await;
        if state.epoch != epoch {
            debug!(
                expected = epoch,
                current = state.epoch,
                "Session cleared during unlock; not caching"
            );
            return Ok(false);
        }
        self.write_slot(pair).await?;
        Ok(true)
    }

    /// Remove the cached key and start a new epoch
    ///
    /// The epoch moves forward even if the storage delete fails, so no
    /// in-flight unlock can cache its result afterwards.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.epoch = state.epoch.wrapping_add(1);
        self.storage.delete(&self.slot).await?;
        debug!(epoch = state.epoch, "Session key cleared");
        Ok(())
    }

    async fn write_slot(&self, pair: &IdentityKeyPair) -> Result<()> {
        let encoded = zeroize::Zeroizing::new(encoding::encode(pair.secret_bytes().as_ref()));
        self.storage.set(&self.slot, &encoded).await
    }
}

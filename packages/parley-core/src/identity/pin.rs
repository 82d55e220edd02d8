//! Local unlock PIN.
//!
//! The PIN only gates UI access to unlocking; it is not key material and
//! never feeds a key derivation.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::E2eeConfig;
use crate::error::Result;
use crate::storage::{slots, SecureStorage};

/// Get/set/clear accessor for the stored PIN
pub struct PinGate {
    storage: Arc<dyn SecureStorage>,
    slot: String,
}

impl PinGate {
    pub fn new(storage: Arc<dyn SecureStorage>, config: &E2eeConfig) -> Self {
        Self {
            storage,
            slot: config.storage_key(slots::UNLOCK_PIN),
        }
    }

    /// Stored PIN, if one is set
    pub async fn get_pin(&self) -> Result<Option<String>> {
        self.storage.get(&self.slot).await
    }

    /// Store a PIN; a blank PIN clears it instead
    pub async fn set_pin(&self, pin: &str) -> Result<()> {
        if pin.trim().is_empty() {
            return self.clear_pin().await;
        }
        self.storage.set(&self.slot, pin).await?;
        debug!("Unlock PIN set");
        Ok(())
    }

    pub async fn clear_pin(&self) -> Result<()> {
        self.storage.delete(&self.slot).await?;
        debug!("Unlock PIN cleared");
        Ok(())
    }

    pub async fn has_pin(&self) -> Result<bool> {
        Ok(self.get_pin().await?.is_some())
    }

    /// True if a PIN is set and `candidate` matches it
    ///
    /// Compared in constant time for equal-length inputs.
    pub async fn verify_pin(&self, candidate: &str) -> Result<bool> {
        let Some(pin) = self.get_pin().await? else {
            return Ok(false);
        };
        Ok(pin.as_bytes().ct_eq(candidate.as_bytes()).into())
    }
}

//! # Configuration
//!
//! Tunables for the E2EE core. Every value has a production default; tests
//! and constrained devices override them through [`E2eeConfig`].

use serde::{Deserialize, Serialize};

use crate::crypto::Algorithm;
use crate::error::{Error, Result};

/// Default PBKDF2 work factor for newly wrapped identity keys
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Lowest work factor `validate()` accepts
pub const MIN_KDF_ITERATIONS: u32 = 1_000;

/// Default length (in characters) of the unencrypted notification preview
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

/// Default number of messages fetched per reconciliation pass
pub const DEFAULT_RECONCILE_MESSAGE_LIMIT: usize = 200;

/// Configuration for the E2EE core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct E2eeConfig {
    /// PBKDF2 iterations used when wrapping a *new* identity record.
    ///
    /// Existing records keep the count they were written with.
    pub kdf_iterations: u32,
    /// Maximum characters of plaintext attached as a notification preview.
    /// Zero disables previews.
    pub preview_chars: usize,
    /// Prefix for every secure-storage key this crate writes
    pub storage_namespace: String,
    /// AEAD algorithm for newly produced envelopes
    pub algorithm: Algorithm,
    /// Maximum messages fetched per reconciliation pass
    pub reconcile_message_limit: usize,
}

impl Default for E2eeConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            storage_namespace: "parley".to_string(),
            algorithm: Algorithm::default(),
            reconcile_message_limit: DEFAULT_RECONCILE_MESSAGE_LIMIT,
        }
    }
}

impl E2eeConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would weaken or break the core
    pub fn validate(&self) -> Result<()> {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "kdfIterations must be at least {} (got {})",
                MIN_KDF_ITERATIONS, self.kdf_iterations
            )));
        }
        if self.storage_namespace.trim().is_empty() {
            return Err(Error::InvalidConfig("storageNamespace must not be empty".into()));
        }
        if self.reconcile_message_limit == 0 {
            return Err(Error::InvalidConfig(
                "reconcileMessageLimit must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Fully qualified secure-storage key for `name`
    pub fn storage_key(&self, name: &str) -> String {
        format!("{}.{}", self.storage_namespace, name)
    }

    /// A configuration with a cheap work factor, for tests and demos
    pub fn fast_for_tests() -> Self {
        Self {
            kdf_iterations: MIN_KDF_ITERATIONS,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = E2eeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.kdf_iterations, DEFAULT_KDF_ITERATIONS);
        assert_eq!(config.preview_chars, 100);
        assert_eq!(config.algorithm, Algorithm::XChaCha20Poly1305);
    }

    #[test]
    fn test_from_json_partial() {
        let config = E2eeConfig::from_json(r#"{"kdfIterations": 200000, "previewChars": 40}"#)
            .unwrap();
        assert_eq!(config.kdf_iterations, 200_000);
        assert_eq!(config.preview_chars, 40);
        assert_eq!(config.storage_namespace, "parley");
    }

    #[test]
    fn test_rejects_weak_work_factor() {
        let result = E2eeConfig::from_json(r#"{"kdfIterations": 10}"#);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_empty_namespace() {
        let config = E2eeConfig {
            storage_namespace: "  ".into(),
            ..E2eeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_key() {
        let config = E2eeConfig::default();
        assert_eq!(config.storage_key("identity_key"), "parley.identity_key");
    }
}

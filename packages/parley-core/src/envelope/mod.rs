//! # Envelope Module
//!
//! Turns one plaintext message into one envelope per recipient device, and
//! back.
//!
//! ## Envelope Set
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     ONE MESSAGE, MANY ENVELOPES                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   plaintext "hello"                                                    │
//! │        │                                                                │
//! │        ├──► DH(A, X) ──► HKDF ──► AEAD ──► envelope → (bob,   X)       │
//! │        ├──► DH(A, Y) ──► HKDF ──► AEAD ──► envelope → (bob,   Y)       │
//! │        └──► DH(A, A) ──► HKDF ──► AEAD ──► self envelope → (alice, A)  │
//! │                                                                         │
//! │   EncryptedMessage {                                                   │
//! │     envelopes:    [X, Y],   one per recipient device                   │
//! │     selfEnvelope: A,        lets the sender re-read what it sent       │
//! │     preview:      "hello"   first N characters, unencrypted            │
//! │   }                                                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No symmetric key is shared between envelopes: each one is sealed under
//! the key of its own device pair.
//!
//! ## Envelope Selection
//!
//! | Priority | Match |
//! |----------|-------|
//! | 1 | `recipientId` and `recipientDevice` both match |
//! | 2 | `recipientId` matches, `recipientDevice` is null |
//! | 3 | `recipientId` matches |
//!
//! Several matches at the same level resolve to the one appended last.
//!
//! ## Wire Format (JSON, camelCase)
//!
//! ```json
//! {
//!   "recipientId": "bob",
//!   "recipientDevice": "bob-phone",
//!   "payload": "<base64 ciphertext+tag>",
//!   "nonce": "<base64>",
//!   "keyVersion": 3,
//!   "alg": "x25519-xchacha20poly1305-v1",
//!   "senderIdentityKey": "<base64 X25519 public key>",
//!   "senderDeviceId": "alice-laptop",
//!   "version": 1
//! }
//! ```

mod codec;

pub use codec::EnvelopeCodec;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::domain;
use crate::crypto::Algorithm;
use crate::error::{Error, Result};

/// Current envelope format version
pub const ENVELOPE_VERSION: u32 = 1;

/// An addressable encryption target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientDevice {
    pub user_id: String,
    pub device_id: String,
    /// Base64 X25519 public key of the device
    pub public_key: String,
    /// Bumped by the device on every key rotation
    pub key_version: u32,
}

/// The device this core runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDevice {
    pub user_id: String,
    pub device_id: String,
    /// Key version this device publishes for its current identity key
    #[serde(default)]
    pub key_version: u32,
}

impl LocalDevice {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>, key_version: u32) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            key_version,
        }
    }

    /// True if (`user_id`, `device_id`) names this device
    pub fn is(&self, user_id: &str, device_id: &str) -> bool {
        self.user_id == user_id && self.device_id == device_id
    }
}

/// One ciphertext addressed to exactly one (user, device) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub recipient_id: String,
    /// `None` means "any device of this user"
    #[serde(default)]
    pub recipient_device: Option<String>,
    /// Base64 ciphertext with tag
    pub payload: String,
    /// Base64 nonce
    pub nonce: String,
    /// Recipient device key version at encryption time
    pub key_version: u32,
    /// Algorithm tag, kept as received so unknown tags stay parseable
    pub alg: String,
    /// Base64 X25519 public key of the sending device
    pub sender_identity_key: String,
    pub sender_device_id: String,
    pub version: u32,
}

impl MessageEnvelope {
    /// Parsed algorithm tag
    pub fn algorithm(&self) -> Result<Algorithm> {
        self.alg.parse()
    }

    /// True if the recipient has rotated its key since this envelope was sealed
    pub fn is_stale(&self, current_key_version: u32) -> bool {
        self.key_version < current_key_version
    }

    /// True if addressed to exactly this (user, device)
    pub fn is_addressed_to(&self, user_id: &str, device_id: &str) -> bool {
        self.recipient_id == user_id && self.recipient_device.as_deref() == Some(device_id)
    }

    /// True if sealed by `device_id` holding the identity key `identity_key`
    pub fn was_sealed_by(&self, device_id: &str, identity_key: &str) -> bool {
        self.sender_device_id == device_id && self.sender_identity_key == identity_key
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    /// Associated data binding the routing metadata to the ciphertext
    ///
    /// Each field is length-prefixed so no two field sequences collide.
    pub(crate) fn associated_data(&self) -> Vec<u8> {
        let key_version = self.key_version.to_be_bytes();
        let version = self.version.to_be_bytes();
        let fields: [&[u8]; 8] = [
            self.alg.as_bytes(),
            &version,
            self.sender_identity_key.as_bytes(),
            self.sender_device_id.as_bytes(),
            self.recipient_id.as_bytes(),
            self.recipient_device.as_deref().unwrap_or("").as_bytes(),
            &[u8::from(self.recipient_device.is_some())],
            &key_version,
        ];

        let mut aad = domain::ENVELOPE_AAD.to_vec();
        for field in fields {
            aad.extend_from_slice(&(field.len() as u32).to_be_bytes());
            aad.extend_from_slice(field);
        }
        aad
    }
}

/// The envelope set for one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    /// One envelope per successfully encrypted recipient device
    pub envelopes: Vec<MessageEnvelope>,
    /// Envelope addressed to the sending device itself
    pub self_envelope: MessageEnvelope,
    /// Unencrypted notification preview (bounded)
    #[serde(default)]
    pub preview: Option<String>,
}

impl EncryptedMessage {
    /// Everything handed to transport: recipient envelopes, then the self envelope
    pub fn wire_envelopes(&self) -> Vec<MessageEnvelope> {
        let mut all = self.envelopes.clone();
        all.push(self.self_envelope.clone());
        all
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

/// Pick the envelope a device should open
///
/// Exact device match, then user-wide (`recipientDevice: null`), then any
/// envelope for the user. Ties go to the last envelope in the slice.
pub fn find_envelope_for_device<'a>(
    envelopes: &'a [MessageEnvelope],
    user_id: &str,
    device_id: &str,
) -> Option<&'a MessageEnvelope> {
    let for_user = || envelopes.iter().rev().filter(move |e| e.recipient_id == user_id);

    for_user()
        .find(|e| e.recipient_device.as_deref() == Some(device_id))
        .or_else(|| for_user().find(|e| e.recipient_device.is_none()))
        .or_else(|| for_user().next())
}

/// First `max_chars` characters of `plaintext`; `None` when previews are off
pub fn preview_of(plaintext: &str, max_chars: usize) -> Option<String> {
    if max_chars == 0 {
        return None;
    }
    Some(plaintext.chars().take(max_chars).collect())
}

// ============================================================================
// TESTS
// ============================================================================

//! Services reconciliation talks to, and the records they exchange.
//!
//! The host app implements both traits over its backend API. Errors should
//! be reported as `Error::DirectoryError` / `Error::TransportError`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::{MessageEnvelope, RecipientDevice};
use crate::error::{Error, Result};

/// A device as listed by the directory service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub user_id: String,
    pub device_id: String,
    /// Base64 X25519 public key
    pub public_key: String,
    pub key_version: u32,
    #[serde(default)]
    pub revoked: bool,
}

impl DeviceRecord {
    /// Encryption target for this device
    pub fn to_recipient(&self) -> RecipientDevice {
        RecipientDevice {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            public_key: self.public_key.clone(),
            key_version: self.key_version,
        }
    }
}

/// A message as held by the transport, with its envelope set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    #[serde(default)]
    pub envelopes: Vec<MessageEnvelope>,
    /// Unix millis, if the transport reports it
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl StoredMessage {
    /// True if any envelope was sealed by `device_id` under `identity_key`
    ///
    /// Device ids are only unique per user and envelopes carry no sender
    /// user id, so the sender's identity key decides ownership.
    pub fn was_sent_by(&self, device_id: &str, identity_key: &str) -> bool {
        self.envelopes.iter().any(|e| e.was_sealed_by(device_id, identity_key))
    }
}

/// Inbound "re-encrypt history for my new device" signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReencryptRequest {
    pub target_user_id: String,
    #[serde(default)]
    pub target_device_id: Option<String>,
    pub chat_id: String,
    #[serde(default)]
    pub reason: String,
}

impl ReencryptRequest {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Directory of users' devices
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Every device registered for `user_id`, revoked ones included
    async fn get_user_devices(&self, user_id: &str) -> Result<Vec<DeviceRecord>>;
}

/// Server-side message store
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Most recent messages of a chat, at most `limit`
    async fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<StoredMessage>>;

    /// Append envelopes to an existing message's envelope set
    async fn add_envelopes(&self, message_id: &str, envelopes: Vec<MessageEnvelope>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json() {
        let request = ReencryptRequest::from_json(
            r#"{"targetUserId":"bob","chatId":"chat-1","reason":"new_device"}"#,
        )
        .unwrap();

        assert_eq!(request.target_user_id, "bob");
        assert!(request.target_device_id.is_none());
        assert_eq!(request.reason, "new_device");

        let json = request.to_json().unwrap();
        assert!(json.contains("\"targetDeviceId\":null"));
    }

    #[test]
    fn test_device_record_defaults() {
        let record: DeviceRecord = serde_json::from_str(
            r#"{"userId":"bob","deviceId":"Z","publicKey":"AAAA","keyVersion":2}"#,
        )
        .unwrap();

        assert!(!record.revoked);
        assert_eq!(record.to_recipient().key_version, 2);
    }
}

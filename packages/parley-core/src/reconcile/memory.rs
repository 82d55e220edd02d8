//! In-process directory and transport.
//!
//! Used by tests and the demo, and by hosts running without a backend.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::collaborators::{DeviceDirectory, DeviceRecord, MessageTransport, StoredMessage};
use crate::envelope::MessageEnvelope;
use crate::error::{Error, Result};
use crate::time;

/// Device directory kept in memory
#[derive(Default)]
pub struct MemoryDirectory {
    devices: RwLock<HashMap<String, Vec<DeviceRecord>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a device
    pub fn register(&self, record: DeviceRecord) {
        let mut devices = self.devices.write();
        let list = devices.entry(record.user_id.clone()).or_default();
        list.retain(|d| d.device_id != record.device_id);
        list.push(record);
    }

    /// Mark a device revoked; returns false if it is unknown
    pub fn revoke(&self, user_id: &str, device_id: &str) -> bool {
        let mut devices = self.devices.write();
        devices
            .get_mut(user_id)
            .and_then(|list| list.iter_mut().find(|d| d.device_id == device_id))
            .map(|d| d.revoked = true)
            .is_some()
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDirectory {
    async fn get_user_devices(&self, user_id: &str) -> Result<Vec<DeviceRecord>> {
        Ok(self.devices.read().get(user_id).cloned().unwrap_or_default())
    }
}

/// Message store kept in memory, oldest first
#[derive(Default)]
pub struct MemoryTransport {
    messages: RwLock<Vec<StoredMessage>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new message with its initial envelope set
    pub fn post(&self, chat_id: &str, message_id: &str, envelopes: Vec<MessageEnvelope>) {
        self.messages.write().push(StoredMessage {
            id: message_id.to_string(),
            chat_id: chat_id.to_string(),
            envelopes,
            created_at: Some(time::now_timestamp_millis()),
        });
    }

    /// Snapshot of one message
    pub fn message(&self, message_id: &str) -> Option<StoredMessage> {
        self.messages
            .read()
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let messages = self.messages.read();
        let in_chat: Vec<_> = messages.iter().filter(|m| m.chat_id == chat_id).collect();
        let skip = in_chat.len().saturating_sub(limit);
        Ok(in_chat.into_iter().skip(skip).cloned().collect())
    }

    async fn add_envelopes(&self, message_id: &str, envelopes: Vec<MessageEnvelope>) -> Result<()> {
        let mut messages = self.messages.write();
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::TransportError(format!("Unknown message {}", message_id)))?;
        message.envelopes.extend(envelopes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, device: &str) -> DeviceRecord {
        DeviceRecord {
            user_id: user.into(),
            device_id: device.into(),
            public_key: String::new(),
            key_version: 1,
            revoked: false,
        }
    }

    #[tokio::test]
    async fn test_directory_register_and_revoke() {
        let directory = MemoryDirectory::new();
        directory.register(record("bob", "X"));
        directory.register(record("bob", "Y"));
        directory.register(record("bob", "X"));

        let devices = directory.get_user_devices("bob").await.unwrap();
        assert_eq!(devices.len(), 2);

        assert!(directory.revoke("bob", "X"));
        assert!(!directory.revoke("bob", "nope"));
        let devices = directory.get_user_devices("bob").await.unwrap();
        assert!(devices.iter().any(|d| d.device_id == "X" && d.revoked));
        assert!(directory.get_user_devices("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_limit_keeps_newest() {
        let transport = MemoryTransport::new();
        for i in 0..5 {
            transport.post("chat", &format!("m{}", i), Vec::new());
        }
        transport.post("other", "o1", Vec::new());

        let recent = transport.get_messages("chat", 2).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_add_envelopes_unknown_message() {
        let transport = MemoryTransport::new();
        assert!(matches!(
            transport.add_envelopes("missing", Vec::new()).await,
            Err(Error::TransportError(_))
        ));
    }
}

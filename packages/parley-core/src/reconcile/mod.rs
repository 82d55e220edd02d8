//! # Device Reconciliation
//!
//! When a user adds a device, messages sent before it existed carry no
//! envelope for it. A reconciliation request asks a sending device to fill
//! those gaps from its own copies:
//!
//! ```text
//! ┌──────────────┐  ReencryptRequest  ┌──────────────┐
//! │  New device  │ ─────────────────► │  Reconciler  │ (on each sender)
//! └──────────────┘                    └──────┬───────┘
//!                                            │
//!        ┌───────────────────────────────────┼──────────────────────┐
//!        ▼                                   ▼                      ▼
//!  DeviceDirectory                    MessageTransport        EnvelopeCodec
//!  (resolve target key)        (recent messages, append)   (self envelope →
//!                                                             plaintext →
//!                                                             new envelope)
//! ```
//!
//! Only messages this device sent are touched, because only for those does
//! it hold a self envelope. A message counts as sent here when one of its
//! envelopes carries both this device's id and the current identity key;
//! device ids alone collide across users. A message that already carries an
//! envelope from this device and key for the target at its current key
//! version is left alone, so repeating a request appends nothing new.
//!
//! Reconciliation never fails loudly. Missing prerequisites end the run
//! with a [`ReconcileOutcome`] and per-message problems are counted in the
//! [`ReconcileReport`]. Only fatal errors (RNG, secure storage) propagate.

mod collaborators;
mod memory;

pub use collaborators::{
    DeviceDirectory, DeviceRecord, MessageTransport, ReencryptRequest, StoredMessage,
};
pub use memory::{MemoryDirectory, MemoryTransport};

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::config::E2eeConfig;
use crate::crypto::encoding;
use crate::envelope::{EnvelopeCodec, LocalDevice, RecipientDevice};
use crate::error::Result;
use crate::identity::IdentityKeyManager;

/// Per-message tally of one reconciliation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Messages sent by this device that were looked at
    pub examined: usize,
    /// New envelopes appended
    pub reencrypted: usize,
    /// Target already had a current envelope
    pub skipped_existing: usize,
    /// Self envelope missing or unreadable
    pub undecryptable: usize,
    /// Re-encryption or append failed
    pub failed: usize,
}

/// How a reconciliation run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No unlocked identity in the session
    IdentityLocked,
    /// No usable (non-revoked, valid key) device matched the request
    TargetNotFound,
    DirectoryUnavailable,
    MessagesUnavailable,
    Completed(ReconcileReport),
}

impl ReconcileOutcome {
    /// Report of a completed run
    pub fn report(&self) -> Option<&ReconcileReport> {
        match self {
            ReconcileOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Fills missing envelopes for newly added devices
pub struct Reconciler {
    codec: Arc<EnvelopeCodec>,
    keys: Arc<IdentityKeyManager>,
    directory: Arc<dyn DeviceDirectory>,
    transport: Arc<dyn MessageTransport>,
    local: LocalDevice,
    message_limit: usize,
}

impl Reconciler {
    pub fn new(
        codec: Arc<EnvelopeCodec>,
        keys: Arc<IdentityKeyManager>,
        directory: Arc<dyn DeviceDirectory>,
        transport: Arc<dyn MessageTransport>,
        local: LocalDevice,
        config: &E2eeConfig,
    ) -> Self {
        Self {
            codec,
            keys,
            directory,
            transport,
            local,
            message_limit: config.reconcile_message_limit,
        }
    }

    /// Handle one re-encryption request
    pub async fn reconcile(&self, request: &ReencryptRequest) -> Result<ReconcileOutcome> {
        info!(
            target_user_id = %request.target_user_id,
            target_device_id = ?request.target_device_id,
            chat_id = %request.chat_id,
            reason = %request.reason,
            "Reconciliation requested"
        );

        let Some(pair) = self.keys.get_identity_key_pair(None).await? else {
            info!("Identity locked, skipping reconciliation");
            return Ok(ReconcileOutcome::IdentityLocked);
        };

        let devices = match self.directory.get_user_devices(&request.target_user_id).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Device directory unavailable");
                return Ok(ReconcileOutcome::DirectoryUnavailable);
            }
        };

        let Some(target) = self.select_target(request, &devices) else {
            warn!(
                target_user_id = %request.target_user_id,
                device_count = devices.len(),
                "No usable target device"
            );
            return Ok(ReconcileOutcome::TargetNotFound);
        };

        let messages = match self
            .transport
            .get_messages(&request.chat_id, self.message_limit)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Message history unavailable");
                return Ok(ReconcileOutcome::MessagesUnavailable);
            }
        };

        let identity_key = pair.public_key_base64();
        let mut report = ReconcileReport::default();
        for message in messages
            .iter()
            .filter(|m| m.was_sent_by(&self.local.device_id, &identity_key))
        {
            report.examined += 1;

            if self.already_delivered(message, &target, &identity_key) {
                report.skipped_existing += 1;
                continue;
            }

            let plaintext = match self
                .codec
                .decrypt_message_for_device(
                    &message.envelopes,
                    &self.local.user_id,
                    &self.local.device_id,
                    Some(&pair),
                )
                .await?
            {
                Some(plaintext) => Zeroizing::new(plaintext),
                None => {
                    debug!(message_id = %message.id, "Own copy not readable");
                    report.undecryptable += 1;
                    continue;
                }
            };

            let Some(envelope) = self
                .codec
                .reencrypt_message_for_device(&plaintext, &target, &self.local, Some(&pair))
                .await?
            else {
                report.failed += 1;
                continue;
            };

            match self.transport.add_envelopes(&message.id, vec![envelope]).await {
                Ok(()) => report.reencrypted += 1,
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "Failed to append envelope");
                    report.failed += 1;
                }
            }
        }

        info!(
            target_device_id = %target.device_id,
            examined = report.examined,
            reencrypted = report.reencrypted,
            skipped_existing = report.skipped_existing,
            undecryptable = report.undecryptable,
            failed = report.failed,
            "Reconciliation complete"
        );
        Ok(ReconcileOutcome::Completed(report))
    }

    /// Process requests until the channel closes
    pub async fn run(&self, mut requests: mpsc::Receiver<ReencryptRequest>) {
        info!("Reconciliation worker starting");

        while let Some(request) = requests.recv().await {
            match self.reconcile(&request).await {
                Ok(outcome) => debug!(?outcome, "Request handled"),
                Err(e) => error!(code = e.code(), error = %e, "Reconciliation aborted"),
            }
        }

        info!("Request channel closed, reconciliation worker stopped");
    }

    fn select_target(
        &self,
        request: &ReencryptRequest,
        devices: &[DeviceRecord],
    ) -> Option<RecipientDevice> {
        devices
            .iter()
            .filter(|d| !d.revoked)
            .filter(|d| {
                request
                    .target_device_id
                    .as_deref()
                    .map_or(true, |id| d.device_id == id)
            })
            .filter(|d| !self.local.is(&d.user_id, &d.device_id))
            .find(|d| encoding::decode_key32(&d.public_key).is_ok())
            .map(DeviceRecord::to_recipient)
    }

    fn already_delivered(
        &self,
        message: &StoredMessage,
        target: &RecipientDevice,
        identity_key: &str,
    ) -> bool {
        message.envelopes.iter().any(|e| {
            e.was_sealed_by(&self.local.device_id, identity_key)
                && e.is_addressed_to(&target.user_id, &target.device_id)
                && e.key_version == target.key_version
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_key_pair, IdentityKeyPair};
    use crate::envelope::MessageEnvelope;
    use crate::error::Error;
    use crate::identity::SessionKeyCache;
    use crate::storage::{MemorySecureStore, SecureStorage};
    use async_trait::async_trait;

    struct Fixture {
        keys: Arc<IdentityKeyManager>,
        codec: Arc<EnvelopeCodec>,
        directory: Arc<MemoryDirectory>,
        transport: Arc<MemoryTransport>,
        local: LocalDevice,
        pair: IdentityKeyPair,
    }

    impl Fixture {
        async fn new() -> Self {
            let config = E2eeConfig::fast_for_tests();
            let store: Arc<dyn SecureStorage> = Arc::new(MemorySecureStore::new());
            let session = Arc::new(SessionKeyCache::new(store.clone(), &config));
            let keys = Arc::new(IdentityKeyManager::new(store, session, &config));
            let codec = Arc::new(EnvelopeCodec::new(keys.clone(), &config));
            let pair = generate_key_pair().unwrap();
            keys.cache_unlocked_private_key(&pair).await.unwrap();

            Self {
                keys,
                codec,
                directory: Arc::new(MemoryDirectory::new()),
                transport: Arc::new(MemoryTransport::new()),
                local: LocalDevice::new("alice", "A", 1),
                pair,
            }
        }

        fn reconciler(&self) -> Reconciler {
            self.reconciler_with(self.directory.clone(), self.transport.clone())
        }

        fn reconciler_with(
            &self,
            directory: Arc<dyn DeviceDirectory>,
            transport: Arc<dyn MessageTransport>,
        ) -> Reconciler {
            Reconciler::new(
                self.codec.clone(),
                self.keys.clone(),
                directory,
                transport,
                self.local.clone(),
                &E2eeConfig::fast_for_tests(),
            )
        }

        fn register(&self, user: &str, device: &str) -> IdentityKeyPair {
            let kp = generate_key_pair().unwrap();
            self.directory.register(DeviceRecord {
                user_id: user.into(),
                device_id: device.into(),
                public_key: kp.public_key_base64(),
                key_version: 1,
                revoked: false,
            });
            kp
        }

        async fn send(&self, message_id: &str, text: &str, to: &[RecipientDevice]) {
            let encrypted = self
                .codec
                .encrypt_message_for_recipients(text, to, &self.local, Some(&self.pair))
                .await
                .unwrap()
                .unwrap();
            self.transport
                .post("chat", message_id, encrypted.wire_envelopes());
        }
    }

    fn request(device: Option<&str>) -> ReencryptRequest {
        ReencryptRequest {
            target_user_id: "bob".into(),
            target_device_id: device.map(String::from),
            chat_id: "chat".into(),
            reason: "new_device".into(),
        }
    }

    fn recipient(user: &str, device: &str, kp: &IdentityKeyPair) -> RecipientDevice {
        RecipientDevice {
            user_id: user.into(),
            device_id: device.into(),
            public_key: kp.public_key_base64(),
            key_version: 1,
        }
    }

    async fn read_as(
        fx: &Fixture,
        message_id: &str,
        device: &str,
        kp: &IdentityKeyPair,
    ) -> Option<String> {
        let message = fx.transport.message(message_id).unwrap();
        fx.codec
            .decrypt_message_for_device(&message.envelopes, "bob", device, Some(kp))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_device_gets_history() {
        let fx = Fixture::new().await;
        let x = fx.register("bob", "X");
        fx.send("m1", "hello", &[recipient("bob", "X", &x)]).await;
        fx.send("m2", "again", &[recipient("bob", "X", &x)]).await;

        let z = fx.register("bob", "Z");
        assert!(read_as(&fx, "m1", "Z", &z).await.is_none());

        let outcome = fx.reconciler().reconcile(&request(Some("Z"))).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.reencrypted, 2);

        assert_eq!(read_as(&fx, "m1", "Z", &z).await.as_deref(), Some("hello"));
        assert_eq!(read_as(&fx, "m2", "Z", &z).await.as_deref(), Some("again"));
        assert_eq!(read_as(&fx, "m1", "X", &x).await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_repeat_request_is_idempotent() {
        let fx = Fixture::new().await;
        let x = fx.register("bob", "X");
        fx.send("m1", "hello", &[recipient("bob", "X", &x)]).await;
        let z = fx.register("bob", "Z");
        let reconciler = fx.reconciler();

        reconciler.reconcile(&request(Some("Z"))).await.unwrap();
        let count = fx.transport.message("m1").unwrap().envelopes.len();

        let second = reconciler.reconcile(&request(Some("Z"))).await.unwrap();
        let report = second.report().unwrap();
        assert_eq!(report.reencrypted, 0);
        assert_eq!(report.skipped_existing, 1);
        assert_eq!(fx.transport.message("m1").unwrap().envelopes.len(), count);
        assert_eq!(read_as(&fx, "m1", "Z", &z).await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_key_version_bump_reencrypts() {
        let fx = Fixture::new().await;
        let x = fx.register("bob", "X");
        fx.send("m1", "hello", &[recipient("bob", "X", &x)]).await;

        let x2 = generate_key_pair().unwrap();
        fx.directory.register(DeviceRecord {
            user_id: "bob".into(),
            device_id: "X".into(),
            public_key: x2.public_key_base64(),
            key_version: 2,
            revoked: false,
        });

        let outcome = fx.reconciler().reconcile(&request(Some("X"))).await.unwrap();
        assert_eq!(outcome.report().unwrap().reencrypted, 1);
        // The newest envelope wins selection.
        assert_eq!(read_as(&fx, "m1", "X", &x2).await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_locked_identity() {
        let fx = Fixture::new().await;
        fx.register("bob", "Z");
        fx.keys.clear_cached_private_key().await.unwrap();

        let outcome = fx.reconciler().reconcile(&request(None)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::IdentityLocked);
    }

    #[tokio::test]
    async fn test_target_selection() {
        let fx = Fixture::new().await;
        let reconciler = fx.reconciler();

        // No devices at all
        let outcome = reconciler.reconcile(&request(None)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::TargetNotFound);

        // Revoked device is not a target
        fx.register("bob", "Z");
        assert!(fx.directory.revoke("bob", "Z"));
        let outcome = reconciler.reconcile(&request(Some("Z"))).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::TargetNotFound);

        // Malformed key is not a target
        fx.directory.register(DeviceRecord {
            user_id: "bob".into(),
            device_id: "W".into(),
            public_key: "not-a-key".into(),
            key_version: 1,
            revoked: false,
        });
        let outcome = reconciler.reconcile(&request(None)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::TargetNotFound);

        // Unspecified device falls through to the first usable one
        fx.register("bob", "V");
        let outcome = reconciler.reconcile(&request(None)).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_skips_messages_from_other_devices() {
        let fx = Fixture::new().await;
        let x = fx.register("bob", "X");
        fx.send("m1", "mine", &[recipient("bob", "X", &x)]).await;

        // A message sent by Alice's phone, which this device cannot read
        let phone = LocalDevice::new("alice", "phone", 1);
        let phone_pair = generate_key_pair().unwrap();
        let theirs = fx
            .codec
            .encrypt_message_for_recipients(
                "theirs",
                &[recipient("bob", "X", &x)],
                &phone,
                Some(&phone_pair),
            )
            .await
            .unwrap()
            .unwrap();
        fx.transport.post("chat", "m2", theirs.wire_envelopes());

        fx.register("bob", "Z");
        let outcome = fx.reconciler().reconcile(&request(Some("Z"))).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.reencrypted, 1);
    }

    #[tokio::test]
    async fn test_unreadable_own_copy_counted() {
        let fx = Fixture::new().await;
        let x = fx.register("bob", "X");
        let mut sent = fx
            .codec
            .encrypt_message_for_recipients(
                "hello",
                &[recipient("bob", "X", &x)],
                &fx.local,
                Some(&fx.pair),
            )
            .await
            .unwrap()
            .unwrap();
        sent.self_envelope.nonce = encoding::encode(&[0u8; 24]);
        fx.transport.post("chat", "m1", sent.wire_envelopes());

        fx.register("bob", "Z");
        let outcome = fx.reconciler().reconcile(&request(Some("Z"))).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.undecryptable, 1);
        assert_eq!(report.reencrypted, 0);
    }

    #[tokio::test]
    async fn test_rotated_identity_leaves_old_messages() {
        let fx = Fixture::new().await;
        let x = fx.register("bob", "X");
        fx.send("m1", "hello", &[recipient("bob", "X", &x)]).await;

        // Old envelopes were sealed under the previous identity key
        let rotated = generate_key_pair().unwrap();
        fx.keys.cache_unlocked_private_key(&rotated).await.unwrap();

        fx.register("bob", "Z");
        let outcome = fx.reconciler().reconcile(&request(Some("Z"))).await.unwrap();
        assert_eq!(outcome.report().unwrap().examined, 0);
    }

    #[tokio::test]
    async fn test_same_device_id_of_other_user_is_not_ours() {
        let fx = Fixture::new().await;
        let x = fx.register("bob", "X");
        fx.send("m1", "from alice", &[recipient("bob", "X", &x)]).await;

        // Bob also names one of his devices "A" and writes to Alice
        let bob_a = LocalDevice::new("bob", "A", 1);
        let bob_a_pair = generate_key_pair().unwrap();
        let from_bob = fx
            .codec
            .encrypt_message_for_recipients(
                "from bob",
                &[recipient("alice", "A", &fx.pair), recipient("bob", "X", &x)],
                &bob_a,
                Some(&bob_a_pair),
            )
            .await
            .unwrap()
            .unwrap();
        fx.transport.post("chat", "m2", from_bob.wire_envelopes());

        let z = fx.register("bob", "Z");

        // Bob's "A" already covered Z on Alice's message; that is not our envelope
        let foreign = fx
            .codec
            .reencrypt_message_for_device(
                "from alice",
                &recipient("bob", "Z", &z),
                &bob_a,
                Some(&bob_a_pair),
            )
            .await
            .unwrap()
            .unwrap();
        fx.transport.add_envelopes("m1", vec![foreign]).await.unwrap();

        let outcome = fx.reconciler().reconcile(&request(Some("Z"))).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.skipped_existing, 0);
        assert_eq!(report.reencrypted, 1);

        let identity_key = fx.pair.public_key_base64();
        let bobs = fx.transport.message("m2").unwrap();
        assert!(!bobs.was_sent_by("A", &identity_key));
        assert!(!bobs
            .envelopes
            .iter()
            .any(|e| e.is_addressed_to("bob", "Z")));

        let ours = fx.transport.message("m1").unwrap();
        assert!(ours
            .envelopes
            .iter()
            .any(|e| e.is_addressed_to("bob", "Z") && e.was_sealed_by("A", &identity_key)));
        assert_eq!(read_as(&fx, "m1", "Z", &z).await.as_deref(), Some("from alice"));
    }

    struct Unreachable;

    #[async_trait]
    impl DeviceDirectory for Unreachable {
        async fn get_user_devices(&self, _user_id: &str) -> Result<Vec<DeviceRecord>> {
            Err(Error::DirectoryError("offline".into()))
        }
    }

    #[async_trait]
    impl MessageTransport for Unreachable {
        async fn get_messages(&self, _chat_id: &str, _limit: usize) -> Result<Vec<StoredMessage>> {
            Err(Error::TransportError("offline".into()))
        }

        async fn add_envelopes(&self, _id: &str, _envelopes: Vec<MessageEnvelope>) -> Result<()> {
            Err(Error::TransportError("offline".into()))
        }
    }

    /// Serves reads from a real transport but rejects every append
    struct ReadOnly(Arc<MemoryTransport>);

    #[async_trait]
    impl MessageTransport for ReadOnly {
        async fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
            self.0.get_messages(chat_id, limit).await
        }

        async fn add_envelopes(&self, _id: &str, _envelopes: Vec<MessageEnvelope>) -> Result<()> {
            Err(Error::TransportError("read only".into()))
        }
    }

    #[tokio::test]
    async fn test_collaborator_failures() {
        let fx = Fixture::new().await;
        let x = fx.register("bob", "X");
        fx.send("m1", "hello", &[recipient("bob", "X", &x)]).await;
        fx.register("bob", "Z");

        let no_directory = fx.reconciler_with(Arc::new(Unreachable), fx.transport.clone());
        assert_eq!(
            no_directory.reconcile(&request(None)).await.unwrap(),
            ReconcileOutcome::DirectoryUnavailable
        );

        let no_transport = fx.reconciler_with(fx.directory.clone(), Arc::new(Unreachable));
        assert_eq!(
            no_transport.reconcile(&request(Some("Z"))).await.unwrap(),
            ReconcileOutcome::MessagesUnavailable
        );

        let read_only =
            fx.reconciler_with(fx.directory.clone(), Arc::new(ReadOnly(fx.transport.clone())));
        let outcome = read_only.reconcile(&request(Some("Z"))).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.reencrypted, 0);
    }

    #[tokio::test]
    async fn test_worker_drains_channel() {
        let fx = Fixture::new().await;
        let x = fx.register("bob", "X");
        fx.send("m1", "hello", &[recipient("bob", "X", &x)]).await;
        let z = fx.register("bob", "Z");

        let reconciler = Arc::new(fx.reconciler());
        let (tx, rx) = mpsc::channel(4);
        let worker = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.run(rx).await })
        };

        tx.send(request(Some("Z"))).await.unwrap();
        tx.send(request(Some("Z"))).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        let message = fx.transport.message("m1").unwrap();
        let for_z = message
            .envelopes
            .iter()
            .filter(|e| e.is_addressed_to("bob", "Z"))
            .count();
        assert_eq!(for_z, 1);
        assert_eq!(read_as(&fx, "m1", "Z", &z).await.as_deref(), Some("hello"));
    }
}

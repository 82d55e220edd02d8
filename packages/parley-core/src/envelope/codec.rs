//! Envelope encryption and decryption.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    find_envelope_for_device, preview_of, EncryptedMessage, LocalDevice, MessageEnvelope,
    RecipientDevice, ENVELOPE_VERSION,
};
use crate::config::E2eeConfig;
use crate::crypto::{
    decrypt, encoding, encrypt, key_fingerprint, Algorithm, IdentityKeyPair, Nonce,
};
use crate::error::{Error, Result};
use crate::identity::IdentityKeyManager;

/// Message Envelope Codec
///
/// Every operation that takes `Option<&IdentityKeyPair>` falls back to the
/// session-cached identity when `None` is passed. A locked identity is an
/// expected state and yields `Ok(None)`.
pub struct EnvelopeCodec {
    keys: Arc<IdentityKeyManager>,
    algorithm: Algorithm,
    preview_chars: usize,
}

impl EnvelopeCodec {
    pub fn new(keys: Arc<IdentityKeyManager>, config: &E2eeConfig) -> Self {
        Self {
            keys,
            algorithm: config.algorithm,
            preview_chars: config.preview_chars,
        }
    }

    /// Encrypt `plaintext` once per recipient device, plus a self envelope
    ///
    /// Recipients with a missing or malformed public key are skipped. If no
    /// recipient could be encrypted the result is `Ok(None)`. A recipient
    /// entry for the sending device itself is served by the self envelope.
    pub async fn encrypt_message_for_recipients(
        &self,
        plaintext: &str,
        recipients: &[RecipientDevice],
        sender: &LocalDevice,
        sender_key_pair: Option<&IdentityKeyPair>,
    ) -> Result<Option<EncryptedMessage>> {
        let Some(pair) = self.resolve_key_pair(sender_key_pair).await? else {
            warn!("Cannot encrypt: identity key is locked");
            return Ok(None);
        };

        let mut envelopes = Vec::with_capacity(recipients.len());
        let mut covers_sender = false;
        for recipient in recipients {
            if sender.is(&recipient.user_id, &recipient.device_id) {
                covers_sender = true;
                continue;
            }

            match self.seal(&pair, sender, recipient, plaintext) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        recipient_id = %recipient.user_id,
                        device_id = %recipient.device_id,
                        error = %e,
                        "Skipping recipient device"
                    );
                }
            }
        }

        if envelopes.is_empty() && !covers_sender {
            warn!(recipients = recipients.len(), "No deliverable envelope for message");
            return Ok(None);
        }

        let own_device = RecipientDevice {
            user_id: sender.user_id.clone(),
            device_id: sender.device_id.clone(),
            public_key: pair.public_key_base64(),
            key_version: sender.key_version,
        };
        let self_envelope = self.seal(&pair, sender, &own_device, plaintext)?;

        info!(
            envelopes = envelopes.len(),
            skipped = recipients
                .len()
                .saturating_sub(envelopes.len() + usize::from(covers_sender)),
            "Encrypted message"
        );

        Ok(Some(EncryptedMessage {
            envelopes,
            self_envelope,
            preview: preview_of(plaintext, self.preview_chars),
        }))
    }

    /// Decrypt one envelope with the local key pair
    ///
    /// Any cryptographic failure yields `Ok(None)`.
    pub async fn decrypt_message_from_envelope(
        &self,
        envelope: &MessageEnvelope,
        recipient_key_pair: Option<&IdentityKeyPair>,
    ) -> Result<Option<String>> {
        let Some(pair) = self.resolve_key_pair(recipient_key_pair).await? else {
            debug!("Cannot decrypt: identity key is locked");
            return Ok(None);
        };

        match open(envelope, &pair) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(
                    sender_device_id = %envelope.sender_device_id,
                    error = %e,
                    "Envelope could not be decrypted"
                );
                Ok(None)
            }
        }
    }

    /// Select this device's envelope from a set
    pub fn find_envelope_for_device<'a>(
        &self,
        envelopes: &'a [MessageEnvelope],
        user_id: &str,
        device_id: &str,
    ) -> Option<&'a MessageEnvelope> {
        find_envelope_for_device(envelopes, user_id, device_id)
    }

    /// Select and decrypt the envelope for (`user_id`, `device_id`)
    pub async fn decrypt_message_for_device(
        &self,
        envelopes: &[MessageEnvelope],
        user_id: &str,
        device_id: &str,
        key_pair: Option<&IdentityKeyPair>,
    ) -> Result<Option<String>> {
        let Some(envelope) = find_envelope_for_device(envelopes, user_id, device_id) else {
            debug!(user_id, device_id, "No envelope for this device");
            return Ok(None);
        };
        self.decrypt_message_from_envelope(envelope, key_pair).await
    }

    /// Encrypt `plaintext` for a single device
    pub async fn reencrypt_message_for_device(
        &self,
        plaintext: &str,
        target: &RecipientDevice,
        sender: &LocalDevice,
        sender_key_pair: Option<&IdentityKeyPair>,
    ) -> Result<Option<MessageEnvelope>> {
        let Some(pair) = self.resolve_key_pair(sender_key_pair).await? else {
            warn!("Cannot re-encrypt: identity key is locked");
            return Ok(None);
        };

        match self.seal(&pair, sender, target, plaintext) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    recipient_id = %target.user_id,
                    device_id = %target.device_id,
                    error = %e,
                    "Cannot re-encrypt for device"
                );
                Ok(None)
            }
        }
    }

    async fn resolve_key_pair<'a>(
        &self,
        supplied: Option<&'a IdentityKeyPair>,
    ) -> Result<Option<Cow<'a, IdentityKeyPair>>> {
        if let Some(pair) = supplied {
            return Ok(Some(Cow::Borrowed(pair)));
        }
        Ok(self.keys.get_identity_key_pair(None).await?.map(Cow::Owned))
    }

    fn seal(
        &self,
        pair: &IdentityKeyPair,
        sender: &LocalDevice,
        recipient: &RecipientDevice,
        plaintext: &str,
    ) -> Result<MessageEnvelope> {
        let their_public = encoding::decode_key32(&recipient.public_key)?;
        let key = pair.diffie_hellman(&their_public)?.derive_key()?;

        let mut envelope = MessageEnvelope {
            recipient_id: recipient.user_id.clone(),
            recipient_device: Some(recipient.device_id.clone()),
            payload: String::new(),
            nonce: String::new(),
            key_version: recipient.key_version,
            alg: self.algorithm.tag().to_string(),
            sender_identity_key: pair.public_key_base64(),
            sender_device_id: sender.device_id.clone(),
            version: ENVELOPE_VERSION,
        };

        let (nonce, ciphertext) = encrypt(
            &key,
            plaintext.as_bytes(),
            &envelope.associated_data(),
            self.algorithm,
        )?;
        envelope.payload = encoding::encode(&ciphertext);
        envelope.nonce = encoding::encode(nonce.as_bytes());

        debug!(
            recipient_id = %recipient.user_id,
            device_id = %recipient.device_id,
            recipient_key = %key_fingerprint(&their_public),
            key_version = recipient.key_version,
            "Sealed envelope"
        );
        Ok(envelope)
    }
}

/// Open an envelope with `pair`; every failure is an `Err`
fn open(envelope: &MessageEnvelope, pair: &IdentityKeyPair) -> Result<String> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(Error::UnsupportedVersion(envelope.version));
    }
    let algorithm = envelope.algorithm()?;

    let sender_public = encoding::decode_key32(&envelope.sender_identity_key)
        .map_err(|e| Error::DecryptionFailed(format!("Bad sender key: {}", e)))?;
    let nonce = encoding::decode(&envelope.nonce)
        .and_then(|bytes| Nonce::from_bytes(algorithm, bytes))
        .map_err(|e| Error::DecryptionFailed(format!("Bad nonce: {}", e)))?;
    let ciphertext = encoding::decode(&envelope.payload)
        .map_err(|e| Error::DecryptionFailed(format!("Bad payload: {}", e)))?;

    let key = pair
        .diffie_hellman(&sender_public)
        .map_err(|e| Error::DecryptionFailed(e.to_string()))?
        .derive_key()?;
    let plaintext = decrypt(
        &key,
        &nonce,
        &ciphertext,
        &envelope.associated_data(),
        algorithm,
    )?;

    String::from_utf8(plaintext)
        .map_err(|_| Error::DecryptionFailed("Plaintext is not UTF-8".into()))
}

// ============================================================================
// TESTS
// ============================================================================

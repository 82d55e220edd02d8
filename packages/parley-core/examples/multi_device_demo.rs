//! # Multi-Device Demo
//!
//! Alice sends a message to Bob's two devices, Bob adds a third device, and
//! Alice re-encrypts her history for it.
//!
//! ## Run
//!
//! ```bash
//! RUST_LOG=parley_core=debug cargo run --example multi_device_demo
//! ```

use std::sync::Arc;

use parley_core::crypto::key_fingerprint;
use parley_core::reconcile::{DeviceRecord, MemoryDirectory, MemoryTransport};
use parley_core::storage::MemorySecureStore;
use parley_core::{E2eeConfig, E2eeCore, LocalDevice, RecipientDevice, ReencryptRequest, Result};
use tracing_subscriber::EnvFilter;

const CHAT: &str = "demo-chat";
const PASSWORD: &str = "demo password";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== Parley Core: Multi-Device Demo ===\n");
    println!("Build: {:?}\n", parley_core::build_info());

    let directory = Arc::new(MemoryDirectory::new());
    let transport = Arc::new(MemoryTransport::new());

    // Step 1: Sign in three devices
    println!("Step 1: Signing in Alice (A) and Bob (X, Y)...");
    let alice = sign_in("alice", "A", &directory, &transport).await?;
    let bob_x = sign_in("bob", "X", &directory, &transport).await?;
    let bob_y = sign_in("bob", "Y", &directory, &transport).await?;
    println!();

    // Step 2: Alice sends to every device Bob has registered
    println!("Step 2: Alice sends \"hello\" to Bob's devices...");
    let recipients = recipients_of(&directory, "bob").await?;
    let Some(message) = alice.encrypt_message("hello", &recipients).await? else {
        println!("  Nothing could be encrypted");
        return Ok(());
    };
    println!(
        "  {} recipient envelope(s) + 1 self envelope, preview {:?}",
        message.envelopes.len(),
        message.preview
    );
    transport.post(CHAT, "m1", message.wire_envelopes());
    println!();

    println!("Step 3: Each device opens its own envelope...");
    for core in [&bob_x, &bob_y, &alice] {
        report(core, &transport).await?;
    }
    println!();

    // Step 4: Bob adds a device that has never seen the message
    println!("Step 4: Bob adds device Z...");
    let bob_z = sign_in("bob", "Z", &directory, &transport).await?;
    report(&bob_z, &transport).await?;
    println!();

    println!("Step 5: Alice reconciles history for Z...");
    let (requests, worker) = alice.spawn_reconciler(4);
    let request = ReencryptRequest {
        target_user_id: "bob".into(),
        target_device_id: Some("Z".into()),
        chat_id: CHAT.into(),
        reason: "new_device".into(),
    };
    requests
        .send(request.clone())
        .await
        .map_err(|e| parley_core::Error::Internal(e.to_string()))?;
    requests
        .send(request)
        .await
        .map_err(|e| parley_core::Error::Internal(e.to_string()))?;
    drop(requests);
    worker.await?;
    report(&bob_z, &transport).await?;
    println!();

    println!("Step 6: Alice logs out...");
    alice.logout().await?;
    let after = alice.encrypt_message("are you there?", &recipients).await?;
    println!("  Encrypt after logout: {:?}", after.map(|m| m.envelopes.len()));

    println!("\n=== Demo Complete ===");
    Ok(())
}

async fn sign_in(
    user: &str,
    device: &str,
    directory: &Arc<MemoryDirectory>,
    transport: &Arc<MemoryTransport>,
) -> Result<E2eeCore> {
    let core = E2eeCore::new(
        E2eeConfig::fast_for_tests(),
        LocalDevice::new(user, device, 1),
        Arc::new(MemorySecureStore::new()),
        directory.clone(),
        transport.clone(),
    )?;

    let pair = core.keys().generate_identity_key_pair().await?;
    core.keys().store_identity_key(&pair, PASSWORD).await?;
    core.keys().get_identity_key_pair(Some(PASSWORD)).await?;

    directory.register(DeviceRecord {
        user_id: user.into(),
        device_id: device.into(),
        public_key: pair.public_key_base64(),
        key_version: 1,
        revoked: false,
    });
    println!(
        "  {}/{} key {}",
        user,
        device,
        key_fingerprint(&pair.public_bytes())
    );
    Ok(core)
}

async fn recipients_of(directory: &MemoryDirectory, user: &str) -> Result<Vec<RecipientDevice>> {
    use parley_core::DeviceDirectory;

    Ok(directory
        .get_user_devices(user)
        .await?
        .iter()
        .filter(|d| !d.revoked)
        .map(DeviceRecord::to_recipient)
        .collect())
}

async fn report(core: &E2eeCore, transport: &MemoryTransport) -> Result<()> {
    let device = core.local_device();
    let envelopes = transport
        .message("m1")
        .map(|m| m.envelopes)
        .unwrap_or_default();
    match core.decrypt_message(&envelopes).await? {
        Some(text) => println!("  {}/{} reads {:?}", device.user_id, device.device_id, text),
        None => println!("  {}/{} cannot read m1", device.user_id, device.device_id),
    }
    Ok(())
}

//! Common test utilities shared across integration tests.
#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use bananokit_core::{
    engine::{EngineConfig, WalletEngine},
    keys::SEED_LEN,
    relay::RequestRelay,
    rpc::LedgerRpc,
    storage::MemoryStorage,
};

/// Threshold low enough that the work search ends in a handful of tries.
#[allow(dead_code)]
pub const TEST_WORK_THRESHOLD: u64 = 0x0000_0100_0000_0000;

#[allow(dead_code)]
pub const TEST_PASSWORD: &str = "password123";

/// Installs a log subscriber honoring `RUST_LOG`; repeated calls are no-ops.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[allow(dead_code)]
pub fn password() -> SecretString {
    TEST_PASSWORD.to_string().into()
}

/// Engine over in-memory storage pointed at `endpoint`, with a wallet
/// created from the all-zero seed and left unlocked.
#[allow(dead_code)]
pub fn engine_with_endpoint(endpoint: &str) -> (Arc<WalletEngine>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let rpc = Arc::new(LedgerRpc::new(vec![endpoint.to_string()]).expect("rpc"));
    let engine = Arc::new(
        WalletEngine::new(
            storage.clone(),
            rpc,
            EngineConfig {
                work_threshold: TEST_WORK_THRESHOLD,
                ..EngineConfig::default()
            },
        )
        .expect("engine"),
    );
    engine
        .create_wallet_from_seed(&[0u8; SEED_LEN], &password())
        .expect("create wallet");
    (engine, storage)
}

#[allow(dead_code)]
pub fn relay_over(engine: Arc<WalletEngine>, storage: Arc<MemoryStorage>) -> Arc<RequestRelay> {
    Arc::new(RequestRelay::new(engine, storage, Vec::new()).expect("relay"))
}

/// Background task approving every queued request, standing in for the
/// user clicking through prompts.
#[allow(dead_code)]
pub fn auto_approve(relay: Arc<RequestRelay>) {
    tokio::spawn(async move {
        loop {
            if let Some(pending) = relay.next_approval().await {
                let _ = relay.decide(&pending.id, true).await;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });
}

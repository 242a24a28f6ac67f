//! Core library for a browser-resident Banano wallet.
//!
//! The crate is organized around three layers. Key material lives in
//! [`keys`] and is sealed at rest by [`vault`] over a pluggable
//! [`storage`] backend. The [`engine`] owns accounts and chain state,
//! talking to public nodes through [`rpc`] and resolving names through
//! [`bns`]. Web content reaches the engine only through the
//! [`provider`] facade, whose envelopes ([`wire`]) are dispatched by the
//! [`relay`] under per-origin [`permissions`].

pub mod address;
pub mod block;
pub mod bns;
pub mod engine;
pub mod error;
pub mod keys;
pub mod permissions;
pub mod provider;
pub mod relay;
pub mod rpc;
pub mod storage;
pub mod units;
pub mod vault;
pub mod wire;

pub use address::{decode_address, encode_address, is_valid_address, ADDRESS_PREFIX};
pub use block::{Block, BlockKind, SignedBlock};
pub use bns::BnsResolver;
pub use engine::{EngineConfig, LockState, MessageDisplay, WalletEngine};
pub use error::{ErrorPayload, WalletError, WalletResult};
pub use keys::Account;
pub use permissions::{Permission, PermissionStore};
pub use provider::Provider;
pub use relay::RequestRelay;
pub use rpc::LedgerRpc;
pub use storage::{MemoryStorage, WalletStorage};
pub use units::{ban_to_raw, raw_to_ban};

//! State blocks, canonical hashing, and proof-of-work.
//!
//! Each account's blocks form an append-only hash-linked chain: a block's
//! `previous` field commits to the prior block's hash, and the ledger rejects
//! anything else. The chain never forks; the engine enforces one signer per
//! account chain at a time.

use blake2b_simd::Params;
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};

use crate::{
    address::decode_address,
    error::{WalletError, WalletResult},
};

/// Default work threshold accepted by the live network.
pub const WORK_THRESHOLD: u64 = 0xFFFF_FE00_0000_0000;

/// State-block preamble: 31 zero bytes then 0x06.
const STATE_BLOCK_PREAMBLE: [u8; 32] = {
    let mut preamble = [0u8; 32];
    preamble[31] = 0x06;
    preamble
};

/// Role a state block plays on its account chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Debits the account; `link` is the destination public key.
    Send,
    /// Credits the account; `link` is the pending send block hash.
    Receive,
    /// Changes the representative only.
    Change,
}

/// An unsigned state block.
///
/// On the wire (page envelopes and ledger RPC alike) hash fields are upper
/// hex and the balance is a decimal string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Chain role of the block.
    #[serde(rename = "type")]
    pub kind: BlockKind,
    /// Owning account address.
    pub account: String,
    /// Hash of the previous block, or all zeros for a chain's first block.
    #[serde(with = "hex32")]
    pub previous: [u8; 32],
    /// Representative address.
    pub representative: String,
    /// Account balance in raw after this block.
    #[serde(with = "decimal_u128")]
    pub balance: u128,
    /// Kind-dependent link field.
    #[serde(with = "hex32")]
    pub link: [u8; 32],
}

/// A block with its signature and proof-of-work attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBlock {
    /// The signed block body.
    #[serde(flatten)]
    pub block: Block,
    /// ed25519 signature over the canonical block hash.
    #[serde(with = "hex64")]
    pub signature: [u8; 64],
    /// Proof-of-work nonce for the block root.
    #[serde(with = "hex_work")]
    pub work: u64,
}

mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(de)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(&s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}

mod hex64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(de)?;
        let mut out = [0u8; 64];
        hex::decode_to_slice(&s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}

mod hex_work {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(work: &u64, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format!("{work:016x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
        let s = String::deserialize(de)?;
        u64::from_str_radix(&s, 16).map_err(serde::de::Error::custom)
    }
}

mod decimal_u128 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(balance: &u128, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&balance.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<u128, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Block {
    /// Computes the canonical BLAKE2b-256 hash of the block.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidParams`] if the account or
    /// representative address does not decode.
    pub fn hash(&self) -> WalletResult<[u8; 32]> {
        let account = decode_address(&self.account)?;
        let representative = decode_address(&self.representative)?;

        let mut out = [0u8; 32];
        out.copy_from_slice(
            Params::new()
                .hash_length(32)
                .to_state()
                .update(&STATE_BLOCK_PREAMBLE)
                .update(&account)
                .update(&self.previous)
                .update(&representative)
                .update(&self.balance.to_be_bytes())
                .update(&self.link)
                .finalize()
                .as_bytes(),
        );
        Ok(out)
    }

    /// The root the proof-of-work must cover: the previous block hash, or
    /// the account public key for a chain's first block.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidParams`] if the account address does
    /// not decode.
    pub fn work_root(&self) -> WalletResult<[u8; 32]> {
        if self.previous == [0u8; 32] {
            decode_address(&self.account)
        } else {
            Ok(self.previous)
        }
    }
}

/// Scores a work nonce against a root.
fn work_value(work: u64, root: &[u8; 32]) -> u64 {
    let digest = Params::new()
        .hash_length(8)
        .to_state()
        .update(&work.to_le_bytes())
        .update(root)
        .finalize();
    let mut value = [0u8; 8];
    value.copy_from_slice(digest.as_bytes());
    u64::from_le_bytes(value)
}

/// Returns whether `work` meets `threshold` for `root`.
#[must_use]
pub fn validate_work(root: &[u8; 32], work: u64, threshold: u64) -> bool {
    work_value(work, root) >= threshold
}

/// Searches for a work nonce meeting `threshold` for `root`.
///
/// Starts from a random nonce so parallel searches do not collide.
#[must_use]
pub fn compute_work(root: &[u8; 32], threshold: u64) -> u64 {
    let mut nonce: u64 = OsRng.gen();
    loop {
        if validate_work(root, nonce, threshold) {
            return nonce;
        }
        nonce = nonce.wrapping_add(1);
    }
}

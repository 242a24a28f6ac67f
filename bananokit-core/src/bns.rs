//! Banano Name System resolution.
//!
//! Each supported TLD has a registry account. A registration for
//! `label.tld` exists in two places on chain:
//!
//! * the *name account*, whose public key is
//!   `BLAKE2b-256(registry_pubkey || encode_name(label))` and whose
//!   representative field carries the registered target address (forward
//!   lookup), and
//! * a marker block on the registry's own chain whose link is the target's
//!   public key and whose representative encodes the name (reverse lookup).
//!
//! Forward resolution is a single `account_info` on the derived name
//! account; reverse resolution scans the registry's history for markers
//! referencing the address.

use blake2b_simd::Params;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    address::{decode_address, encode_address},
    error::{WalletError, WalletResult},
    rpc::LedgerRpc,
};

/// Maximum length of a name label in bytes.
pub const MAX_LABEL_LEN: usize = 32;

/// History depth scanned during reverse resolution.
const REVERSE_SCAN_DEPTH: u32 = 500;

/// A top-level name together with its on-chain registry account.
#[derive(Debug, Clone)]
pub struct TldRegistry {
    /// Top-level name, without the leading dot.
    pub tld: String,
    /// Address of the registry account for this TLD.
    pub registry_address: String,
}

/// Resolves human-readable names against on-chain registries.
pub struct BnsResolver<'a> {
    rpc: &'a LedgerRpc,
    registries: Vec<TldRegistry>,
}

/// The TLDs supported by the default registry set.
pub const SUPPORTED_TLDS: [&str; 3] = ["ban", "jtv", "mictest"];

/// Builds the default registry table for the live network.
#[must_use]
pub fn default_registries() -> Vec<TldRegistry> {
    SUPPORTED_TLDS
        .iter()
        .map(|tld| {
            // Registry accounts are pinned by convention: the account whose
            // public key is BLAKE2b-256 of the TLD registry tag.
            let mut public_key = [0u8; 32];
            public_key.copy_from_slice(
                Params::new()
                    .hash_length(32)
                    .to_state()
                    .update(b"bns:registry:")
                    .update(tld.as_bytes())
                    .finalize()
                    .as_bytes(),
            );
            TldRegistry {
                tld: (*tld).to_string(),
                registry_address: encode_address(&public_key),
            }
        })
        .collect()
}

/// Encodes a name label into the fixed-length on-chain form: lowercase
/// bytes, zero-padded to 32.
///
/// # Errors
///
/// Returns [`WalletError::InvalidName`] if the label is empty, too long, or
/// contains anything but `a-z`, `0-9`, and `-`.
pub fn encode_name(label: &str) -> WalletResult<[u8; 32]> {
    let label = label.to_lowercase();
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return Err(WalletError::InvalidName(label));
    }
    if !label
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(WalletError::InvalidName(label));
    }
    let mut out = [0u8; 32];
    out[..label.len()].copy_from_slice(label.as_bytes());
    Ok(out)
}

/// Decodes the fixed-length on-chain form back into a label.
fn decode_name(encoded: &[u8; 32]) -> Option<String> {
    let end = encoded.iter().position(|&b| b == 0).unwrap_or(32);
    let label = std::str::from_utf8(&encoded[..end]).ok()?;
    if label.is_empty() {
        return None;
    }
    Some(label.to_string())
}

impl<'a> BnsResolver<'a> {
    /// Creates a resolver over `rpc` with an explicit registry table.
    #[must_use]
    pub const fn new(rpc: &'a LedgerRpc, registries: Vec<TldRegistry>) -> Self {
        Self { rpc, registries }
    }

    /// Creates a resolver using [`default_registries`].
    #[must_use]
    pub fn with_defaults(rpc: &'a LedgerRpc) -> Self {
        Self::new(rpc, default_registries())
    }

    /// Syntactic check: does `input` look like a name this resolver could
    /// resolve? Performs no network access.
    #[must_use]
    pub fn is_bns_name(&self, input: &str) -> bool {
        self.split_name(input).is_ok()
    }

    fn split_name(&self, input: &str) -> WalletResult<(String, &TldRegistry)> {
        let (label, tld) = input
            .rsplit_once('.')
            .ok_or_else(|| WalletError::InvalidName(input.to_string()))?;
        let registry = self
            .registries
            .iter()
            .find(|registry| registry.tld.eq_ignore_ascii_case(tld))
            .ok_or_else(|| WalletError::InvalidName(input.to_string()))?;
        encode_name(label)?;
        Ok((label.to_lowercase(), registry))
    }

    /// Derives the name-account address for `label` under `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidName`] for a bad label and
    /// [`WalletError::InvalidParams`] for a bad registry address.
    pub fn name_account(&self, registry: &TldRegistry, label: &str) -> WalletResult<String> {
        let registry_key = decode_address(&registry.registry_address)?;
        let encoded = encode_name(label)?;
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(
            Params::new()
                .hash_length(32)
                .to_state()
                .update(&registry_key)
                .update(&encoded)
                .finalize()
                .as_bytes(),
        );
        Ok(encode_address(&public_key))
    }

    /// Resolves `name` (e.g. `"coffee.ban"`) to its registered address.
    ///
    /// # Errors
    ///
    /// * [`WalletError::InvalidName`] for an unsupported TLD or bad label.
    /// * [`WalletError::NameNotFound`] when no registration is on chain.
    /// * [`WalletError::ResolutionFailed`] for network or registry-state
    ///   problems.
    pub async fn resolve(&self, name: &str) -> WalletResult<String> {
        let (label, registry) = self.split_name(name)?;
        let name_account = self.name_account(registry, &label)?;
        debug!(name = %name, account = %name_account, "bns forward lookup");

        let info = self
            .rpc
            .account_info(&name_account)
            .await
            .map_err(|err| WalletError::ResolutionFailed(err.to_string()))?
            .ok_or_else(|| WalletError::NameNotFound(name.to_string()))?;

        // The registration target rides in the representative field.
        decode_address(&info.representative)
            .map_err(|_| {
                WalletError::ResolutionFailed(format!(
                    "registry entry for {name} holds no valid target"
                ))
            })
            .map(|_| info.representative)
    }

    /// Finds a name registered to `address`, searching one TLD registry or
    /// all of them.
    ///
    /// # Errors
    ///
    /// * [`WalletError::InvalidName`] when `tld` is given but unsupported.
    /// * [`WalletError::NameNotFound`] when no registry marker references
    ///   the address.
    /// * [`WalletError::ResolutionFailed`] on network failure.
    pub async fn reverse_resolve(
        &self,
        address: &str,
        tld: Option<&str>,
    ) -> WalletResult<String> {
        let target_key = decode_address(address)?;
        let registries: Vec<&TldRegistry> = match tld {
            Some(tld) => vec![self
                .registries
                .iter()
                .find(|registry| registry.tld.eq_ignore_ascii_case(tld))
                .ok_or_else(|| WalletError::InvalidName(tld.to_string()))?],
            None => self.registries.iter().collect(),
        };

        for registry in registries {
            if let Some(label) = self.scan_registry(registry, &target_key).await? {
                return Ok(format!("{label}.{}", registry.tld));
            }
        }
        Err(WalletError::NameNotFound(address.to_string()))
    }

    /// Scans one registry's chain history for a marker block whose link is
    /// the target key; its representative encodes the name.
    async fn scan_registry(
        &self,
        registry: &TldRegistry,
        target_key: &[u8; 32],
    ) -> WalletResult<Option<String>> {
        let response = self
            .rpc
            .call(
                "account_history",
                json!({
                    "account": registry.registry_address,
                    "count": REVERSE_SCAN_DEPTH.to_string(),
                    "raw": "true",
                }),
            )
            .await
            .map_err(|err| WalletError::ResolutionFailed(err.to_string()))?;

        let Some(history) = response.get("history").and_then(Value::as_array) else {
            return Ok(None);
        };

        for entry in history {
            let Some(link) = entry.get("link").and_then(Value::as_str) else {
                continue;
            };
            let mut link_key = [0u8; 32];
            if hex::decode_to_slice(link, &mut link_key).is_err() || link_key != *target_key {
                continue;
            }
            let Some(representative) = entry.get("representative").and_then(Value::as_str)
            else {
                continue;
            };
            let Ok(encoded) = decode_address(representative) else {
                continue;
            };
            if let Some(label) = decode_name(&encoded) {
                return Ok(Some(label));
            }
        }
        Ok(None)
    }
}

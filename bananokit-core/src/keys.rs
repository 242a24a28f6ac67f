//! Seed and mnemonic handling plus hierarchical account derivation.
//!
//! A wallet seed is 256 bits of CSPRNG entropy. Account `i`'s private key is
//! `BLAKE2b-256(seed || i_be32)`, giving deterministic derivation: the same
//! seed and index always produce the same keypair and address.

use bip39::Mnemonic;
use blake2b_simd::Params;
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    address::encode_address,
    error::{WalletError, WalletResult},
};

/// Length of a wallet seed in bytes.
pub const SEED_LEN: usize = 32;

/// An account held by the wallet engine.
///
/// The private key is only populated while the wallet is unlocked and is
/// zeroized on lock or drop.
#[derive(Clone, Zeroize, zeroize::ZeroizeOnDrop)]
pub struct Account {
    /// `ban_` address for the account.
    #[zeroize(skip)]
    pub address: String,
    /// Raw ed25519 public key.
    #[zeroize(skip)]
    pub public_key: [u8; 32],
    /// Raw ed25519 private key. Sensitive.
    pub private_key: [u8; 32],
    /// Derivation index under the wallet seed.
    #[zeroize(skip)]
    pub index: u32,
    /// User-visible display name.
    #[zeroize(skip)]
    pub display_name: String,
    /// Last balance observed from the ledger, in raw.
    #[zeroize(skip)]
    pub cached_balance: u128,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the private key through Debug.
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Account {
    /// Returns the signing key for this account.
    #[must_use]
    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.private_key)
    }
}

/// Generates a fresh 256-bit seed from the OS CSPRNG.
#[must_use]
pub fn generate_seed() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    seed
}

/// Generates a fresh seed together with its 24-word mnemonic encoding.
///
/// # Errors
///
/// Returns [`WalletError::InternalError`] if the entropy cannot be encoded,
/// which cannot happen for a 32-byte input.
pub fn generate_mnemonic() -> WalletResult<(String, [u8; SEED_LEN])> {
    let seed = generate_seed();
    let mnemonic = Mnemonic::from_entropy(&seed)
        .map_err(|err| WalletError::InternalError(format!("mnemonic encoding: {err}")))?;
    Ok((mnemonic.to_string(), seed))
}

/// Recovers the wallet seed from a BIP-39 mnemonic phrase.
///
/// The mnemonic's 256-bit entropy is the seed, so
/// `mnemonic_to_seed(generate_mnemonic().0)` round-trips exactly.
///
/// # Errors
///
/// Returns [`WalletError::InvalidMnemonic`] on a bad word, word count, or
/// checksum.
pub fn mnemonic_to_seed(phrase: &str) -> WalletResult<[u8; SEED_LEN]> {
    let mnemonic =
        Mnemonic::parse_normalized(phrase.trim()).map_err(|_| WalletError::InvalidMnemonic)?;
    let entropy = Zeroizing::new(mnemonic.to_entropy());
    if entropy.len() != SEED_LEN {
        return Err(WalletError::InvalidMnemonic);
    }
    let mut seed = [0u8; SEED_LEN];
    seed.copy_from_slice(&entropy);
    Ok(seed)
}

/// Derives the account at `index` under `seed`.
#[must_use]
pub fn derive_account(seed: &[u8; SEED_LEN], index: u32) -> Account {
    let mut private_key = [0u8; 32];
    private_key.copy_from_slice(
        Params::new()
            .hash_length(32)
            .to_state()
            .update(seed)
            .update(&index.to_be_bytes())
            .finalize()
            .as_bytes(),
    );

    let signing_key = SigningKey::from_bytes(&private_key);
    let public_key = signing_key.verifying_key().to_bytes();
    let address = encode_address(&public_key);

    Account {
        address,
        public_key,
        private_key,
        index,
        display_name: format!("Account {}", index + 1),
        cached_balance: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let seed = [0u8; SEED_LEN];
        let first = derive_account(&seed, 0);
        let again = derive_account(&seed, 0);
        assert_eq!(first.address, again.address);
        assert_eq!(first.private_key, again.private_key);

        let second = derive_account(&seed, 1);
        assert_ne!(first.address, second.address);
    }

    #[test]
    fn test_zero_seed_fixture() {
        // Regression fixture: BLAKE2b-256(0^32 || 0_be32).
        let account = derive_account(&[0u8; SEED_LEN], 0);
        assert_eq!(
            hex::encode(account.private_key),
            "9f0e444c69f77a49bd0be89db92c38fe713e0963165cca12faf5712d7657120f"
        );
    }

    #[test]
    fn test_mnemonic_round_trip() {
        let (phrase, seed) = generate_mnemonic().expect("generate");
        assert_eq!(phrase.split_whitespace().count(), 24);
        assert_eq!(mnemonic_to_seed(&phrase).expect("recover"), seed);
    }

    #[test]
    fn test_bad_mnemonic_rejected() {
        match mnemonic_to_seed("banano banano banano") {
            Err(WalletError::InvalidMnemonic) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }

        // Valid words, corrupted checksum: swap the final word.
        let (phrase, _) = generate_mnemonic().expect("generate");
        let mut words: Vec<&str> = phrase.split_whitespace().collect();
        let swapped = if words[23] == "abandon" { "ability" } else { "abandon" };
        words[23] = swapped;
        let corrupted = words.join(" ");
        if mnemonic_to_seed(&corrupted).is_ok() {
            panic!("expected checksum failure");
        }
    }

    #[test]
    fn test_debug_hides_private_key() {
        let account = derive_account(&[7u8; SEED_LEN], 0);
        let rendered = format!("{account:?}");
        assert!(!rendered.contains(&hex::encode(account.private_key)));
    }
}

//! Password vault: Argon2id key derivation and AES-256-GCM sealing of the
//! wallet's durable secret record.
//!
//! The [`StoredWallet`] produced here is the only on-disk representation of
//! secrets. Decryption is authenticate-or-fail: a wrong password or tampered
//! blob yields [`WalletError::InvalidPassword`], never partial plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use argon2::Argon2;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::{WalletError, WalletResult},
    keys::{derive_account, Account, SEED_LEN},
    storage::{WalletStorage, WALLET_RECORD_KEY},
};

const RECORD_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const ACCOUNTS_AD: &[u8] = b"bananokit:accounts";
const SEED_AD: &[u8] = b"bananokit:seed";

/// Durable encrypted wallet record.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredWallet {
    /// Record format version.
    pub version: u32,
    /// AES-256-GCM sealed account set (nonce-prefixed).
    pub encrypted_accounts: Vec<u8>,
    /// AES-256-GCM sealed wallet seed (nonce-prefixed).
    pub encrypted_seed: Vec<u8>,
    /// Argon2id salt shared by both blobs.
    pub salt: Vec<u8>,
    /// Whether the wallet has been initialized.
    pub is_initialized: bool,
}

/// Secret account material as persisted inside the sealed blob.
#[derive(Serialize, Deserialize)]
struct AccountRecord {
    index: u32,
    display_name: String,
    private_key: [u8; 32],
}

/// Derives the symmetric vault key from a password and salt.
fn derive_key(password: &SecretString, salt: &[u8]) -> WalletResult<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(password.expose_secret().as_bytes(), salt, key.as_mut())
        .map_err(|err| WalletError::InternalError(format!("argon2: {err}")))?;
    Ok(key)
}

/// Seals `plaintext` under the password-derived key. Output is nonce-prefixed.
fn seal(
    password: &SecretString,
    salt: &[u8],
    associated_data: &[u8],
    plaintext: &[u8],
) -> WalletResult<Vec<u8>> {
    let key = derive_key(password, salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|err| WalletError::InternalError(format!("aead seal: {err}")))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens a nonce-prefixed blob. Any authentication failure maps to
/// [`WalletError::InvalidPassword`].
fn open(
    password: &SecretString,
    salt: &[u8],
    associated_data: &[u8],
    blob: &[u8],
) -> WalletResult<Zeroizing<Vec<u8>>> {
    if blob.len() < NONCE_LEN {
        return Err(WalletError::InvalidPassword);
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let key = derive_key(password, salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| WalletError::InvalidPassword)
}

/// Encrypts an account set under `password` with a fresh salt.
///
/// Returns the sealed blob and the salt used.
///
/// # Errors
///
/// Returns an error if key derivation or sealing fails.
pub fn encrypt_accounts(
    accounts: &[Account],
    password: &SecretString,
) -> WalletResult<(Vec<u8>, Vec<u8>)> {
    let mut salt = vec![0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let blob = encrypt_accounts_with_salt(accounts, password, &salt)?;
    Ok((blob, salt))
}

fn encrypt_accounts_with_salt(
    accounts: &[Account],
    password: &SecretString,
    salt: &[u8],
) -> WalletResult<Vec<u8>> {
    let records: Vec<AccountRecord> = accounts
        .iter()
        .map(|account| AccountRecord {
            index: account.index,
            display_name: account.display_name.clone(),
            private_key: account.private_key,
        })
        .collect();
    let mut plaintext = Zeroizing::new(Vec::new());
    ciborium::ser::into_writer(&records, &mut *plaintext)
        .map_err(|err| WalletError::Serialization(err.to_string()))?;
    seal(password, salt, ACCOUNTS_AD, &plaintext)
}

/// Decrypts an account blob produced by [`encrypt_accounts`].
///
/// Public keys and addresses are re-derived from the recovered private keys,
/// so a successful decryption always yields internally consistent accounts.
///
/// # Errors
///
/// Returns [`WalletError::InvalidPassword`] whenever authentication fails.
pub fn decrypt_accounts(
    blob: &[u8],
    salt: &[u8],
    password: &SecretString,
) -> WalletResult<Vec<Account>> {
    let plaintext = open(password, salt, ACCOUNTS_AD, blob)?;
    let records: Vec<AccountRecord> = ciborium::de::from_reader(plaintext.as_slice())
        .map_err(|err| WalletError::Serialization(err.to_string()))?;

    Ok(records
        .into_iter()
        .map(|record| {
            let signing_key = ed25519_dalek::SigningKey::from_bytes(&record.private_key);
            let public_key = signing_key.verifying_key().to_bytes();
            Account {
                address: crate::address::encode_address(&public_key),
                public_key,
                private_key: record.private_key,
                index: record.index,
                display_name: record.display_name,
                cached_balance: 0,
            }
        })
        .collect())
}

/// Seals accounts and seed into a complete [`StoredWallet`] record.
///
/// # Errors
///
/// Returns an error if key derivation, sealing, or serialization fails.
pub fn seal_wallet(
    accounts: &[Account],
    seed: &[u8; SEED_LEN],
    password: &SecretString,
) -> WalletResult<StoredWallet> {
    let mut salt = vec![0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let encrypted_accounts = encrypt_accounts_with_salt(accounts, password, &salt)?;
    let encrypted_seed = seal(password, &salt, SEED_AD, seed)?;
    Ok(StoredWallet {
        version: RECORD_VERSION,
        encrypted_accounts,
        encrypted_seed,
        salt,
        is_initialized: true,
    })
}

/// Opens a [`StoredWallet`], returning its accounts and seed.
///
/// # Errors
///
/// Returns [`WalletError::InvalidPassword`] on bad credentials or tampering.
pub fn open_wallet(
    stored: &StoredWallet,
    password: &SecretString,
) -> WalletResult<(Vec<Account>, Zeroizing<[u8; SEED_LEN]>)> {
    let accounts = decrypt_accounts(&stored.encrypted_accounts, &stored.salt, password)?;
    let seed_bytes = open(password, &stored.salt, SEED_AD, &stored.encrypted_seed)?;
    if seed_bytes.len() != SEED_LEN {
        return Err(WalletError::InvalidPassword);
    }
    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    seed.copy_from_slice(&seed_bytes);
    Ok((accounts, seed))
}

/// Persists a [`StoredWallet`] through the storage collaborator.
///
/// # Errors
///
/// Returns an error if serialization or the storage write fails.
pub fn save_wallet(storage: &dyn WalletStorage, stored: &StoredWallet) -> WalletResult<()> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(stored, &mut bytes)
        .map_err(|err| WalletError::Serialization(err.to_string()))?;
    storage.put(WALLET_RECORD_KEY, &bytes)
}

/// Loads the [`StoredWallet`] record, if one exists.
///
/// # Errors
///
/// Returns an error on storage failure, a malformed record, or an
/// unsupported record version.
pub fn load_wallet(storage: &dyn WalletStorage) -> WalletResult<Option<StoredWallet>> {
    let Some(bytes) = storage.get(WALLET_RECORD_KEY)? else {
        return Ok(None);
    };
    let stored: StoredWallet = ciborium::de::from_reader(bytes.as_slice())
        .map_err(|err| WalletError::Serialization(err.to_string()))?;
    if stored.version != RECORD_VERSION {
        return Err(WalletError::Serialization(format!(
            "unsupported wallet record version: {}",
            stored.version
        )));
    }
    Ok(Some(stored))
}

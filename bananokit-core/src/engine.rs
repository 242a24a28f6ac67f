//! The wallet engine: account custody, lock lifecycle, and block signing.
//!
//! Lifecycle: `Uninitialized → Locked → Unlocked → Locked → …`, with
//! `clear_wallet` resetting to `Uninitialized`. Decrypted private keys live
//! only inside the engine while unlocked and are zeroized synchronously on
//! lock. Block signing is serialized per account chain: every signed block
//! commits to the previous block's hash, so two concurrent signers for one
//! account would fork the chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    address::decode_address,
    block::{compute_work, Block, BlockKind, SignedBlock, WORK_THRESHOLD},
    error::{WalletError, WalletResult},
    keys::{derive_account, Account, SEED_LEN},
    rpc::LedgerRpc,
    storage::{WalletStorage, WALLET_RECORD_KEY},
    vault,
};

/// Domain prefix for signed messages. The requesting origin is bound into
/// the payload so a signature captured by one site cannot be replayed as
/// another site's request.
const MESSAGE_DOMAIN: &[u8] = b"bananokit:msg:";

/// Burn address, used as the default representative for new chains.
pub const DEFAULT_REPRESENTATIVE: &str =
    "ban_1111111111111111111111111111111111111111111111111111hifc8npp";

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Representative assigned to chains the engine opens.
    pub representative: String,
    /// Proof-of-work difficulty threshold.
    pub work_threshold: u64,
    /// Maximum pending blocks drained per `auto_receive_pending` call.
    pub receive_batch_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            representative: DEFAULT_REPRESENTATIVE.to_string(),
            work_threshold: WORK_THRESHOLD,
            receive_batch_limit: 100,
        }
    }
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No wallet record exists.
    Uninitialized,
    /// A wallet exists but key material is sealed.
    Locked,
    /// Key material is decrypted in engine memory.
    Unlocked,
}

/// Non-sensitive account view handed to callers outside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    /// `ban_` address.
    pub address: String,
    /// Public key, lower hex.
    pub public_key: String,
    /// User-visible name.
    pub display_name: String,
    /// Derivation index.
    pub index: u32,
    /// Last observed balance in raw.
    pub cached_balance: u128,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            address: account.address.clone(),
            public_key: hex::encode(account.public_key),
            display_name: account.display_name.clone(),
            index: account.index,
            cached_balance: account.cached_balance,
        }
    }
}

/// How message bytes are encoded in a `sign_message` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDisplay {
    /// The message is plain UTF-8 text.
    Utf8,
    /// The message is hex-encoded bytes.
    Hex,
}

/// Outcome of draining pending blocks: partial success, never all-or-nothing.
#[derive(Debug, Default)]
pub struct ReceiveReport {
    /// Hashes of the receive blocks that were signed and broadcast.
    pub received: Vec<[u8; 32]>,
    /// Pending send hashes that could not be received, with the reason.
    pub failures: Vec<([u8; 32], WalletError)>,
}

struct EngineState {
    accounts: Vec<Account>,
    seed: Option<Zeroizing<[u8; SEED_LEN]>>,
    initialized: bool,
    unlocked: bool,
}

impl EngineState {
    const fn locked_out(&self) -> Option<WalletError> {
        if !self.initialized {
            Some(WalletError::NotInitialized)
        } else if !self.unlocked {
            Some(WalletError::Locked)
        } else {
            None
        }
    }

    /// Synchronously wipes all secret material.
    fn wipe(&mut self) {
        // Account and Zeroizing both zeroize on drop.
        self.accounts.clear();
        self.seed = None;
        self.unlocked = false;
    }
}

/// The wallet engine. One instance is owned by the background dispatcher
/// and injected into handlers; it is the only holder of decrypted keys.
pub struct WalletEngine {
    storage: Arc<dyn WalletStorage>,
    rpc: Arc<LedgerRpc>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    chain_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WalletEngine {
    /// Creates an engine over its collaborators. The lifecycle state is
    /// recovered from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored wallet record cannot be read.
    pub fn new(
        storage: Arc<dyn WalletStorage>,
        rpc: Arc<LedgerRpc>,
        config: EngineConfig,
    ) -> WalletResult<Self> {
        let initialized = vault::load_wallet(storage.as_ref())?
            .is_some_and(|stored| stored.is_initialized);
        Ok(Self {
            storage,
            rpc,
            config,
            state: Mutex::new(EngineState {
                accounts: Vec::new(),
                seed: None,
                initialized,
                unlocked: false,
            }),
            chain_locks: Mutex::new(HashMap::new()),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        // Lock poisoning only happens after a panic mid-mutation; recovering
        // the guard keeps lock()/wipe still reachable.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lock_state(&self) -> LockState {
        let state = self.state();
        if !state.initialized {
            LockState::Uninitialized
        } else if state.unlocked {
            LockState::Unlocked
        } else {
            LockState::Locked
        }
    }

    /// Creates and persists a wallet from a raw seed, leaving it unlocked.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing or persistence fails.
    pub fn create_wallet_from_seed(
        &self,
        seed: &[u8; SEED_LEN],
        password: &SecretString,
    ) -> WalletResult<AccountSummary> {
        let account = derive_account(seed, 0);
        let summary = AccountSummary::from(&account);
        let accounts = vec![account];

        let stored = vault::seal_wallet(&accounts, seed, password)?;
        vault::save_wallet(self.storage.as_ref(), &stored)?;

        let mut state = self.state();
        state.accounts = accounts;
        state.seed = Some(Zeroizing::new(*seed));
        state.initialized = true;
        state.unlocked = true;
        info!(address = %summary.address, "wallet created");
        Ok(summary)
    }

    /// Creates and persists a wallet from a BIP-39 mnemonic.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidMnemonic`] for a bad phrase, otherwise
    /// as [`Self::create_wallet_from_seed`].
    pub fn create_wallet_from_mnemonic(
        &self,
        phrase: &str,
        password: &SecretString,
    ) -> WalletResult<AccountSummary> {
        let seed = crate::keys::mnemonic_to_seed(phrase)?;
        self.create_wallet_from_seed(&seed, password)
    }

    /// Derives the next account under the wallet seed and reseals the
    /// stored record.
    ///
    /// # Errors
    ///
    /// Fails if the wallet is locked or the reseal cannot be persisted.
    pub fn add_account(&self, password: &SecretString) -> WalletResult<AccountSummary> {
        let mut state = self.state();
        if let Some(err) = state.locked_out() {
            return Err(err);
        }
        let seed = state.seed.as_ref().ok_or(WalletError::Locked)?;
        let next_index = state
            .accounts
            .iter()
            .map(|account| account.index + 1)
            .max()
            .unwrap_or(0);
        let account = derive_account(seed, next_index);
        let summary = AccountSummary::from(&account);

        let mut accounts = state.accounts.clone();
        accounts.push(account);
        let stored = vault::seal_wallet(&accounts, seed, password)?;
        vault::save_wallet(self.storage.as_ref(), &stored)?;
        state.accounts = accounts;
        Ok(summary)
    }

    /// Unlocks the wallet, decrypting accounts into engine memory.
    ///
    /// # Errors
    ///
    /// [`WalletError::NotInitialized`] when no wallet exists,
    /// [`WalletError::InvalidPassword`] on bad credentials.
    pub fn unlock(&self, password: &SecretString) -> WalletResult<Vec<AccountSummary>> {
        let stored = vault::load_wallet(self.storage.as_ref())?
            .filter(|stored| stored.is_initialized)
            .ok_or(WalletError::NotInitialized)?;
        let (accounts, seed) = vault::open_wallet(&stored, password)?;
        let summaries = accounts.iter().map(AccountSummary::from).collect();

        let mut state = self.state();
        state.accounts = accounts;
        state.seed = Some(seed);
        state.initialized = true;
        state.unlocked = true;
        info!("wallet unlocked");
        Ok(summaries)
    }

    /// Locks the wallet, synchronously zeroizing all in-memory secrets.
    pub fn lock(&self) {
        self.state().wipe();
        info!("wallet locked");
    }

    /// Deletes the wallet record and resets to `Uninitialized`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage delete fails; secrets are wiped
    /// regardless.
    pub fn clear_wallet(&self) -> WalletResult<()> {
        {
            let mut state = self.state();
            state.wipe();
            state.initialized = false;
        }
        self.storage.delete(WALLET_RECORD_KEY)
    }

    /// Non-sensitive views of all unlocked accounts.
    ///
    /// # Errors
    ///
    /// Fails when the wallet is locked or uninitialized.
    pub fn accounts(&self) -> WalletResult<Vec<AccountSummary>> {
        let state = self.state();
        if let Some(err) = state.locked_out() {
            return Err(err);
        }
        Ok(state.accounts.iter().map(AccountSummary::from).collect())
    }

    /// Looks an account up by address or public-key hex. Absence is not an
    /// error.
    #[must_use]
    pub fn get_account_by_identifier(&self, identifier: &str) -> Option<AccountSummary> {
        let state = self.state();
        state
            .accounts
            .iter()
            .find(|account| {
                account.address == identifier
                    || hex::encode(account.public_key).eq_ignore_ascii_case(identifier)
            })
            .map(AccountSummary::from)
    }

    /// Clones the signing key for an account identifier. The clone lives
    /// only for the duration of one signing operation.
    fn signing_key_for(&self, identifier: &str) -> WalletResult<ed25519_dalek::SigningKey> {
        let state = self.state();
        if let Some(err) = state.locked_out() {
            return Err(err);
        }
        state
            .accounts
            .iter()
            .find(|account| {
                account.address == identifier
                    || hex::encode(account.public_key).eq_ignore_ascii_case(identifier)
            })
            .map(Account::signing_key)
            .ok_or_else(|| {
                WalletError::InvalidParams(format!("unknown account: {identifier}"))
            })
    }

    /// The per-chain mutex for `address`, created on first use.
    fn chain_lock(&self, address: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .chain_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Signs `block` with the account resolved from `address`: canonical
    /// hash, proof-of-work over the block root, ed25519 signature.
    ///
    /// # Errors
    ///
    /// Fails when locked, the account is unknown, or the block is
    /// malformed.
    pub fn sign_block(&self, block: &Block, address: &str) -> WalletResult<SignedBlock> {
        let signing_key = self.signing_key_for(address)?;
        let hash = block.hash()?;
        let root = block.work_root()?;
        let work = compute_work(&root, self.config.work_threshold);
        let signature = signing_key.sign(&hash);
        debug!(account = %address, hash = %hex::encode(hash), "block signed");
        Ok(SignedBlock {
            block: block.clone(),
            signature: signature.to_bytes(),
            work,
        })
    }

    /// Sends `amount_raw` from one of the wallet's accounts to `to`.
    ///
    /// Holds the sender's chain lock across frontier read, signing, and
    /// broadcast, and re-checks the frontier immediately before broadcast.
    ///
    /// # Errors
    ///
    /// [`WalletError::InsufficientBalance`] when the amount exceeds the
    /// spendable balance, [`WalletError::ChainConsistencyError`] when the
    /// frontier moves underneath the signer, RPC errors otherwise.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        amount_raw: u128,
    ) -> WalletResult<[u8; 32]> {
        if amount_raw == 0 {
            return Err(WalletError::InvalidParams("amount must be non-zero".to_string()));
        }
        let destination = decode_address(to)?;
        // Resolve before locking so bad identifiers fail fast.
        self.signing_key_for(from)?;

        let chain = self.chain_lock(from);
        let _guard = chain.lock().await;

        let info = self.rpc.account_info(from).await?;
        let Some(info) = info else {
            return Err(WalletError::InsufficientBalance {
                available: 0,
                required: amount_raw,
            });
        };
        if amount_raw > info.balance {
            return Err(WalletError::InsufficientBalance {
                available: info.balance,
                required: amount_raw,
            });
        }

        let block = Block {
            kind: BlockKind::Send,
            account: from.to_string(),
            previous: info.frontier,
            representative: info.representative.clone(),
            balance: info.balance - amount_raw,
            link: destination,
        };
        let signed = self.sign_block(&block, from)?;

        // The chain lock serializes our own signers; the frontier can still
        // move if another wallet holds the same seed. Last look before
        // committing.
        if let Some(current) = self.rpc.account_info(from).await? {
            if current.frontier != info.frontier {
                return Err(WalletError::ChainConsistencyError {
                    expected: hex::encode_upper(info.frontier),
                    found: hex::encode_upper(current.frontier),
                });
            }
        }

        let hash = self.rpc.process("send", &signed).await?;
        info!(from = %from, to = %to, amount = amount_raw, hash = %hex::encode(hash), "send broadcast");
        Ok(hash)
    }

    /// Receives pending incoming blocks for `address`, strictly one at a
    /// time: each receive block advances the frontier the next one builds
    /// on. Per-item failures are collected, not fatal.
    ///
    /// # Errors
    ///
    /// Fails only on the initial state fetch; individual receive failures
    /// land in the report.
    pub async fn auto_receive_pending(
        &self,
        address: &str,
        limit: Option<u32>,
    ) -> WalletResult<ReceiveReport> {
        self.signing_key_for(address)?;

        let chain = self.chain_lock(address);
        let _guard = chain.lock().await;

        let limit = limit.unwrap_or(self.config.receive_batch_limit);
        let pending = self.rpc.receivable(address, limit).await?;
        if pending.is_empty() {
            return Ok(ReceiveReport::default());
        }

        let (mut frontier, mut balance, representative) =
            match self.rpc.account_info(address).await? {
                Some(info) => (info.frontier, info.balance, info.representative),
                None => ([0u8; 32], 0, self.config.representative.clone()),
            };

        let mut report = ReceiveReport::default();
        for item in pending {
            let block = Block {
                kind: BlockKind::Receive,
                account: address.to_string(),
                previous: frontier,
                representative: representative.clone(),
                balance: balance + item.amount,
                link: item.hash,
            };
            let broadcast = match self.sign_block(&block, address) {
                Ok(signed) => self.rpc.process("receive", &signed).await,
                Err(err) => Err(err),
            };
            match broadcast {
                Ok(hash) => {
                    frontier = hash;
                    balance += item.amount;
                    report.received.push(hash);
                }
                Err(err) => {
                    warn!(
                        pending = %hex::encode(item.hash),
                        error = %err,
                        "receive failed; continuing with remaining items"
                    );
                    report.failures.push((item.hash, err));
                }
            }
        }
        Ok(report)
    }

    /// Signs `message` on behalf of the account resolved from `identifier`.
    ///
    /// The signature covers a domain-separated payload binding `origin`, so
    /// it cannot be replayed by another site.
    ///
    /// # Errors
    ///
    /// Fails when locked, the account is unknown, or `display` is
    /// [`MessageDisplay::Hex`] and the message is not valid hex.
    pub fn sign_message(
        &self,
        identifier: &str,
        message: &str,
        display: MessageDisplay,
        origin: &str,
    ) -> WalletResult<String> {
        let signing_key = self.signing_key_for(identifier)?;
        let payload = message_payload(message, display, origin)?;
        let signature = signing_key.sign(&payload);
        Ok(hex::encode(signature.to_bytes()))
    }

    /// Verifies a signature produced by [`Self::sign_message`].
    ///
    /// Malformed input of any kind yields `false`, never an error.
    #[must_use]
    pub fn verify_signed_message(
        identifier: &str,
        message: &str,
        display: MessageDisplay,
        origin: &str,
        signature_hex: &str,
    ) -> bool {
        let Some(public_key) = resolve_public_key(identifier) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
            return false;
        };
        let Ok(payload) = message_payload(message, display, origin) else {
            return false;
        };
        let mut signature = [0u8; 64];
        if hex::decode_to_slice(signature_hex, &mut signature).is_err() {
            return false;
        }
        verifying_key
            .verify(&payload, &Signature::from_bytes(&signature))
            .is_ok()
    }

    /// Fetches the live balance for `address` (zero for an unopened
    /// account) and refreshes the cached value.
    ///
    /// # Errors
    ///
    /// Surfaces RPC failures.
    pub async fn balance(&self, address: &str) -> WalletResult<u128> {
        let balance = self
            .rpc
            .account_info(address)
            .await?
            .map_or(0, |info| info.balance);
        let mut state = self.state();
        if let Some(account) = state
            .accounts
            .iter_mut()
            .find(|account| account.address == address)
        {
            account.cached_balance = balance;
        }
        Ok(balance)
    }

    /// The ledger client, shared with collaborators such as the resolver.
    #[must_use]
    pub fn rpc(&self) -> &Arc<LedgerRpc> {
        &self.rpc
    }
}

/// Builds the domain-separated message payload: tag, origin, NUL, bytes.
fn message_payload(
    message: &str,
    display: MessageDisplay,
    origin: &str,
) -> WalletResult<Vec<u8>> {
    let bytes = match display {
        MessageDisplay::Utf8 => message.as_bytes().to_vec(),
        MessageDisplay::Hex => hex::decode(message)
            .map_err(|err| WalletError::InvalidParams(format!("bad hex message: {err}")))?,
    };
    let mut payload =
        Vec::with_capacity(MESSAGE_DOMAIN.len() + origin.len() + 1 + bytes.len());
    payload.extend_from_slice(MESSAGE_DOMAIN);
    payload.extend_from_slice(origin.as_bytes());
    payload.push(0);
    payload.extend_from_slice(&bytes);
    Ok(payload)
}

/// Interprets `identifier` as a `ban_` address or public-key hex.
fn resolve_public_key(identifier: &str) -> Option<[u8; 32]> {
    if let Ok(key) = decode_address(identifier) {
        return Some(key);
    }
    let mut key = [0u8; 32];
    hex::decode_to_slice(identifier, &mut key).ok()?;
    Some(key)
}

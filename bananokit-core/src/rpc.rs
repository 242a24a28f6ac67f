//! JSON-RPC client for remote ledger nodes with multi-endpoint failover.
//!
//! Requests are `{action, ...}` JSON POSTs. A transport error, bad status,
//! or unparseable body rotates the endpoint cursor (wrap-around) and retries
//! with backoff, bounded by the endpoint count, before surfacing
//! [`WalletError::NetworkFailure`]. A well-formed node response carrying an
//! `error` field is a valid answer, not a failover trigger; typed wrappers
//! interpret those per action.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    block::SignedBlock,
    error::{WalletError, WalletResult},
};

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Node response text for an account with no blocks yet.
const ACCOUNT_NOT_FOUND: &str = "Account not found";

/// Client for a remote ledger node pool.
pub struct LedgerRpc {
    client: reqwest::Client,
    endpoints: Vec<String>,
    cursor: AtomicUsize,
}

/// Chain state of an opened account.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    /// Hash of the account's most recent block.
    pub frontier: [u8; 32],
    /// Confirmed balance in raw.
    pub balance: u128,
    /// Current representative address.
    pub representative: String,
    /// Height of the highest confirmed block.
    pub confirmation_height: u64,
}

/// One pending (receivable) incoming send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBlock {
    /// Hash of the pending send block.
    pub hash: [u8; 32],
    /// Amount in raw.
    pub amount: u128,
}

#[derive(Debug)]
struct RpcAttemptError {
    endpoint: String,
    error: String,
    retryable: bool,
}

impl RpcAttemptError {
    const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<RpcAttemptError> for WalletError {
    fn from(value: RpcAttemptError) -> Self {
        Self::NetworkFailure(format!("{}: {}", value.endpoint, value.error))
    }
}

impl LedgerRpc {
    /// Creates a client over an ordered, non-empty endpoint list.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidParams`] if `endpoints` is empty.
    pub fn new(endpoints: Vec<String>) -> WalletResult<Self> {
        if endpoints.is_empty() {
            return Err(WalletError::InvalidParams(
                "at least one ledger endpoint is required".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoints,
            cursor: AtomicUsize::new(0),
        })
    }

    fn current_endpoint(&self) -> &str {
        &self.endpoints[self.cursor.load(Ordering::Relaxed) % self.endpoints.len()]
    }

    fn advance_cursor(&self) {
        self.cursor.fetch_add(1, Ordering::Relaxed);
    }

    /// Sends `{action, ...params}` to the node pool and returns the parsed
    /// response body.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NetworkFailure`] once every endpoint has been
    /// tried without a parseable response.
    pub async fn call(&self, action: &str, params: Value) -> WalletResult<Value> {
        let mut body = json!({ "action": action });
        if let (Some(object), Some(extra)) = (body.as_object_mut(), params.as_object()) {
            for (key, value) in extra {
                object.insert(key.clone(), value.clone());
            }
        }

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.endpoints.len() - 1);

        (|| async { self.call_once(&body).await })
            .retry(backoff)
            .when(RpcAttemptError::is_retryable)
            .await
            .map_err(Into::into)
    }

    /// One attempt against the current endpoint. A retryable failure rotates
    /// the cursor so the next attempt lands on the next endpoint.
    async fn call_once(&self, body: &Value) -> Result<Value, RpcAttemptError> {
        let endpoint = self.current_endpoint().to_string();
        debug!(endpoint = %endpoint, "ledger rpc request");

        let fail = |error: String| {
            warn!(endpoint = %endpoint, error = %error, "ledger rpc attempt failed");
            self.advance_cursor();
            RpcAttemptError {
                endpoint: endpoint.clone(),
                error,
                retryable: true,
            }
        };

        let response = self
            .client
            .post(&endpoint)
            .timeout(RPC_TIMEOUT)
            .header(
                "User-Agent",
                concat!("bananokit-core/", env!("CARGO_PKG_VERSION")),
            )
            .json(body)
            .send()
            .await
            .map_err(|err| fail(format!("transport: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("bad status code {}", status.as_u16())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| fail(format!("malformed response body: {err}")))
    }

    /// Fetches chain state for `address`.
    ///
    /// Returns `Ok(None)` for an account the ledger has never seen; that is
    /// a valid zero-balance result, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NetworkFailure`] on endpoint exhaustion or a
    /// malformed node answer.
    pub async fn account_info(&self, address: &str) -> WalletResult<Option<AccountInfo>> {
        let response = self
            .call(
                "account_info",
                json!({ "account": address, "representative": "true" }),
            )
            .await?;

        if let Some(error) = response.get("error").and_then(Value::as_str) {
            if error == ACCOUNT_NOT_FOUND {
                return Ok(None);
            }
            return Err(WalletError::NetworkFailure(format!(
                "account_info: {error}"
            )));
        }

        let frontier = parse_hash(&response, "frontier")?;
        let balance = parse_raw(&response, "balance")?;
        let representative = response
            .get("representative")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("representative"))?
            .to_string();
        let confirmation_height = response
            .get("confirmation_height")
            .and_then(Value::as_str)
            .and_then(|height| height.parse().ok())
            .unwrap_or(0);

        Ok(Some(AccountInfo {
            frontier,
            balance,
            representative,
            confirmation_height,
        }))
    }

    /// Lists pending incoming sends for `address`, oldest-independent but
    /// deterministically ordered by block hash.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NetworkFailure`] on endpoint exhaustion or a
    /// malformed node answer.
    pub async fn receivable(&self, address: &str, count: u32) -> WalletResult<Vec<PendingBlock>> {
        let response = self
            .call(
                "pending",
                json!({ "account": address, "count": count.to_string(), "source": "false" }),
            )
            .await?;

        if let Some(error) = response.get("error").and_then(Value::as_str) {
            if error == ACCOUNT_NOT_FOUND {
                return Ok(Vec::new());
            }
            return Err(WalletError::NetworkFailure(format!("pending: {error}")));
        }

        // Nodes report "blocks": "" when nothing is pending.
        let Some(blocks) = response.get("blocks").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        let mut pending = Vec::with_capacity(blocks.len());
        for (hash, amount) in blocks {
            let Ok(hash) = decode_hash(hash) else {
                warn!(hash = %hash, "skipping pending entry with bad hash");
                continue;
            };
            let Some(amount) = amount.as_str().and_then(|a| a.parse().ok()) else {
                warn!(hash = %hex::encode(hash), "skipping pending entry with bad amount");
                continue;
            };
            pending.push(PendingBlock { hash, amount });
        }
        pending.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(pending)
    }

    /// Fetches balances for several accounts at once.
    ///
    /// The result map only contains addresses the node answered cleanly for;
    /// per-address problems are skipped, not fatal.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NetworkFailure`] on endpoint exhaustion or a
    /// malformed node answer.
    pub async fn accounts_balances(
        &self,
        addresses: &[String],
    ) -> WalletResult<HashMap<String, u128>> {
        let response = self
            .call("accounts_balances", json!({ "accounts": addresses }))
            .await?;

        let mut balances = HashMap::new();
        let Some(entries) = response.get("balances").and_then(Value::as_object) else {
            return Ok(balances);
        };
        for (address, entry) in entries {
            let Some(balance) = entry
                .get("balance")
                .and_then(Value::as_str)
                .and_then(|balance| balance.parse().ok())
            else {
                warn!(address = %address, "skipping balance entry with bad amount");
                continue;
            };
            balances.insert(address.clone(), balance);
        }
        Ok(balances)
    }

    /// Broadcasts a signed block and returns its hash as confirmed by the
    /// node.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::BroadcastFailed`] if the node refuses the
    /// block, or [`WalletError::NetworkFailure`] on endpoint exhaustion.
    pub async fn process(&self, subtype: &str, block: &SignedBlock) -> WalletResult<[u8; 32]> {
        let block_json = serde_json::to_value(block)
            .map_err(|err| WalletError::Serialization(err.to_string()))?;
        let response = self
            .call(
                "process",
                json!({
                    "json_block": "true",
                    "subtype": subtype,
                    "block": block_json,
                }),
            )
            .await?;

        if let Some(error) = response.get("error").and_then(Value::as_str) {
            return Err(WalletError::BroadcastFailed(error.to_string()));
        }
        parse_hash(&response, "hash")
            .map_err(|_| WalletError::BroadcastFailed("node returned no hash".to_string()))
    }
}

fn malformed(field: &str) -> WalletError {
    WalletError::NetworkFailure(format!("malformed node response: missing {field}"))
}

fn parse_hash(response: &Value, field: &str) -> WalletResult<[u8; 32]> {
    response
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(field))
        .and_then(decode_hash)
}

fn decode_hash(hash: &str) -> WalletResult<[u8; 32]> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(hash, &mut out)
        .map_err(|err| WalletError::NetworkFailure(format!("bad hash in response: {err}")))?;
    Ok(out)
}

fn parse_raw(response: &Value, field: &str) -> WalletResult<u128> {
    response
        .get(field)
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| malformed(field))
}

//! Page-side provider facade.
//!
//! The facade is the only wallet surface web content sees. Every call
//! generates a correlation id, posts a request envelope toward the
//! background, and resolves when the matching response envelope comes
//! back. Relay errors arrive pre-normalized to the fixed code table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    block::{Block, SignedBlock},
    engine::MessageDisplay,
    error::{WalletError, WalletResult},
    wire::{RequestEnvelope, ResponseBody, ResponseEnvelope, SOURCE_EVENT, SOURCE_RESPONSE},
};

/// Default time a call waits for its correlated response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Event listener callback.
pub type Listener = Arc<dyn Fn(Value) + Send + Sync>;

/// Handle returned by [`Provider::on`]; pass it back to [`Provider::off`]
/// to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerHandle {
    event: String,
    id: u64,
}

/// The public wallet API exposed to web content.
pub struct Provider {
    outgoing: mpsc::UnboundedSender<RequestEnvelope>,
    pending: Mutex<HashMap<String, oneshot::Sender<ResponseBody>>>,
    listeners: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
    next_listener_id: AtomicU64,
    connected: AtomicBool,
    public_key: Mutex<Option<String>>,
    timeout: Duration,
}

impl Provider {
    /// Creates a provider that posts envelopes into `outgoing`. Incoming
    /// envelopes must be fed to [`Self::handle_message`] by the embedding
    /// context.
    #[must_use]
    pub fn new(outgoing: mpsc::UnboundedSender<RequestEnvelope>) -> Self {
        Self::with_timeout(outgoing, DEFAULT_REQUEST_TIMEOUT)
    }

    /// As [`Self::new`] with an explicit per-call response timeout.
    #[must_use]
    pub fn with_timeout(
        outgoing: mpsc::UnboundedSender<RequestEnvelope>,
        timeout: Duration,
    ) -> Self {
        Self {
            outgoing,
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            public_key: Mutex::new(None),
            timeout,
        }
    }

    /// Whether a connect grant is active for this page.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Address of the first approved account, once connected.
    #[must_use]
    pub fn public_key(&self) -> Option<String> {
        self.lock_public_key().clone()
    }

    fn lock_public_key(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.public_key
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<ResponseBody>>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_listeners(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(u64, Listener)>>> {
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Posts one correlated request and waits for its response.
    async fn request(&self, method: &str, params: Value) -> WalletResult<Value> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id.clone(), tx);

        let envelope = RequestEnvelope::new(id.clone(), method.to_string(), params);
        if self.outgoing.send(envelope).is_err() {
            self.lock_pending().remove(&id);
            return Err(WalletError::Disconnected);
        }

        let outcome = tokio::time::timeout(self.timeout, rx).await;
        match outcome {
            Ok(Ok(ResponseBody::Ok(value))) => Ok(value),
            Ok(Ok(ResponseBody::Err(payload))) => Err(payload.into_error()),
            Ok(Err(_)) => Err(WalletError::Disconnected),
            Err(_) => {
                // Drop the orphaned pending slot so a late response is
                // discarded instead of leaking.
                self.lock_pending().remove(&id);
                Err(WalletError::InternalError(format!(
                    "no response to {method} within {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Feeds one incoming envelope (response or event) into the facade.
    /// Unrecognized messages are ignored.
    pub fn handle_message(&self, message: &Value) {
        match message.get("source").and_then(Value::as_str) {
            Some(SOURCE_RESPONSE) => {
                let Ok(envelope) =
                    serde_json::from_value::<ResponseEnvelope>(message.clone())
                else {
                    warn!("discarding malformed response envelope");
                    return;
                };
                if let Some(tx) = self.lock_pending().remove(&envelope.id) {
                    let _ = tx.send(envelope.response);
                } else {
                    debug!(id = %envelope.id, "response for unknown correlation id");
                }
            }
            Some(SOURCE_EVENT) => {
                let Some(event) = message.get("event").and_then(Value::as_str) else {
                    return;
                };
                let data = message.get("data").cloned().unwrap_or(Value::Null);
                if event == crate::relay::EVENT_DISCONNECT {
                    self.connected.store(false, Ordering::Relaxed);
                    *self.lock_public_key() = None;
                }
                self.dispatch_event(event, &data);
            }
            _ => {}
        }
    }

    fn dispatch_event(&self, event: &str, data: &Value) {
        let callbacks: Vec<Listener> = self
            .lock_listeners()
            .get(event)
            .map(|listeners| listeners.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(data.clone());
        }
    }

    /// Registers `callback` for `event`, returning an unsubscribe handle.
    #[must_use = "dropping the handle makes the listener impossible to remove individually"]
    pub fn on(&self, event: &str, callback: Listener) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners()
            .entry(event.to_string())
            .or_default()
            .push((id, callback));
        ListenerHandle {
            event: event.to_string(),
            id,
        }
    }

    /// Removes the listener identified by `handle`.
    pub fn off(&self, handle: &ListenerHandle) {
        if let Some(listeners) = self.lock_listeners().get_mut(&handle.event) {
            listeners.retain(|(id, _)| *id != handle.id);
        }
    }

    /// Drops every registered listener.
    pub fn remove_all_listeners(&self) {
        self.lock_listeners().clear();
    }

    /// Requests a connection, optionally refusing to prompt the user.
    ///
    /// # Errors
    ///
    /// Relay errors from the fixed code table; notably
    /// [`WalletError::UserRejected`] and [`WalletError::Unauthorized`].
    pub async fn connect(&self, only_if_trusted: bool) -> WalletResult<Vec<String>> {
        let response = self
            .request("connect", json!({ "onlyIfTrusted": only_if_trusted }))
            .await?;
        let accounts = parse_accounts(&response)?;
        self.connected.store(true, Ordering::Relaxed);
        *self.lock_public_key() = accounts.first().cloned();
        Ok(accounts)
    }

    /// Drops this page's grant.
    ///
    /// # Errors
    ///
    /// Relay errors from the fixed code table.
    pub async fn disconnect(&self) -> WalletResult<()> {
        self.request("disconnect", json!({})).await?;
        self.connected.store(false, Ordering::Relaxed);
        *self.lock_public_key() = None;
        Ok(())
    }

    /// Lists the accounts this page was approved for.
    ///
    /// # Errors
    ///
    /// [`WalletError::Unauthorized`] when not connected.
    pub async fn get_accounts(&self) -> WalletResult<Vec<String>> {
        let response = self.request("getAccounts", json!({})).await?;
        parse_accounts(&response)
    }

    /// Live balance of `account` in raw.
    ///
    /// # Errors
    ///
    /// Relay errors from the fixed code table.
    pub async fn get_balance(&self, account: &str) -> WalletResult<u128> {
        let response = self
            .request("getBalance", json!({ "account": account }))
            .await?;
        response
            .get("balance")
            .and_then(Value::as_str)
            .and_then(|balance| balance.parse().ok())
            .ok_or_else(|| WalletError::InternalError("malformed balance response".to_string()))
    }

    /// Chain state of `account`; `None` for an unopened account.
    ///
    /// # Errors
    ///
    /// Relay errors from the fixed code table.
    pub async fn get_account_info(&self, account: &str) -> WalletResult<Option<Value>> {
        let response = self
            .request("getAccountInfo", json!({ "account": account }))
            .await?;
        Ok((!response.is_null()).then_some(response))
    }

    /// Asks the wallet to sign `block` for `account`.
    ///
    /// # Errors
    ///
    /// [`WalletError::UserRejected`] when declined; other relay errors per
    /// the code table.
    pub async fn sign_block(&self, account: &str, block: &Block) -> WalletResult<SignedBlock> {
        let response = self
            .request("signBlock", json!({ "account": account, "block": block }))
            .await?;
        parse_signed_block(&response)
    }

    /// Signs and broadcasts `block`, returning its hash.
    ///
    /// # Errors
    ///
    /// As [`Self::sign_block`], plus broadcast failures.
    pub async fn send_block(&self, account: &str, block: &Block) -> WalletResult<String> {
        let response = self
            .request("sendBlock", json!({ "account": account, "block": block }))
            .await?;
        response
            .get("hash")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| WalletError::InternalError("malformed send response".to_string()))
    }

    /// Signs a message with `account`'s key, returning the hex signature.
    ///
    /// # Errors
    ///
    /// [`WalletError::UserRejected`] when declined; other relay errors per
    /// the code table.
    pub async fn sign_message(
        &self,
        account: &str,
        message: &str,
        display: MessageDisplay,
    ) -> WalletResult<String> {
        let response = self
            .request(
                "signMessage",
                json!({ "account": account, "message": message, "display": display }),
            )
            .await?;
        response
            .get("signature")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                WalletError::InternalError("malformed signature response".to_string())
            })
    }

    /// Sends `amount_raw` from `from` to `to`, returning the block hash.
    ///
    /// # Errors
    ///
    /// [`WalletError::InsufficientBalance`] surfaces as invalid-params from
    /// the relay; other errors per the code table.
    pub async fn send_transaction(
        &self,
        from: &str,
        to: &str,
        amount_raw: u128,
    ) -> WalletResult<String> {
        let response = self
            .request(
                "sendTransaction",
                json!({ "from": from, "to": to, "amount": amount_raw.to_string() }),
            )
            .await?;
        response
            .get("hash")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| WalletError::InternalError("malformed send response".to_string()))
    }

    /// Resolves a BNS name to an address.
    ///
    /// # Errors
    ///
    /// Name errors surface as invalid-params or internal errors from the
    /// relay per the code table.
    pub async fn resolve_bns(&self, name: &str) -> WalletResult<String> {
        let response = self.request("resolveBNS", json!({ "name": name })).await?;
        response
            .get("address")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| WalletError::InternalError("malformed resolve response".to_string()))
    }
}

fn parse_accounts(response: &Value) -> WalletResult<Vec<String>> {
    response
        .get("accounts")
        .and_then(Value::as_array)
        .map(|accounts| {
            accounts
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .ok_or_else(|| WalletError::InternalError("malformed accounts response".to_string()))
}

fn parse_signed_block(response: &Value) -> WalletResult<SignedBlock> {
    response
        .get("block")
        .cloned()
        .ok_or_else(|| WalletError::InternalError("malformed block response".to_string()))
        .and_then(|block| {
            serde_json::from_value(block)
                .map_err(|err| WalletError::Serialization(err.to_string()))
        })
}

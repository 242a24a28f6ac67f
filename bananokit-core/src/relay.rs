//! Background-side request relay.
//!
//! The relay receives correlated calls from untrusted pages, enforces
//! per-origin permissions, queues user approvals (one global FIFO across
//! all origins, presented one at a time), and fans events out to every
//! page context subscribed for an origin. It is the sole writer of the
//! permission map.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::{json, Value};
use strum::EnumString;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    bns::{BnsResolver, TldRegistry},
    block::Block,
    engine::{MessageDisplay, WalletEngine},
    error::{WalletError, WalletResult},
    permissions::PermissionStore,
    wire::{EventEnvelope, RequestEnvelope, ResponseBody, ResponseEnvelope},
};

/// Event name raised when an origin's visible accounts change.
pub const EVENT_ACCOUNTS_CHANGED: &str = "accountsChanged";
/// Event name raised when an origin loses its connection.
pub const EVENT_DISCONNECT: &str = "disconnect";

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Methods accepted over the provider boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
pub enum RelayMethod {
    /// Request a connection grant.
    #[strum(serialize = "connect")]
    Connect,
    /// Drop the origin's grant.
    #[strum(serialize = "disconnect")]
    Disconnect,
    /// List the origin's approved accounts.
    #[strum(serialize = "getAccounts")]
    GetAccounts,
    /// Live balance of an approved account.
    #[strum(serialize = "getBalance")]
    GetBalance,
    /// Chain state of an approved account.
    #[strum(serialize = "getAccountInfo")]
    GetAccountInfo,
    /// Sign a caller-supplied block.
    #[strum(serialize = "signBlock")]
    SignBlock,
    /// Sign and broadcast a caller-supplied block.
    #[strum(serialize = "sendBlock")]
    SendBlock,
    /// Sign an arbitrary message.
    #[strum(serialize = "signMessage")]
    SignMessage,
    /// Build, sign, and broadcast a send.
    #[strum(serialize = "sendTransaction")]
    SendTransaction,
    /// Resolve a BNS name.
    #[strum(serialize = "resolveBNS")]
    ResolveBns,
}

/// What a queued approval is asking the user to allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalKind {
    /// Connect the origin to the wallet.
    Connect,
    /// Sign a message for an account.
    SignMessage,
    /// Sign (and possibly broadcast) a block.
    SignBlock,
    /// Send funds.
    SendTransaction,
}

/// An approval waiting for the user, alive only until decided.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Approval id (not the caller's correlation id).
    pub id: String,
    /// Requesting origin.
    pub origin: String,
    /// Operation category.
    pub kind: ApprovalKind,
    /// Payload summary shown to the user.
    pub summary: Value,
}

/// A call as delivered by the bridge: the page's envelope plus the origin
/// the bridge authenticated.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Correlation id from the page envelope.
    pub id: String,
    /// Provider method name.
    pub method: String,
    /// Method parameters.
    pub params: Value,
    /// Scheme+host of the requesting page, stamped by the bridge, never
    /// taken from page-controlled data.
    pub origin: String,
}

impl RelayRequest {
    /// Wraps a page envelope with the origin the bridge observed.
    #[must_use]
    pub fn from_envelope(envelope: RequestEnvelope, origin: &str) -> Self {
        Self {
            id: envelope.id,
            method: envelope.method,
            params: envelope.params,
            origin: origin.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Decision {
    Approved,
    Rejected,
    Revoked,
}

struct PendingEntry {
    request: PendingRequest,
    responders: Vec<oneshot::Sender<Decision>>,
}

struct RelayInner {
    permissions: PermissionStore,
    queue: VecDeque<String>,
    entries: HashMap<String, PendingEntry>,
    /// origin → pending connect approval id, for duplicate-connect dedup.
    connect_ids: HashMap<String, String>,
    events: HashMap<String, broadcast::Sender<EventEnvelope>>,
}

/// Routes page requests into the engine under permission control.
pub struct RequestRelay {
    engine: Arc<WalletEngine>,
    registries: Vec<TldRegistry>,
    inner: Mutex<RelayInner>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[derive(Deserialize)]
struct ConnectParams {
    #[serde(rename = "onlyIfTrusted", default)]
    only_if_trusted: bool,
}

#[derive(Deserialize)]
struct AccountParams {
    account: String,
}

#[derive(Deserialize)]
struct SignMessageParams {
    account: String,
    message: String,
    #[serde(default = "default_display")]
    display: MessageDisplay,
}

const fn default_display() -> MessageDisplay {
    MessageDisplay::Utf8
}

#[derive(Deserialize)]
struct BlockParams {
    account: String,
    block: Block,
}

#[derive(Deserialize)]
struct SendParams {
    from: String,
    to: String,
    /// Amount in raw, as a decimal string.
    amount: String,
}

#[derive(Deserialize)]
struct ResolveParams {
    name: String,
}

impl RequestRelay {
    /// Creates a relay over the engine, loading persisted permissions from
    /// the engine's storage collaborator.
    ///
    /// # Errors
    ///
    /// Returns an error if the permission record cannot be loaded.
    pub fn new(
        engine: Arc<WalletEngine>,
        storage: Arc<dyn crate::storage::WalletStorage>,
        registries: Vec<TldRegistry>,
    ) -> WalletResult<Self> {
        let permissions = PermissionStore::load(storage)?;
        Ok(Self {
            engine,
            registries,
            inner: Mutex::new(RelayInner {
                permissions,
                queue: VecDeque::new(),
                entries: HashMap::new(),
                connect_ids: HashMap::new(),
                events: HashMap::new(),
            }),
        })
    }

    /// Handles one relayed request, producing the correlated response
    /// envelope. Never panics on malformed input; errors are normalized to
    /// the fixed code table.
    pub async fn handle(&self, request: RelayRequest) -> ResponseEnvelope {
        let id = request.id.clone();
        let body = match self.dispatch(request).await {
            Ok(value) => ResponseBody::Ok(value),
            Err(err) => {
                debug!(error = %err, "relayed request failed");
                ResponseBody::Err(err.to_payload())
            }
        };
        ResponseEnvelope::new(id, body)
    }

    async fn dispatch(&self, request: RelayRequest) -> WalletResult<Value> {
        let origin = request.origin;
        let method = RelayMethod::from_str(&request.method)
            .map_err(|_| WalletError::UnsupportedMethod(request.method.clone()))?;
        debug!(origin = %origin, method = %request.method, "relayed request");

        match method {
            RelayMethod::Connect => self.connect(&origin, request.params).await,
            RelayMethod::Disconnect => self.disconnect(&origin).await,
            RelayMethod::GetAccounts => self.get_accounts(&origin).await,
            RelayMethod::GetBalance => self.get_balance(&origin, request.params).await,
            RelayMethod::GetAccountInfo => {
                self.get_account_info(&origin, request.params).await
            }
            RelayMethod::SignMessage => self.sign_message(&origin, request.params).await,
            RelayMethod::SignBlock => {
                self.sign_block(&origin, request.params, false).await
            }
            RelayMethod::SendBlock => self.sign_block(&origin, request.params, true).await,
            RelayMethod::SendTransaction => {
                self.send_transaction(&origin, request.params).await
            }
            RelayMethod::ResolveBns => self.resolve_bns(request.params).await,
        }
    }

    /// Connects `origin`. A previously approved origin is auto-approved
    /// without prompting; otherwise the request queues for the user unless
    /// `onlyIfTrusted` forbids prompting.
    async fn connect(&self, origin: &str, params: Value) -> WalletResult<Value> {
        let params: ConnectParams = parse_params(params)?;

        let rx = {
            let mut inner = self.inner.lock().await;
            if let Some(grant) = inner.permissions.get(origin) {
                if !grant.accounts.is_empty() {
                    let accounts = grant.accounts.clone();
                    inner.permissions.touch(origin, unix_now())?;
                    return Ok(json!({ "accounts": accounts }));
                }
            }
            if params.only_if_trusted {
                return Err(WalletError::Unauthorized);
            }

            let (tx, rx) = oneshot::channel();
            if let Some(existing) = inner.connect_ids.get(origin).cloned() {
                // Duplicate concurrent connect: piggyback on the pending
                // approval instead of queueing a second prompt.
                let entry = inner
                    .entries
                    .get_mut(&existing)
                    .ok_or_else(|| WalletError::InternalError("stale connect id".to_string()))?;
                entry.responders.push(tx);
            } else {
                let approval_id = Uuid::new_v4().to_string();
                inner.connect_ids.insert(origin.to_string(), approval_id.clone());
                inner.enqueue(PendingEntry {
                    request: PendingRequest {
                        id: approval_id,
                        origin: origin.to_string(),
                        kind: ApprovalKind::Connect,
                        summary: json!({}),
                    },
                    responders: vec![tx],
                });
            }
            rx
        };

        await_decision(rx).await?;

        let inner = self.inner.lock().await;
        let grant = inner
            .permissions
            .get(origin)
            .ok_or(WalletError::Unauthorized)?;
        Ok(json!({ "accounts": grant.accounts }))
    }

    async fn disconnect(&self, origin: &str) -> WalletResult<Value> {
        self.revoke_permission(origin).await?;
        Ok(Value::Null)
    }

    async fn get_accounts(&self, origin: &str) -> WalletResult<Value> {
        let inner = self.inner.lock().await;
        let grant = inner
            .permissions
            .get(origin)
            .ok_or(WalletError::Unauthorized)?;
        Ok(json!({ "accounts": grant.accounts }))
    }

    async fn get_balance(&self, origin: &str, params: Value) -> WalletResult<Value> {
        let params: AccountParams = parse_params(params)?;
        self.require_permission(origin, &params.account).await?;
        let balance = self.engine.balance(&params.account).await?;
        Ok(json!({ "balance": balance.to_string() }))
    }

    async fn get_account_info(&self, origin: &str, params: Value) -> WalletResult<Value> {
        let params: AccountParams = parse_params(params)?;
        self.require_permission(origin, &params.account).await?;
        let info = self.engine.rpc().account_info(&params.account).await?;
        Ok(info.map_or(Value::Null, |info| {
            json!({
                "frontier": hex::encode_upper(info.frontier),
                "balance": info.balance.to_string(),
                "representative": info.representative,
                "confirmation_height": info.confirmation_height.to_string(),
            })
        }))
    }

    async fn sign_message(&self, origin: &str, params: Value) -> WalletResult<Value> {
        let params: SignMessageParams = parse_params(params)?;
        self.request_approval(
            origin,
            &params.account,
            ApprovalKind::SignMessage,
            json!({ "account": params.account, "message": params.message }),
        )
        .await?;

        let signature =
            self.engine
                .sign_message(&params.account, &params.message, params.display, origin)?;
        self.touch(origin).await?;
        Ok(json!({ "signature": signature }))
    }

    async fn sign_block(
        &self,
        origin: &str,
        params: Value,
        and_broadcast: bool,
    ) -> WalletResult<Value> {
        let params: BlockParams = parse_params(params)?;
        self.request_approval(
            origin,
            &params.account,
            ApprovalKind::SignBlock,
            json!({ "account": params.account, "balance": params.block.balance.to_string() }),
        )
        .await?;

        let signed = self.engine.sign_block(&params.block, &params.account)?;
        let result = if and_broadcast {
            let subtype = match params.block.kind {
                crate::block::BlockKind::Send => "send",
                crate::block::BlockKind::Receive => "receive",
                crate::block::BlockKind::Change => "change",
            };
            let hash = self.engine.rpc().process(subtype, &signed).await?;
            json!({ "hash": hex::encode_upper(hash), "block": signed })
        } else {
            json!({ "block": signed })
        };
        self.touch(origin).await?;
        Ok(result)
    }

    async fn send_transaction(&self, origin: &str, params: Value) -> WalletResult<Value> {
        let params: SendParams = parse_params(params)?;
        let amount: u128 = params
            .amount
            .parse()
            .map_err(|_| WalletError::InvalidParams("bad raw amount".to_string()))?;
        self.request_approval(
            origin,
            &params.from,
            ApprovalKind::SendTransaction,
            json!({ "from": params.from, "to": params.to, "amount": params.amount }),
        )
        .await?;

        let hash = self.engine.send(&params.from, &params.to, amount).await?;
        self.touch(origin).await?;
        Ok(json!({ "hash": hex::encode_upper(hash) }))
    }

    async fn resolve_bns(&self, params: Value) -> WalletResult<Value> {
        let params: ResolveParams = parse_params(params)?;
        let resolver = BnsResolver::new(self.engine.rpc(), self.registries.clone());
        let address = resolver.resolve(&params.name).await?;
        Ok(json!({ "address": address }))
    }

    async fn require_permission(&self, origin: &str, account: &str) -> WalletResult<()> {
        let inner = self.inner.lock().await;
        if inner.permissions.allows(origin, account) {
            Ok(())
        } else {
            Err(WalletError::Unauthorized)
        }
    }

    async fn touch(&self, origin: &str) -> WalletResult<()> {
        self.inner.lock().await.permissions.touch(origin, unix_now())
    }

    /// Queues an approval for an account-scoped operation and waits for the
    /// user's decision. Immediate [`WalletError::Unauthorized`] when the
    /// origin lacks permission for the account.
    async fn request_approval(
        &self,
        origin: &str,
        account: &str,
        kind: ApprovalKind,
        summary: Value,
    ) -> WalletResult<()> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if !inner.permissions.allows(origin, account) {
                return Err(WalletError::Unauthorized);
            }
            let (tx, rx) = oneshot::channel();
            inner.enqueue(PendingEntry {
                request: PendingRequest {
                    id: Uuid::new_v4().to_string(),
                    origin: origin.to_string(),
                    kind,
                    summary,
                },
                responders: vec![tx],
            });
            rx
        };
        await_decision(rx).await
    }

    /// The approval currently presented to the user: always the queue
    /// front, across all origins.
    pub async fn next_approval(&self) -> Option<PendingRequest> {
        let inner = self.inner.lock().await;
        inner
            .queue
            .front()
            .and_then(|id| inner.entries.get(id))
            .map(|entry| entry.request.clone())
    }

    /// Number of approvals waiting, including the one presented.
    pub async fn pending_approvals(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Applies the user's decision to a queued approval.
    ///
    /// Approving a connect grants the origin every wallet account and
    /// raises `accountsChanged`; the grant requires the wallet to be
    /// unlocked, and on failure the approval stays queued.
    ///
    /// # Errors
    ///
    /// [`WalletError::InvalidParams`] for an unknown approval id; engine
    /// errors when a connect grant cannot be built.
    pub async fn decide(&self, approval_id: &str, approved: bool) -> WalletResult<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .entries
            .get(approval_id)
            .ok_or_else(|| WalletError::InvalidParams("unknown approval id".to_string()))?;
        let origin = entry.request.origin.clone();
        let kind = entry.request.kind.clone();

        if approved && kind == ApprovalKind::Connect {
            // Build the grant before consuming the entry so a locked wallet
            // leaves the approval queued.
            let accounts: Vec<String> = self
                .engine
                .accounts()?
                .into_iter()
                .map(|account| account.address)
                .collect();
            inner.permissions.grant(&origin, accounts.clone(), unix_now())?;
            inner.emit(
                &origin,
                EVENT_ACCOUNTS_CHANGED,
                json!({ "accounts": accounts }),
            );
        }

        let entry = inner.remove_entry(approval_id);
        if let Some(entry) = entry {
            info!(origin = %origin, approved, "approval decided");
            let decision = if approved {
                Decision::Approved
            } else {
                Decision::Rejected
            };
            for responder in entry.responders {
                // A caller that gave up waiting is not an error.
                let _ = responder.send(decision);
            }
        }
        Ok(())
    }

    /// Revokes `origin`'s grant, force-rejects its queued approvals, and
    /// raises `disconnect` for its page contexts.
    ///
    /// # Errors
    ///
    /// Returns an error if the permission record cannot be persisted.
    pub async fn revoke_permission(&self, origin: &str) -> WalletResult<()> {
        let mut inner = self.inner.lock().await;
        inner.permissions.revoke(origin)?;

        let doomed: Vec<String> = inner
            .queue
            .iter()
            .filter(|id| {
                inner
                    .entries
                    .get(*id)
                    .is_some_and(|entry| entry.request.origin == origin)
            })
            .cloned()
            .collect();
        for id in doomed {
            if let Some(entry) = inner.remove_entry(&id) {
                warn!(origin = %origin, approval = %id, "force-rejecting in-flight approval");
                for responder in entry.responders {
                    let _ = responder.send(Decision::Revoked);
                }
            }
        }

        inner.emit(origin, EVENT_DISCONNECT, Value::Null);
        Ok(())
    }

    /// Subscribes a page context to `origin`'s events. Every subscriber of
    /// the origin receives every event.
    pub async fn subscribe(&self, origin: &str) -> broadcast::Receiver<EventEnvelope> {
        let mut inner = self.inner.lock().await;
        inner
            .events
            .entry(origin.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// The permission entry for `origin`, if any.
    pub async fn permission(&self, origin: &str) -> Option<crate::permissions::Permission> {
        self.inner.lock().await.permissions.get(origin).cloned()
    }
}

impl RelayInner {
    fn enqueue(&mut self, entry: PendingEntry) {
        let id = entry.request.id.clone();
        self.queue.push_back(id.clone());
        self.entries.insert(id, entry);
    }

    fn remove_entry(&mut self, id: &str) -> Option<PendingEntry> {
        self.queue.retain(|queued| queued != id);
        let entry = self.entries.remove(id)?;
        if entry.request.kind == ApprovalKind::Connect {
            self.connect_ids.remove(&entry.request.origin);
        }
        Some(entry)
    }

    fn emit(&mut self, origin: &str, event: &str, data: Value) {
        if let Some(sender) = self.events.get(origin) {
            // Send fails only when no page context is listening.
            let _ = sender.send(EventEnvelope::new(event.to_string(), data));
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> WalletResult<T> {
    serde_json::from_value(params)
        .map_err(|err| WalletError::InvalidParams(format!("bad params: {err}")))
}

async fn await_decision(rx: oneshot::Receiver<Decision>) -> WalletResult<()> {
    match rx.await {
        Ok(Decision::Approved) => Ok(()),
        Ok(Decision::Rejected) => Err(WalletError::UserRejected),
        Ok(Decision::Revoked) => Err(WalletError::Unauthorized),
        Err(_) => Err(WalletError::InternalError(
            "approval channel closed".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;
    use crate::{
        engine::EngineConfig, error::ErrorPayload, keys::SEED_LEN, rpc::LedgerRpc,
        storage::MemoryStorage,
    };

    const TEST_ORIGIN: &str = "https://dapp.example";

    fn password() -> SecretString {
        "password123".to_string().into()
    }

    fn offline_relay() -> Arc<RequestRelay> {
        let storage = Arc::new(MemoryStorage::new());
        let rpc = Arc::new(LedgerRpc::new(vec!["http://127.0.0.1:1".to_string()]).expect("rpc"));
        let engine = Arc::new(
            WalletEngine::new(
                storage.clone(),
                rpc,
                EngineConfig {
                    work_threshold: 0x0000_0100_0000_0000,
                    ..EngineConfig::default()
                },
            )
            .expect("engine"),
        );
        engine
            .create_wallet_from_seed(&[0u8; SEED_LEN], &password())
            .expect("create");
        Arc::new(RequestRelay::new(engine, storage, Vec::new()).expect("relay"))
    }

    fn request(origin: &str, method: &str, params: Value) -> RelayRequest {
        RelayRequest {
            id: Uuid::new_v4().to_string(),
            method: method.to_string(),
            params,
            origin: origin.to_string(),
        }
    }

    fn error_payload(response: ResponseEnvelope) -> ErrorPayload {
        match response.response {
            ResponseBody::Err(payload) => payload,
            ResponseBody::Ok(value) => panic!("unexpected ok body: {value}"),
        }
    }

    fn ok_value(response: ResponseEnvelope) -> Value {
        match response.response {
            ResponseBody::Ok(value) => value,
            ResponseBody::Err(payload) => panic!("unexpected error body: {payload:?}"),
        }
    }

    async fn wait_for_pending(relay: &RequestRelay, count: usize) {
        for _ in 0..500 {
            if relay.pending_approvals().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("approval queue never reached {count} entries");
    }

    /// Drives a full connect through approval, returning the granted
    /// accounts.
    async fn connect_approved(relay: &Arc<RequestRelay>, origin: &str) -> Vec<String> {
        let handle = {
            let relay = relay.clone();
            let req = request(origin, "connect", json!({}));
            tokio::spawn(async move { relay.handle(req).await })
        };
        wait_for_pending(relay, 1).await;
        let approval = relay.next_approval().await.expect("pending");
        assert_eq!(approval.kind, ApprovalKind::Connect);
        relay.decide(&approval.id, true).await.expect("decide");

        let value = ok_value(handle.await.expect("join"));
        value["accounts"]
            .as_array()
            .expect("accounts")
            .iter()
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_connect_approval_grants_all_accounts() {
        let relay = offline_relay();
        let accounts = connect_approved(&relay, TEST_ORIGIN).await;
        assert_eq!(accounts.len(), 1);
        assert!(accounts[0].starts_with("ban_"));

        let grant = relay.permission(TEST_ORIGIN).await.expect("grant");
        assert_eq!(grant.accounts, accounts);
        assert_eq!(relay.pending_approvals().await, 0);
    }

    #[tokio::test]
    async fn test_connected_origin_auto_approves_without_prompt() {
        let relay = offline_relay();
        let first = connect_approved(&relay, TEST_ORIGIN).await;

        let response = relay
            .handle(request(TEST_ORIGIN, "connect", json!({})))
            .await;
        let value = ok_value(response);
        assert_eq!(value["accounts"][0].as_str(), Some(first[0].as_str()));
        assert_eq!(relay.pending_approvals().await, 0);
    }

    #[tokio::test]
    async fn test_only_if_trusted_refuses_to_prompt() {
        let relay = offline_relay();
        let response = relay
            .handle(request(
                TEST_ORIGIN,
                "connect",
                json!({ "onlyIfTrusted": true }),
            ))
            .await;
        assert_eq!(error_payload(response).code, 4100);
        assert_eq!(relay.pending_approvals().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_connect_shares_one_approval() {
        let relay = offline_relay();
        let first = {
            let relay = relay.clone();
            let req = request(TEST_ORIGIN, "connect", json!({}));
            tokio::spawn(async move { relay.handle(req).await })
        };
        wait_for_pending(&relay, 1).await;
        let second = {
            let relay = relay.clone();
            let req = request(TEST_ORIGIN, "connect", json!({}));
            tokio::spawn(async move { relay.handle(req).await })
        };
        // Let the duplicate attach to the existing entry.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(relay.pending_approvals().await, 1);

        let approval = relay.next_approval().await.expect("pending");
        relay.decide(&approval.id, true).await.expect("decide");

        let first = ok_value(first.await.expect("join"));
        let second = ok_value(second.await.expect("join"));
        assert_eq!(first["accounts"], second["accounts"]);
    }

    #[tokio::test]
    async fn test_connect_rejection_is_user_rejected() {
        let relay = offline_relay();
        let handle = {
            let relay = relay.clone();
            let req = request(TEST_ORIGIN, "connect", json!({}));
            tokio::spawn(async move { relay.handle(req).await })
        };
        wait_for_pending(&relay, 1).await;
        let approval = relay.next_approval().await.expect("pending");
        relay.decide(&approval.id, false).await.expect("decide");

        assert_eq!(error_payload(handle.await.expect("join")).code, 4001);
        assert!(relay.permission(TEST_ORIGIN).await.is_none());
    }

    #[tokio::test]
    async fn test_sign_without_permission_rejected_without_prompt() {
        let relay = offline_relay();
        let response = relay
            .handle(request(
                TEST_ORIGIN,
                "signMessage",
                json!({ "account": "ban_whatever", "message": "hi" }),
            ))
            .await;
        assert_eq!(error_payload(response).code, 4100);
        assert_eq!(relay.pending_approvals().await, 0);
    }

    #[tokio::test]
    async fn test_sign_message_through_approval() {
        let relay = offline_relay();
        let accounts = connect_approved(&relay, TEST_ORIGIN).await;

        let handle = {
            let relay = relay.clone();
            let req = request(
                TEST_ORIGIN,
                "signMessage",
                json!({ "account": accounts[0], "message": "hello banano" }),
            );
            tokio::spawn(async move { relay.handle(req).await })
        };
        wait_for_pending(&relay, 1).await;
        let approval = relay.next_approval().await.expect("pending");
        assert_eq!(approval.kind, ApprovalKind::SignMessage);
        relay.decide(&approval.id, true).await.expect("decide");

        let value = ok_value(handle.await.expect("join"));
        let signature = value["signature"].as_str().expect("signature");
        assert_eq!(signature.len(), 128);
        assert!(WalletEngine::verify_signed_message(
            &accounts[0],
            "hello banano",
            MessageDisplay::Utf8,
            TEST_ORIGIN,
            signature,
        ));
    }

    #[tokio::test]
    async fn test_approvals_present_fifo_across_origins() {
        let relay = offline_relay();
        let accounts_a = connect_approved(&relay, "https://a.example").await;
        let accounts_b = connect_approved(&relay, "https://b.example").await;

        let first = {
            let relay = relay.clone();
            let req = request(
                "https://a.example",
                "signMessage",
                json!({ "account": accounts_a[0], "message": "one" }),
            );
            tokio::spawn(async move { relay.handle(req).await })
        };
        wait_for_pending(&relay, 1).await;
        let second = {
            let relay = relay.clone();
            let req = request(
                "https://b.example",
                "signMessage",
                json!({ "account": accounts_b[0], "message": "two" }),
            );
            tokio::spawn(async move { relay.handle(req).await })
        };
        wait_for_pending(&relay, 2).await;

        let front = relay.next_approval().await.expect("front");
        assert_eq!(front.origin, "https://a.example");
        relay.decide(&front.id, true).await.expect("decide a");
        ok_value(first.await.expect("join"));

        let front = relay.next_approval().await.expect("front");
        assert_eq!(front.origin, "https://b.example");
        relay.decide(&front.id, true).await.expect("decide b");
        ok_value(second.await.expect("join"));
    }

    #[tokio::test]
    async fn test_revoke_force_rejects_in_flight_and_emits_disconnect() {
        let relay = offline_relay();
        let accounts_a = connect_approved(&relay, "https://a.example").await;
        connect_approved(&relay, "https://b.example").await;
        let mut events = relay.subscribe("https://a.example").await;

        let in_flight = {
            let relay = relay.clone();
            let req = request(
                "https://a.example",
                "signMessage",
                json!({ "account": accounts_a[0], "message": "doomed" }),
            );
            tokio::spawn(async move { relay.handle(req).await })
        };
        wait_for_pending(&relay, 1).await;

        relay.revoke_permission("https://a.example").await.expect("revoke");

        assert_eq!(error_payload(in_flight.await.expect("join")).code, 4100);
        assert_eq!(relay.pending_approvals().await, 0);
        assert!(relay.permission("https://a.example").await.is_none());
        // Revocation is scoped to one origin.
        assert!(relay.permission("https://b.example").await.is_some());

        let event = events.recv().await.expect("event");
        assert_eq!(event.event, EVENT_DISCONNECT);
    }

    #[tokio::test]
    async fn test_disconnect_method_revokes_grant() {
        let relay = offline_relay();
        connect_approved(&relay, TEST_ORIGIN).await;

        ok_value(relay.handle(request(TEST_ORIGIN, "disconnect", json!({}))).await);
        assert!(relay.permission(TEST_ORIGIN).await.is_none());

        let response = relay
            .handle(request(TEST_ORIGIN, "getAccounts", json!({})))
            .await;
        assert_eq!(error_payload(response).code, 4100);
    }

    #[tokio::test]
    async fn test_connect_approval_emits_accounts_changed() {
        let relay = offline_relay();
        let mut events = relay.subscribe(TEST_ORIGIN).await;
        let accounts = connect_approved(&relay, TEST_ORIGIN).await;

        let event = events.recv().await.expect("event");
        assert_eq!(event.event, EVENT_ACCOUNTS_CHANGED);
        assert_eq!(event.data["accounts"][0].as_str(), Some(accounts[0].as_str()));
    }

    #[tokio::test]
    async fn test_unknown_method_is_unsupported() {
        let relay = offline_relay();
        let response = relay
            .handle(request(TEST_ORIGIN, "mineBanano", json!({})))
            .await;
        let payload = error_payload(response);
        assert_eq!(payload.code, 4200);
        assert!(payload.message.contains("mineBanano"));
    }

    #[tokio::test]
    async fn test_malformed_params_are_invalid_params() {
        let relay = offline_relay();
        connect_approved(&relay, TEST_ORIGIN).await;
        let response = relay
            .handle(request(TEST_ORIGIN, "getBalance", json!({ "nope": 1 })))
            .await;
        assert_eq!(error_payload(response).code, -32602);
    }
}

/*
[INPUT]:  Primary wallet, deposit amounts, points and ledger node frames
[OUTPUT]: Authenticated connection, open/closed application sessions, balances
[POS]:    Session layer - orchestration of auth, RPC, heartbeat and persistence
[UPDATE]: When session lifecycle steps or connection ownership change
*/

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::{
    AuthAction, AuthMessage, AuthRequest, AuthSession, KeyVault, ReconnectTokenStore,
    SessionSigner, WalletSigner,
};
use crate::config::ClientConfig;
use crate::error::{ClearnodeError, Result};
use crate::heartbeat::Heartbeat;
use crate::rpc::client::log_malformed_frame;
use crate::rpc::{Method, RpcClient, RpcResponse};
use crate::session::amount::normalize_deposit;
use crate::session::records::SessionRecordStore;
use crate::storage::KeyValueStore;
use crate::types::{
    Allocation, AppDefinition, AppSessionResponse, AppSessionStatus, ApplicationSessionRecord,
    AuthState, CloseAppSessionParams, CreateAppSessionParams, LedgerBalance,
    LedgerBalanceSnapshot,
};
use crate::ws::{TransportEvent, WsTransport};

const APP_PROTOCOL: &str = "nitroliterpc";
const CREATOR_WEIGHT: u64 = 100;
const COUNTERPARTY_WEIGHT: u64 = 0;
const QUORUM: u64 = 100;

/// Everything owned by one live transport
struct Connection {
    wallet: Address,
    rpc: Arc<RpcClient>,
    heartbeat: Heartbeat,
    dispatch: JoinHandle<()>,
    balance_listener: JoinHandle<()>,
}

/// Drives one wallet's connection to the ledger node and its application
/// session.
///
/// Create and close are serialized, so at most one session record exists per
/// wallet even under concurrent callers.
pub struct SessionManager {
    config: ClientConfig,
    vault: KeyVault,
    tokens: ReconnectTokenStore,
    records: SessionRecordStore,
    counterparty: Option<Arc<SessionSigner>>,
    connection: Mutex<Option<Connection>>,
    session_lock: Mutex<()>,
    auth_state: Arc<watch::Sender<AuthState>>,
    balances: Arc<watch::Sender<Option<LedgerBalanceSnapshot>>>,
}

impl SessionManager {
    pub fn new(config: ClientConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_vault(config, store.clone(), KeyVault::new(store))
    }

    /// Use a vault with custom entropy sources
    pub fn with_vault(
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
        vault: KeyVault,
    ) -> Self {
        let (auth_state, _) = watch::channel(AuthState::Disconnected);
        let (balances, _) = watch::channel(None);
        Self {
            config,
            vault,
            tokens: ReconnectTokenStore::new(store.clone()),
            records: SessionRecordStore::new(store),
            counterparty: None,
            connection: Mutex::new(None),
            session_lock: Mutex::new(()),
            auth_state: Arc::new(auth_state),
            balances: Arc::new(balances),
        }
    }

    /// Signer that co-signs `create_app_session` as the second participant
    pub fn with_counterparty(mut self, signer: SessionSigner) -> Self {
        self.counterparty = Some(Arc::new(signer));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect and authenticate `wallet`.
    ///
    /// Any previous connection is torn down first. Resolves once the
    /// handshake ends: `Ok` when authenticated, `AuthFailed` when the node
    /// rejects it, `ConnectionLost` when the transport closes mid-handshake.
    pub async fn connect(&self, wallet: Arc<dyn WalletSigner>) -> Result<()> {
        let url = self.config.validate()?;
        self.disconnect().await;

        let wallet_address = wallet.address();
        let wallet_key = wallet_key(wallet_address);
        let identity = self.vault.get_or_create(&wallet_key)?;
        let signer = Arc::new(identity.signer()?);
        let token = self.tokens.usable_token(&wallet_key)?;
        info!(
            wallet = %wallet_address,
            session_key = %identity.address,
            reconnect = token.is_some(),
            "connecting to ledger node"
        );

        let request = AuthRequest::new(&self.config, wallet_address, signer.address());
        let auth = AuthSession::new(request, token);

        let (transport, events) = WsTransport::connect(url.as_str()).await?;
        let rpc = Arc::new(RpcClient::new(transport, signer));
        let balance_listener = spawn_balance_listener(&rpc, self.balances.clone());

        let (handshake_tx, handshake_rx) = oneshot::channel();
        let (signed_tx, signed_rx) = mpsc::unbounded_channel();
        let worker = DispatchWorker {
            rpc: rpc.clone(),
            auth,
            wallet,
            wallet_key,
            tokens: self.tokens.clone(),
            auth_state: self.auth_state.clone(),
            handshake: Some(handshake_tx),
            signed_tx,
        };
        let dispatch = tokio::spawn(worker.run(events, signed_rx));
        let heartbeat = Heartbeat::spawn(rpc.clone(), self.config.heartbeat_interval);

        *self.connection.lock().await = Some(Connection {
            wallet: wallet_address,
            rpc,
            heartbeat,
            dispatch,
            balance_listener,
        });

        let outcome = handshake_rx
            .await
            .unwrap_or(Err(ClearnodeError::ConnectionLost));
        match &outcome {
            Ok(()) => info!(wallet = %wallet_address, "authenticated with ledger node"),
            Err(err) => {
                warn!(wallet = %wallet_address, error = %err, "handshake did not complete");
                self.disconnect().await;
            }
        }
        outcome
    }

    /// Stop the heartbeat and close the transport. No-op when disconnected.
    pub async fn disconnect(&self) {
        let connection = self.connection.lock().await.take();
        let Some(connection) = connection else {
            return;
        };

        connection.heartbeat.stop().await;
        connection.rpc.transport().close();
        if let Err(err) = connection.dispatch.await {
            warn!(error = %err, "dispatch task ended abnormally");
        }
        connection.balance_listener.abort();
        self.auth_state.send_replace(AuthState::Disconnected);
        info!(wallet = %connection.wallet, "disconnected from ledger node");
    }

    /// Observe authentication state changes
    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    /// Observe the latest balance snapshot
    pub fn balances(&self) -> watch::Receiver<Option<LedgerBalanceSnapshot>> {
        self.balances.subscribe()
    }

    /// Recorded open session for `wallet`, if any
    pub fn active_session(&self, wallet: Address) -> Result<Option<ApplicationSessionRecord>> {
        self.records.load(&wallet_key(wallet))
    }

    /// Open an application session funded with `deposit` of the configured asset
    pub async fn create_application_session(
        &self,
        my_address: Address,
        deposit: &str,
    ) -> Result<ApplicationSessionRecord> {
        let amount = normalize_deposit(deposit)?;
        let _guard = self.session_lock.lock().await;

        let wallet = wallet_key(my_address);
        if let Some(session_id) = self.records.session_id(&wallet)? {
            return Err(ClearnodeError::SessionAlreadyOpen { session_id });
        }
        let rpc = self.authenticated_rpc().await?;
        let counterparty = self
            .counterparty
            .clone()
            .ok_or_else(|| {
                ClearnodeError::Signing("counterparty signer not configured".to_string())
            })?;

        let asset = self.config.asset.clone();
        let participants = vec![my_address, counterparty.address()];
        let params = CreateAppSessionParams {
            definition: AppDefinition {
                protocol: APP_PROTOCOL.to_string(),
                participants: participants.clone(),
                weights: vec![CREATOR_WEIGHT, COUNTERPARTY_WEIGHT],
                quorum: QUORUM,
                challenge: 0,
                nonce: Utc::now().timestamp_millis().max(0) as u64,
            },
            allocations: vec![
                Allocation {
                    participant: my_address,
                    asset: asset.clone(),
                    amount: amount.clone(),
                },
                Allocation {
                    participant: counterparty.address(),
                    asset: asset.clone(),
                    amount: "0".to_string(),
                },
            ],
        };

        let mut request = rpc.next_request(Method::CreateAppSession, param_list(&params)?);
        request.sign_with(rpc.signer())?;
        request.sign_with(&counterparty)?;
        debug!(request_id = request.request_id, %amount, "creating application session");

        let response = rpc.call_signed(request).await?;
        let created = session_response(&response)?;

        let record = ApplicationSessionRecord {
            session_id: created.app_session_id,
            participants,
            asset,
            deposit_amount: amount,
            opened_at: Utc::now(),
        };
        self.records.save(&wallet, &record)?;
        info!(
            wallet = %my_address,
            session_id = %record.session_id,
            deposit = %record.deposit_amount,
            "application session opened"
        );

        spawn_balance_refetch(rpc, self.balances.clone(), my_address);
        Ok(record)
    }

    /// Close the recorded session, returning the deposit to `my_address`
    pub async fn close_application_session(
        &self,
        my_address: Address,
        points_earned: u64,
    ) -> Result<()> {
        let _guard = self.session_lock.lock().await;

        let wallet = wallet_key(my_address);
        let record = self
            .records
            .load(&wallet)?
            .ok_or(ClearnodeError::NoActiveSession)?;
        let deposit = normalize_deposit(&record.deposit_amount)?;
        let rpc = self.authenticated_rpc().await?;

        let params = CloseAppSessionParams {
            app_session_id: record.session_id.clone(),
            allocations: vec![Allocation {
                participant: my_address,
                asset: record.asset.clone(),
                amount: deposit,
            }],
            session_data: Some(json!({ "pointsEarned": points_earned }).to_string()),
        };
        debug!(session_id = %record.session_id, points_earned, "closing application session");

        let response = rpc
            .call(Method::CloseAppSession, param_list(&params)?)
            .await?;
        let closed = session_response(&response)?;

        match closed.status {
            Some(AppSessionStatus::Closed) => {
                self.records.clear(&wallet)?;
                info!(
                    wallet = %my_address,
                    session_id = %record.session_id,
                    points_earned,
                    "application session closed"
                );
                spawn_balance_refetch(rpc, self.balances.clone(), my_address);
                Ok(())
            }
            status => {
                let status = status
                    .map(|status| status.to_string())
                    .unwrap_or_else(|| "missing".to_string());
                warn!(session_id = %record.session_id, %status, "close not confirmed, record kept");
                Err(ClearnodeError::SessionNotClosed { status })
            }
        }
    }

    /// Fetch balances for `account` and publish them as the latest snapshot
    pub async fn get_ledger_balance(&self, account: Address) -> Result<Vec<LedgerBalance>> {
        let rpc = self.authenticated_rpc().await?;
        fetch_balances(&rpc, &self.balances, account).await
    }

    /// Fetch balances in the background; failures are only logged
    pub async fn refetch_balances(&self, account: Address) {
        match self.authenticated_rpc().await {
            Ok(rpc) => spawn_balance_refetch(rpc, self.balances.clone(), account),
            Err(err) => debug!(error = %err, "balance refetch skipped"),
        }
    }

    async fn authenticated_rpc(&self) -> Result<Arc<RpcClient>> {
        if *self.auth_state.borrow() != AuthState::Authenticated {
            return Err(ClearnodeError::NotConnected);
        }
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.rpc.clone())
            .ok_or(ClearnodeError::NotConnected)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("ws_url", &self.config.ws_url)
            .field("auth_state", &*self.auth_state.borrow())
            .finish_non_exhaustive()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.heartbeat.cancel();
            connection.rpc.transport().close();
            connection.dispatch.abort();
            connection.balance_listener.abort();
        }
    }
}

/// Consumes transport events and wallet signatures for one connection, in
/// arrival order
struct DispatchWorker {
    rpc: Arc<RpcClient>,
    auth: AuthSession,
    wallet: Arc<dyn WalletSigner>,
    wallet_key: String,
    tokens: ReconnectTokenStore,
    auth_state: Arc<watch::Sender<AuthState>>,
    handshake: Option<oneshot::Sender<Result<()>>>,
    signed_tx: mpsc::UnboundedSender<(String, Result<String>)>,
}

impl DispatchWorker {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut signed_rx: mpsc::UnboundedReceiver<(String, Result<String>)>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Opened) => self.on_open().await,
                    Some(TransportEvent::Frame(text)) => self.on_frame(&text).await,
                    Some(TransportEvent::Error(err)) => warn!(error = %err, "ws transport error"),
                    Some(TransportEvent::Closed) | None => break,
                },
                Some((challenge, signed)) = signed_rx.recv() => {
                    self.on_challenge_signed(&challenge, signed).await;
                }
            }
        }
        self.on_closed();
    }

    async fn on_open(&mut self) {
        let message = self.auth.on_open();
        self.publish_state();
        self.send_auth(message).await;
    }

    async fn on_frame(&mut self, text: &str) {
        let frame = match RpcResponse::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                log_malformed_frame(&err, text);
                return;
            }
        };

        if !self.auth.intercepts(&frame) {
            self.rpc.dispatch(frame);
            return;
        }

        match self.auth.on_frame(&frame) {
            AuthAction::SignChallenge { challenge } => {
                self.publish_state();
                self.request_wallet_signature(challenge);
            }
            AuthAction::Authenticated { token } => {
                if let Some(token) = token {
                    if let Err(err) = self.tokens.save(&self.wallet_key, &token) {
                        error!(error = %err, "failed to persist reconnect token");
                    }
                }
                self.publish_state();
                self.resolve_handshake(Ok(()));
            }
            AuthAction::Failed { reason } => self.on_auth_failed(reason),
            AuthAction::Ignore => {}
        }
    }

    /// Wallet signing can take arbitrarily long; it runs off the dispatch loop
    fn request_wallet_signature(&self, challenge: String) {
        let hash: B256 = self.auth.request().signing_hash(&challenge);
        let wallet = self.wallet.clone();
        let signed_tx = self.signed_tx.clone();
        tokio::spawn(async move {
            let signed = wallet.sign_typed_data_hash(hash).await;
            let _ = signed_tx.send((challenge, signed));
        });
    }

    async fn on_challenge_signed(&mut self, challenge: &str, signed: Result<String>) {
        match signed {
            Ok(signature) => {
                if let Some(message) = self.auth.challenge_signed(challenge, signature) {
                    self.send_auth(message).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "wallet did not sign the auth challenge");
                if let AuthAction::Failed { reason } = self.auth.fail(err.to_string()) {
                    self.on_auth_failed(reason);
                }
            }
        }
    }

    async fn send_auth(&mut self, message: AuthMessage) {
        let mut request = self.rpc.next_request(message.method, message.params);
        request.signatures = message.signatures;
        self.auth.sent(request.request_id);
        if let Err(err) = self.rpc.send_request(&request).await {
            if let AuthAction::Failed { reason } = self.auth.fail(err.to_string()) {
                self.on_auth_failed(reason);
            }
        }
    }

    fn on_auth_failed(&mut self, reason: String) {
        warn!(wallet = %self.wallet_key, %reason, "authentication failed");
        if self.auth.uses_token() {
            info!(wallet = %self.wallet_key, "discarding rejected reconnect token");
            if let Err(err) = self.tokens.discard(&self.wallet_key) {
                error!(error = %err, "failed to discard reconnect token");
            }
        }
        self.publish_state();
        self.resolve_handshake(Err(ClearnodeError::AuthFailed(reason)));
    }

    fn on_closed(&mut self) {
        self.rpc.fail_all();
        self.auth.on_closed();
        self.publish_state();
        self.resolve_handshake(Err(ClearnodeError::ConnectionLost));
        debug!("dispatch loop finished");
    }

    fn publish_state(&self) {
        self.auth_state.send_replace(self.auth.state().clone());
    }

    fn resolve_handshake(&mut self, outcome: Result<()>) {
        if let Some(handshake) = self.handshake.take() {
            let _ = handshake.send(outcome);
        }
    }
}

fn spawn_balance_listener(
    rpc: &Arc<RpcClient>,
    balances: Arc<watch::Sender<Option<LedgerBalanceSnapshot>>>,
) -> JoinHandle<()> {
    let mut fetched = rpc.subscribe(Method::GetLedgerBalances);
    let mut pushed = rpc.subscribe(Method::BalanceUpdate);

    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = fetched.recv() => frame,
                Some(frame) = pushed.recv() => frame,
                else => break,
            };
            match parse_balances(&frame.params) {
                Ok(list) => publish_balances(&balances, None, list),
                Err(err) => warn!(error = %err, method = %frame.method, "balance push discarded"),
            }
        }
    })
}

fn spawn_balance_refetch(
    rpc: Arc<RpcClient>,
    balances: Arc<watch::Sender<Option<LedgerBalanceSnapshot>>>,
    account: Address,
) {
    tokio::spawn(async move {
        if let Err(err) = fetch_balances(&rpc, &balances, account).await {
            warn!(account = %account, error = %err, "balance refetch failed");
        }
    });
}

async fn fetch_balances(
    rpc: &RpcClient,
    balances: &watch::Sender<Option<LedgerBalanceSnapshot>>,
    account: Address,
) -> Result<Vec<LedgerBalance>> {
    let response = rpc
        .call(Method::GetLedgerBalances, json!([{ "participant": account }]))
        .await?;
    let list = parse_balances(&response.params)?;
    publish_balances(balances, Some(account), list.clone());
    debug!(account = %account, assets = list.len(), "ledger balances fetched");
    Ok(list)
}

fn publish_balances(
    balances: &watch::Sender<Option<LedgerBalanceSnapshot>>,
    account: Option<Address>,
    list: Vec<LedgerBalance>,
) {
    let account = account.or_else(|| {
        balances
            .borrow()
            .as_ref()
            .and_then(|snapshot| snapshot.account)
    });
    balances.send_replace(Some(LedgerBalanceSnapshot {
        account,
        balances: list,
        fetched_at: Utc::now(),
    }));
}

/// Balance list from a fetch response or a `bu` push.
///
/// Accepts `[[{asset, amount}..]]`, `[{asset, amount}..]` and objects holding
/// `ledger_balances` or `balance_updates`.
fn parse_balances(params: &Value) -> Result<Vec<LedgerBalance>> {
    let entries = balance_entries(params).ok_or_else(|| {
        ClearnodeError::InvalidResponse(format!("unexpected balance payload: {params}"))
    })?;

    entries
        .iter()
        .map(|entry| {
            let asset = entry.get("asset").and_then(Value::as_str);
            let amount = match entry.get("amount") {
                Some(Value::String(amount)) => Some(amount.clone()),
                Some(Value::Number(amount)) => Some(amount.to_string()),
                _ => None,
            };
            match (asset, amount) {
                (Some(asset), Some(amount)) => Ok(LedgerBalance {
                    asset: asset.to_string(),
                    amount,
                }),
                _ => Err(ClearnodeError::InvalidResponse(format!(
                    "balance entry without asset/amount: {entry}"
                ))),
            }
        })
        .collect()
}

fn balance_entries(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) if items.iter().all(|item| item.get("asset").is_some()) => Some(items),
        Value::Array(items) if items.len() == 1 => balance_entries(&items[0]),
        Value::Object(map) => map
            .get("ledger_balances")
            .or_else(|| map.get("balance_updates"))
            .and_then(balance_entries),
        _ => None,
    }
}

fn session_response(response: &RpcResponse) -> Result<AppSessionResponse> {
    serde_json::from_value(response.first_param().clone()).map_err(|err| {
        ClearnodeError::InvalidResponse(format!("{} response: {err}", response.method))
    })
}

fn param_list<T: serde::Serialize>(params: &T) -> Result<Value> {
    Ok(Value::Array(vec![serde_json::to_value(params)?]))
}

/// Storage key form of a wallet address
fn wallet_key(address: Address) -> String {
    address.to_string().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_balances_shapes() {
        let nested = json!([[{"asset": "usdc", "amount": "12.5"}, {"asset": "eth", "amount": 2}]]);
        let parsed = parse_balances(&nested).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].amount, "2");

        let flat = json!([{"asset": "usdc", "amount": "1"}]);
        assert_eq!(parse_balances(&flat).unwrap()[0].asset, "usdc");

        let push = json!([{"balance_updates": [{"asset": "usdc", "amount": "3"}]}]);
        assert_eq!(parse_balances(&push).unwrap()[0].amount, "3");

        let keyed = json!({"ledger_balances": []});
        assert!(parse_balances(&keyed).unwrap().is_empty());
    }

    #[test]
    fn test_parse_balances_rejects_garbage() {
        assert!(parse_balances(&json!("nope")).is_err());
        assert!(parse_balances(&json!([{"asset": "usdc"}])).is_err());
    }

    #[test]
    fn test_publish_keeps_known_account() {
        let (tx, rx) = watch::channel(None);
        let account = Address::repeat_byte(7);
        publish_balances(&tx, Some(account), Vec::new());
        publish_balances(&tx, None, vec![LedgerBalance {
            asset: "usdc".to_string(),
            amount: "5".to_string(),
        }]);

        let snapshot = rx.borrow().clone().unwrap();
        assert_eq!(snapshot.account, Some(account));
        assert_eq!(snapshot.amount_of("usdc"), "5");
    }

    #[test]
    fn test_wallet_key_is_lowercase() {
        let address = Address::repeat_byte(0xAB);
        assert_eq!(wallet_key(address), format!("0x{}", "ab".repeat(20)));
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let manager = SessionManager::new(
            ClientConfig::default(),
            Arc::new(crate::storage::MemoryStore::new()),
        )
        .with_counterparty(SessionSigner::from_bytes(&B256::repeat_byte(3)).unwrap());

        assert!(matches!(
            manager.create_application_session(Address::ZERO, "1").await,
            Err(ClearnodeError::NotConnected)
        ));
        assert!(matches!(
            manager.get_ledger_balance(Address::ZERO).await,
            Err(ClearnodeError::NotConnected)
        ));
        manager.disconnect().await;
        assert_eq!(*manager.auth_state().borrow(), AuthState::Disconnected);
    }
}

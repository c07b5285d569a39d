/*
[INPUT]:  Application session scenarios against a mock ledger node
[OUTPUT]: Test results for create/close, persistence and balances
[POS]:    Integration tests - session lifecycle
[UPDATE]: When session manager behavior changes
*/

mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use clearnode_adapter::auth::signer::recover_signer;
use clearnode_adapter::{
    ClearnodeError, EvmWalletSigner, FileStore, KeyValueStore, KeyVault, Method, SessionManager,
    WalletSigner,
};
use common::{
    MockNode, WALLET_KEY, counterparty, manager, memory_store, test_config, wallet_key, within,
};
use rstest::rstest;
use serde_json::{Value, json};

async fn connected(
    node: &mut MockNode,
    store: Arc<dyn KeyValueStore>,
) -> (SessionManager, Address) {
    let manager = manager(&node.url, store);
    let wallet = Arc::new(EvmWalletSigner::new(WALLET_KEY).unwrap());
    let address = wallet.address();
    let (result, ()) = tokio::join!(manager.connect(wallet), node.accept_challenge("jwt-1"));
    tokio_test::assert_ok!(result);
    (manager, address)
}

/// Answer the create call and the balance refetch that follows it
async fn answer_create(node: &mut MockNode, session_id: &str) -> clearnode_adapter::RpcRequest {
    let create = node.next_call().await;
    assert_eq!(create.method, Method::CreateAppSession);
    node.reply(
        create.request_id,
        "create_app_session",
        json!([{"app_session_id": session_id, "status": "open", "version": 1}]),
    );
    create
}

#[tokio::test]
async fn test_create_and_close_session() {
    let mut node = MockNode::start().await;
    let store = memory_store();
    let (manager, me) = connected(&mut node, store.clone()).await;
    let mut balances = manager.balances();

    let (created, create) = tokio::join!(
        manager.create_application_session(me, "10"),
        answer_create(&mut node, "abc123")
    );
    let record = tokio_test::assert_ok!(created);
    assert_eq!(record.session_id, "abc123");
    assert_eq!(record.deposit_amount, "10");

    // Definition and allocations
    let params = &create.params[0];
    let cp = counterparty().address();
    assert_eq!(params["definition"]["protocol"], "nitroliterpc");
    assert_eq!(params["definition"]["participants"], json!([me, cp]));
    assert_eq!(params["definition"]["weights"], json!([100, 0]));
    assert_eq!(params["definition"]["quorum"], 100);
    assert_eq!(params["definition"]["challenge"], 0);
    assert!(params["definition"]["nonce"].as_u64().unwrap() > 0);
    assert_eq!(
        params["allocations"],
        json!([
            {"participant": me, "asset": "usdc", "amount": "10"},
            {"participant": cp, "asset": "usdc", "amount": "0"},
        ])
    );

    // Both signatures cover the same payload
    let session_key = KeyVault::new(store.clone())
        .load(&wallet_key(me))
        .unwrap()
        .unwrap()
        .address;
    assert_eq!(create.signatures.len(), 2);
    assert_eq!(recover_signer(&create.payload(), &create.signatures[0]).unwrap(), session_key);
    assert_eq!(recover_signer(&create.payload(), &create.signatures[1]).unwrap(), cp);

    // A balance refetch follows the open
    let refetch = node.next_call().await;
    assert_eq!(refetch.method, Method::GetLedgerBalances);
    assert_eq!(refetch.params, json!([{"participant": me}]));
    node.reply(
        refetch.request_id,
        "get_ledger_balances",
        json!([[{"asset": "usdc", "amount": "90"}]]),
    );
    within(balances.changed()).await.unwrap();
    assert_eq!(balances.borrow().as_ref().unwrap().amount_of("usdc"), "90");

    assert_eq!(manager.active_session(me).unwrap(), Some(record));

    let (closed, ()) = tokio::join!(manager.close_application_session(me, 42), async {
        let close = node.next_call().await;
        assert_eq!(close.method, Method::CloseAppSession);
        assert_eq!(close.signatures.len(), 1);
        let params = &close.params[0];
        assert_eq!(params["app_session_id"], "abc123");
        assert_eq!(
            params["allocations"],
            json!([{"participant": me, "asset": "usdc", "amount": "10"}])
        );
        let session_data: Value =
            serde_json::from_str(params["session_data"].as_str().unwrap()).unwrap();
        assert_eq!(session_data, json!({"pointsEarned": 42}));
        node.reply(
            close.request_id,
            "close_app_session",
            json!([{"app_session_id": "abc123", "status": "closed", "version": 2}]),
        );
    });
    tokio_test::assert_ok!(closed);
    assert!(manager.active_session(me).unwrap().is_none());

    let refetch = node.next_call().await;
    assert_eq!(refetch.method, Method::GetLedgerBalances);
}

#[tokio::test]
async fn test_second_create_is_refused_locally() {
    let mut node = MockNode::start().await;
    let (manager, me) = connected(&mut node, memory_store()).await;

    let (created, _) = tokio::join!(
        manager.create_application_session(me, "5"),
        answer_create(&mut node, "first")
    );
    tokio_test::assert_ok!(created);
    let refetch = node.next_call().await;
    assert_eq!(refetch.method, Method::GetLedgerBalances);

    let second = manager.create_application_session(me, "5").await;
    assert!(matches!(
        second,
        Err(ClearnodeError::SessionAlreadyOpen { session_id }) if session_id == "first"
    ));
    assert!(node.expect_silence(Duration::from_millis(200)).await);
}

#[tokio::test]
async fn test_concurrent_creates_open_one_session() {
    let mut node = MockNode::start().await;
    let (manager, me) = connected(&mut node, memory_store()).await;

    let (first, second, _) = tokio::join!(
        manager.create_application_session(me, "1"),
        manager.create_application_session(me, "2"),
        answer_create(&mut node, "only")
    );
    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert!(
        [first, second]
            .into_iter()
            .any(|result| matches!(result, Err(ClearnodeError::SessionAlreadyOpen { .. })))
    );
}

#[tokio::test]
async fn test_close_without_session() {
    let mut node = MockNode::start().await;
    let (manager, me) = connected(&mut node, memory_store()).await;

    let result = manager.close_application_session(me, 1).await;
    assert!(matches!(result, Err(ClearnodeError::NoActiveSession)));
    assert!(node.expect_silence(Duration::from_millis(200)).await);
}

#[tokio::test]
async fn test_close_without_deposit() {
    let mut node = MockNode::start().await;
    let store = memory_store();
    let (manager, me) = connected(&mut node, store.clone()).await;

    let (created, _) = tokio::join!(
        manager.create_application_session(me, "3"),
        answer_create(&mut node, "s-1")
    );
    tokio_test::assert_ok!(created);
    store
        .delete(&clearnode_adapter::session::records::deposit_key(&wallet_key(me)))
        .unwrap();

    let result = manager.close_application_session(me, 1).await;
    assert!(matches!(result, Err(ClearnodeError::MissingDepositAmount)));
}

#[tokio::test]
async fn test_close_not_confirmed_keeps_record() {
    let mut node = MockNode::start().await;
    let (manager, me) = connected(&mut node, memory_store()).await;

    let (created, _) = tokio::join!(
        manager.create_application_session(me, "4"),
        answer_create(&mut node, "s-2")
    );
    tokio_test::assert_ok!(created);
    node.next_call().await;

    let (closed, ()) = tokio::join!(manager.close_application_session(me, 7), async {
        let close = node.next_call().await;
        node.reply(
            close.request_id,
            "close_app_session",
            json!([{"app_session_id": "s-2", "status": "open"}]),
        );
    });
    assert!(matches!(
        closed,
        Err(ClearnodeError::SessionNotClosed { status }) if status == "open"
    ));
    assert!(manager.active_session(me).unwrap().is_some());
}

#[tokio::test]
async fn test_node_error_leaves_no_record() {
    let mut node = MockNode::start().await;
    let (manager, me) = connected(&mut node, memory_store()).await;

    let (created, ()) = tokio::join!(manager.create_application_session(me, "1"), async {
        let create = node.next_call().await;
        node.reply(create.request_id, "error", json!([{"error": "insufficient funds"}]));
    });
    assert!(matches!(
        created,
        Err(ClearnodeError::Node(message)) if message == "insufficient funds"
    ));
    assert!(manager.active_session(me).unwrap().is_none());
}

#[rstest]
#[case("0")]
#[case("-5")]
#[case("abc")]
#[case("")]
#[case("0.0000001")]
#[tokio::test]
async fn test_invalid_amount_sends_nothing(#[case] deposit: &str) {
    let mut node = MockNode::start().await;
    let (manager, me) = connected(&mut node, memory_store()).await;

    let result = manager.create_application_session(me, deposit).await;
    assert!(matches!(result, Err(ClearnodeError::InvalidAmount(_))));
    assert!(node.expect_silence(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_connection_loss_rejects_calls() {
    let mut node = MockNode::start().await;
    let (manager, me) = connected(&mut node, memory_store()).await;

    let (balance, ()) = tokio::join!(manager.get_ledger_balance(me), async {
        node.next_call().await;
        node.close();
    });
    assert!(matches!(balance, Err(ClearnodeError::ConnectionLost)));

    let mut states = manager.auth_state();
    within(states.wait_for(|state| *state == clearnode_adapter::AuthState::Disconnected))
        .await
        .unwrap();
    assert!(matches!(
        manager.create_application_session(me, "1").await,
        Err(ClearnodeError::NotConnected)
    ));
}

#[tokio::test]
async fn test_balance_push_updates_snapshot() {
    let mut node = MockNode::start().await;
    let (manager, _me) = connected(&mut node, memory_store()).await;
    let mut balances = manager.balances();

    node.reply(
        0,
        "bu",
        json!([{"balance_updates": [{"asset": "usdc", "amount": "7.5"}]}]),
    );
    within(balances.changed()).await.unwrap();
    assert_eq!(balances.borrow().as_ref().unwrap().amount_of("usdc"), "7.5");
}

#[tokio::test]
async fn test_session_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let mut node = MockNode::start().await;

    let me = {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&path).unwrap());
        let (manager, me) = connected(&mut node, store).await;
        let (created, _) = tokio::join!(
            manager.create_application_session(me, "2.5"),
            answer_create(&mut node, "persisted")
        );
        tokio_test::assert_ok!(created);
        node.next_call().await;
        manager.disconnect().await;
        me
    };

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&path).unwrap());
    let manager = manager(&node.url, store);
    let record = manager.active_session(me).unwrap().unwrap();
    assert_eq!(record.session_id, "persisted");
    assert_eq!(record.deposit_amount, "2.5");

    // Reconnect presents the stored token.
    let wallet = Arc::new(EvmWalletSigner::new(WALLET_KEY).unwrap());
    let (result, ()) = tokio::join!(manager.connect(wallet), async {
        let verify = node.next_call().await;
        assert_eq!(verify.method, Method::AuthVerify);
        assert_eq!(verify.params, json!([{"jwt": "jwt-1"}]));
        node.reply(verify.request_id, "auth_verify", json!([{"success": true}]));
    });
    tokio_test::assert_ok!(result);
}

#[tokio::test]
async fn test_create_without_counterparty_sends_nothing() {
    let mut node = MockNode::start().await;
    let manager = SessionManager::new(test_config(&node.url), memory_store());
    let wallet = Arc::new(EvmWalletSigner::new(WALLET_KEY).unwrap());
    let me = wallet.address();
    let (connected, ()) = tokio::join!(manager.connect(wallet), node.accept_challenge("jwt-1"));
    tokio_test::assert_ok!(connected);

    let result = within(manager.create_application_session(me, "1")).await;

    assert!(matches!(result, Err(ClearnodeError::Signing(_))));
    assert!(node.expect_silence(Duration::from_millis(200)).await);
    assert!(manager.active_session(me).unwrap().is_none());
}

#[tokio::test]
async fn test_dropping_manager_closes_connection() {
    let mut node = MockNode::start().await;
    let (manager, _me) = connected(&mut node, memory_store()).await;

    drop(manager);

    node.wait_disconnect().await;
}

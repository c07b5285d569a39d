/*
[INPUT]:  Test scenarios needing a ledger node on the other end of the socket
[OUTPUT]: Scriptable mock node, fixtures and wait helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for clearnode-adapter tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use clearnode_adapter::{
    ClientConfig, KeyValueStore, MemoryStore, RpcRequest, RpcResponse, SessionManager,
    SessionSigner,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

/// Hardhat account #0
pub const WALLET_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

enum NodeCommand {
    Send(String),
    Close,
}

/// Ledger node stand-in: records every request and answers only when told.
///
/// Connections are served one after another, so reconnects reach the same
/// node.
pub struct MockNode {
    pub url: String,
    requests: mpsc::UnboundedReceiver<RpcRequest>,
    commands: mpsc::UnboundedSender<NodeCommand>,
    disconnects: mpsc::UnboundedReceiver<()>,
}

impl MockNode {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (commands, mut commands_rx) = mpsc::unbounded_channel();
        let (disconnects_tx, disconnects) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };
                loop {
                    tokio::select! {
                        incoming = ws.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(request) = RpcRequest::parse(text.as_str()) {
                                    let _ = requests_tx.send(request);
                                }
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        command = commands_rx.recv() => match command {
                            Some(NodeCommand::Send(text)) => {
                                let _ = ws.send(Message::Text(text.into())).await;
                            }
                            Some(NodeCommand::Close) => {
                                let _ = ws.close(None).await;
                                break;
                            }
                            None => return,
                        },
                    }
                }
                let _ = disconnects_tx.send(());
            }
        });

        Self {
            url,
            requests,
            commands,
            disconnects,
        }
    }

    /// Next request the client sent; panics after `WAIT`
    pub async fn next_request(&mut self) -> RpcRequest {
        tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a client request")
            .expect("mock node stopped")
    }

    /// Next request, skipping heartbeat pings
    pub async fn next_call(&mut self) -> RpcRequest {
        loop {
            let request = self.next_request().await;
            if request.method != clearnode_adapter::Method::Ping {
                return request;
            }
        }
    }

    /// Whether a request arrives within `within`
    pub async fn expect_silence(&mut self, within: Duration) -> bool {
        tokio::time::timeout(within, self.requests.recv()).await.is_err()
    }

    pub fn reply(&self, request_id: u64, method: &str, params: Value) {
        self.send_raw(RpcResponse::new(request_id, method, params).to_frame());
    }

    pub fn send_raw(&self, text: String) {
        let _ = self.commands.send(NodeCommand::Send(text));
    }

    /// Wait until the current connection ends; panics after `WAIT`
    pub async fn wait_disconnect(&mut self) {
        tokio::time::timeout(WAIT, self.disconnects.recv())
            .await
            .expect("connection still open")
            .expect("mock node stopped");
    }

    /// Drop the current connection from the node side
    pub fn close(&self) {
        let _ = self.commands.send(NodeCommand::Close);
    }

    /// Answer a full challenge handshake
    pub async fn accept_challenge(&mut self, token: &str) {
        let request = self.next_call().await;
        assert_eq!(request.method, clearnode_adapter::Method::AuthRequest);
        self.reply(
            request.request_id,
            "auth_challenge",
            json!([{ "challenge_message": "challenge-1" }]),
        );

        let verify = self.next_call().await;
        assert_eq!(verify.method, clearnode_adapter::Method::AuthVerify);
        self.reply(
            verify.request_id,
            "auth_verify",
            json!([{ "success": true, "jwt_token": token }]),
        );
    }
}

pub fn test_config(url: &str) -> ClientConfig {
    ClientConfig::default()
        .with_ws_url(url)
        .with_heartbeat_interval(Duration::from_secs(300))
}

pub fn counterparty() -> SessionSigner {
    SessionSigner::from_bytes(&B256::repeat_byte(0x42)).unwrap()
}

pub fn manager(url: &str, store: Arc<dyn KeyValueStore>) -> SessionManager {
    SessionManager::new(test_config(url), store).with_counterparty(counterparty())
}

pub fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStore::new())
}

/// Storage key form of a wallet address
pub fn wallet_key(address: Address) -> String {
    address.to_string().to_ascii_lowercase()
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("operation did not finish in time")
}

/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public clearnode adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod auth;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod rpc;
pub mod session;
pub mod storage;
pub mod types;
pub mod ws;

// Re-export commonly used types from auth
pub use auth::{
    EvmWalletSigner,
    KeyVault,
    MockWalletSigner,
    ReconnectTokenStore,
    SessionSigner,
    SigningIdentity,
    WalletSigner,
};

pub use config::ClientConfig;
pub use error::{ClearnodeError, Result};
pub use heartbeat::Heartbeat;
pub use rpc::{Method, RpcClient, RpcRequest, RpcResponse};
pub use session::{SessionManager, SessionRecordStore, normalize_deposit};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

// Re-export all types
pub use types::*;

pub use ws::{TransportEvent, WsTransport};

/*
[INPUT]:  Transport handle, session signer and inbound frames
[OUTPUT]: Correlated call results, notifications and method subscriptions
[POS]:    RPC layer - request signing and response demultiplexing
[UPDATE]: When adding methods or changing dispatch rules
*/

pub mod client;
pub mod message;

pub use client::RpcClient;
pub use message::{Method, RpcRequest, RpcResponse};

/*
[INPUT]:  Ledger node WebSocket URL
[OUTPUT]: Raw text frames and connection lifecycle events
[POS]:    WebSocket layer - transport to the ledger node
[UPDATE]: When changing connection logic or lifecycle events
*/

pub mod client;

pub use client::{TransportEvent, WsTransport};

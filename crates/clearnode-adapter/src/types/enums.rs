/*
[INPUT]:  Ledger node schema definitions and serde requirements
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - type definitions for ledger node communication
[UPDATE]: When node schema changes or new types added
*/

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of an application session as reported by the ledger node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppSessionStatus {
    Open,
    Closed,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for AppSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppSessionStatus::Open => f.write_str("open"),
            AppSessionStatus::Closed => f.write_str("closed"),
            AppSessionStatus::Other(status) => f.write_str(status),
        }
    }
}

/// Authentication progress of one transport.
///
/// `Authenticated` and `Failed` are terminal; leaving them requires a new
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Disconnected,
    AwaitingChallenge,
    AwaitingVerify,
    Authenticated,
    Failed(String),
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed(_))
    }
}

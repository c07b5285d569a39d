/*
[INPUT]:  Ledger node schema definitions and serde requirements
[OUTPUT]: Typed request/response payloads and persisted records
[POS]:    Data layer - type definitions for ledger node communication
[UPDATE]: When node schema changes or new types added
*/

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppSessionStatus;

/// Spending allowance declared when authorizing a session key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub asset: String,
    pub amount: String,
}

/// Funds assigned to one participant when a session opens or closes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub participant: Address,
    pub asset: String,
    pub amount: String,
}

/// Application definition sent with `create_app_session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub protocol: String,
    pub participants: Vec<Address>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    pub challenge: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppSessionParams {
    pub definition: AppDefinition,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseAppSessionParams {
    pub app_session_id: String,
    pub allocations: Vec<Allocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_data: Option<String>,
}

/// Node answer to create/close requests
#[derive(Debug, Clone, Deserialize)]
pub struct AppSessionResponse {
    pub app_session_id: String,
    #[serde(default)]
    pub status: Option<AppSessionStatus>,
    #[serde(default)]
    pub version: Option<u64>,
}

/// One asset balance on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub asset: String,
    pub amount: String,
}

/// Latest balances fetched for an account; overwritten on every fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerBalanceSnapshot {
    pub account: Option<Address>,
    pub balances: Vec<LedgerBalance>,
    pub fetched_at: DateTime<Utc>,
}

impl LedgerBalanceSnapshot {
    /// Amount for an asset, `"0"` when the ledger has no entry
    pub fn amount_of(&self, asset: &str) -> String {
        self.balances
            .iter()
            .find(|balance| balance.asset.eq_ignore_ascii_case(asset))
            .map(|balance| balance.amount.clone())
            .unwrap_or_else(|| "0".to_string())
    }
}

/// Open application session, persisted until a successful close
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSessionRecord {
    pub session_id: String,
    pub participants: Vec<Address>,
    pub asset: String,
    /// Stored under its own key; see `SessionRecordStore`
    #[serde(skip)]
    pub deposit_amount: String,
    pub opened_at: DateTime<Utc>,
}

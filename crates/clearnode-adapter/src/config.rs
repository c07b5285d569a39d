/*
[INPUT]:  Ledger node endpoint and application authorization settings
[OUTPUT]: Validated client configuration consumed by the session manager
[POS]:    Configuration layer - engine-wide settings
[UPDATE]: When adding connection options or authorization parameters
*/

use std::time::Duration;

use alloy_primitives::{Address, address};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClearnodeError, Result};
use crate::types::Allowance;

const DEFAULT_WS_URL: &str = "wss://clearnet.yellow.com/ws";
const DEFAULT_APP_NAME: &str = "Your Domain";
const DEFAULT_SCOPE: &str = "console";
const DEFAULT_APPLICATION: Address = address!("0x9965507D1a55bcC2695C58ba16FB37d819B0A4dc");
const DEFAULT_ASSET: &str = "usdc";
const DEFAULT_AUTH_EXPIRY_SECS: u64 = 60 * 60;
const DEFAULT_HEARTBEAT_SECS: u64 = 10;

/// Client configuration; missing fields take their defaults when deserialized
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the ledger node
    pub ws_url: String,
    /// Application name, also used as the EIP-712 domain name
    pub app_name: String,
    /// Authorization scope requested at auth time
    pub scope: String,
    /// Target application address
    pub application: Address,
    /// Lifetime of the session key authorization
    #[serde(with = "duration_secs")]
    pub auth_expiry: Duration,
    /// Spending allowances declared for the session key
    pub allowances: Vec<Allowance>,
    /// Asset used for application session allocations
    pub asset: String,
    /// Interval between liveness pings
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            application: DEFAULT_APPLICATION,
            auth_expiry: Duration::from_secs(DEFAULT_AUTH_EXPIRY_SECS),
            allowances: vec![Allowance {
                asset: DEFAULT_ASSET.to_string(),
                amount: "1".to_string(),
            }],
            asset: DEFAULT_ASSET.to_string(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        }
    }
}

impl ClientConfig {
    /// Override the endpoint
    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    /// Override the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Parse and check the endpoint URL and numeric settings
    pub fn validate(&self) -> Result<Url> {
        let url = Url::parse(&self.ws_url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClearnodeError::Config(format!(
                "ws_url must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ClearnodeError::Config(
                "heartbeat_interval must be non-zero".to_string(),
            ));
        }
        if self.app_name.trim().is_empty() {
            return Err(ClearnodeError::Config("app_name cannot be empty".to_string()));
        }
        if self.asset.trim().is_empty() {
            return Err(ClearnodeError::Config("asset cannot be empty".to_string()));
        }
        Ok(url)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/*
[INPUT]:  Reconnect tokens issued by the ledger node after challenge auth
[OUTPUT]: Per-wallet token retrieval, replacement and discard
[POS]:    Auth layer - reconnect token lifecycle management
[UPDATE]: When token format assumptions or storage keys change
*/

use std::sync::Arc;

use base64::{
    Engine as _,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::KeyValueStore;

const KEY_PREFIX: &str = "clearnode_jwt_";

/// Persisted reconnect tokens, one per wallet
#[derive(Clone)]
pub struct ReconnectTokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl ReconnectTokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Token to present on the next connect, if any.
    ///
    /// A JWT whose `exp` claim has passed is discarded here instead of being
    /// sent; anything not shaped like a JWT is treated as opaque and returned.
    pub fn usable_token(&self, wallet_address: &str) -> Result<Option<String>> {
        let Some(token) = self.get(wallet_address)? else {
            return Ok(None);
        };

        if let Some(expires_at) = token_expiry(&token) {
            if expires_at <= Utc::now() {
                info!(wallet = %wallet_address, %expires_at, "reconnect token expired, discarding");
                self.discard(wallet_address)?;
                return Ok(None);
            }
        }

        Ok(Some(token))
    }

    /// Stored token, without expiry checks
    pub fn get(&self, wallet_address: &str) -> Result<Option<String>> {
        self.store.get(&storage_key(wallet_address))
    }

    /// Store a new token, replacing any previous one
    pub fn save(&self, wallet_address: &str, token: &str) -> Result<()> {
        debug!(wallet = %wallet_address, "reconnect token stored");
        self.store.set(&storage_key(wallet_address), token)
    }

    /// Forget the token so the next connect runs the full handshake
    pub fn discard(&self, wallet_address: &str) -> Result<()> {
        self.store.delete(&storage_key(wallet_address))
    }
}

/// Store key for a wallet's reconnect token
pub fn storage_key(wallet_address: &str) -> String {
    format!("{KEY_PREFIX}{}", wallet_address.trim().to_ascii_lowercase())
}

/// Expiry encoded in a JWT-shaped token, if one can be read
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload_b64 = token.trim().split('.').nth(1)?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .or_else(|_| URL_SAFE.decode(payload_b64))
        .ok()?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).ok()?;
    let exp = payload.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

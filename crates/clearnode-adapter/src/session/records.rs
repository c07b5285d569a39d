/*
[INPUT]:  Application session records and deposit amounts per wallet
[OUTPUT]: Persisted open-session state that survives restarts
[POS]:    Session layer - storage of the currently open application session
[UPDATE]: When record layout or storage keys change
*/

use std::sync::Arc;

use tracing::debug;

use crate::error::{ClearnodeError, Result};
use crate::storage::KeyValueStore;
use crate::types::ApplicationSessionRecord;

const RECORD_PREFIX: &str = "clearnode_app_session_";
const DEPOSIT_PREFIX: &str = "clearnode_session_deposit_amount_";

/// Open session record and deposit amount, one of each per wallet.
///
/// The deposit is stored under its own key so that a record without its
/// deposit is reported as `MissingDepositAmount` rather than silently closed
/// with a guessed amount.
#[derive(Clone)]
pub struct SessionRecordStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionRecordStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Session id of the recorded open session, if any
    pub fn session_id(&self, wallet_address: &str) -> Result<Option<String>> {
        Ok(self
            .load_record(wallet_address)?
            .map(|record| record.session_id))
    }

    /// Full record with its deposit.
    ///
    /// `Ok(None)` when no session is open; `MissingDepositAmount` when the
    /// record exists but its deposit entry does not.
    pub fn load(&self, wallet_address: &str) -> Result<Option<ApplicationSessionRecord>> {
        let Some(mut record) = self.load_record(wallet_address)? else {
            return Ok(None);
        };

        let deposit = self
            .store
            .get(&deposit_key(wallet_address))?
            .filter(|deposit| !deposit.trim().is_empty())
            .ok_or(ClearnodeError::MissingDepositAmount)?;
        record.deposit_amount = deposit;
        Ok(Some(record))
    }

    /// Persist a newly opened session
    pub fn save(&self, wallet_address: &str, record: &ApplicationSessionRecord) -> Result<()> {
        // Deposit first: a crash in between leaves no record, never a record
        // without its amount.
        self.store
            .set(&deposit_key(wallet_address), &record.deposit_amount)?;
        let encoded = serde_json::to_string(record)?;
        self.store.set(&record_key(wallet_address), &encoded)?;
        debug!(wallet = %wallet_address, session_id = %record.session_id, "session record saved");
        Ok(())
    }

    /// Remove record and deposit after a confirmed close
    pub fn clear(&self, wallet_address: &str) -> Result<()> {
        self.store.delete(&record_key(wallet_address))?;
        self.store.delete(&deposit_key(wallet_address))?;
        debug!(wallet = %wallet_address, "session record cleared");
        Ok(())
    }

    fn load_record(&self, wallet_address: &str) -> Result<Option<ApplicationSessionRecord>> {
        match self.store.get(&record_key(wallet_address))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

pub fn record_key(wallet_address: &str) -> String {
    format!("{RECORD_PREFIX}{}", wallet_address.trim().to_ascii_lowercase())
}

pub fn deposit_key(wallet_address: &str) -> String {
    format!("{DEPOSIT_PREFIX}{}", wallet_address.trim().to_ascii_lowercase())
}

/*
[INPUT]:  Client configuration, wallet and session key addresses, node challenge
[OUTPUT]: Auth request parameters and the EIP-712 policy hash the wallet signs
[POS]:    Auth layer - typed authorization payload binding session key to wallet
[UPDATE]: When the authorization schema or domain separator changes
*/

use std::borrow::Cow;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{Eip712Domain, SolStruct};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::types::Allowance;

mod eip712 {
    alloy_sol_types::sol! {
        #[derive(Debug)]
        struct Allowance {
            string asset;
            string amount;
        }

        #[derive(Debug)]
        struct Policy {
            string challenge;
            string scope;
            address wallet;
            address application;
            address participant;
            uint256 expire;
            Allowance[] allowances;
        }
    }
}

pub use eip712::Policy;

/// Parameters of the `auth_request` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Primary wallet address
    pub address: Address,
    /// Session key being authorized
    pub session_key: Address,
    pub app_name: String,
    pub allowances: Vec<Allowance>,
    /// Unix seconds after which the authorization lapses
    pub expire: u64,
    pub scope: String,
    pub application: Address,
}

impl AuthRequest {
    /// Build the request for a wallet/session key pair, expiring
    /// `config.auth_expiry` from now
    pub fn new(config: &ClientConfig, wallet: Address, session_key: Address) -> Self {
        let now = Utc::now().timestamp().max(0) as u64;
        Self {
            address: wallet,
            session_key,
            app_name: config.app_name.clone(),
            allowances: config.allowances.clone(),
            expire: now + config.auth_expiry.as_secs(),
            scope: config.scope.clone(),
            application: config.application,
        }
    }

    /// Typed policy answering a challenge
    pub fn policy(&self, challenge: &str) -> Policy {
        Policy {
            challenge: challenge.to_string(),
            scope: self.scope.clone(),
            wallet: self.address,
            application: self.application,
            participant: self.session_key,
            expire: U256::from(self.expire),
            allowances: self
                .allowances
                .iter()
                .map(|allowance| eip712::Allowance {
                    asset: allowance.asset.clone(),
                    amount: allowance.amount.clone(),
                })
                .collect(),
        }
    }

    /// Domain separator; only the application name is bound
    pub fn domain(&self) -> Eip712Domain {
        Eip712Domain::new(Some(Cow::Owned(self.app_name.clone())), None, None, None, None)
    }

    /// EIP-712 hash the primary wallet signs for `challenge`
    pub fn signing_hash(&self, challenge: &str) -> B256 {
        self.policy(challenge).eip712_signing_hash(&self.domain())
    }
}

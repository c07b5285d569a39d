/*
[INPUT]:  EIP-712 signing hashes produced by the auth handshake
[OUTPUT]: Primary wallet signatures for session key authorization
[POS]:    Auth layer - wallet integration abstraction
[UPDATE]: When adding new wallet types or changing signature format
*/

use alloy_primitives::{Address, B256};
use async_trait::async_trait;

use crate::error::{ClearnodeError, Result};

/// Trait for the user's primary wallet.
///
/// Only invoked once per challenge handshake to bind the session key to the
/// wallet. The trait is async to support hardware wallets and external signers.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Get the wallet address
    fn address(&self) -> Address;

    /// Sign an EIP-712 signing hash and return a `0x`-prefixed signature
    async fn sign_typed_data_hash(&self, hash: B256) -> Result<String>;
}

/// Mock wallet signer for testing
#[derive(Debug, Clone)]
pub struct MockWalletSigner {
    address: Address,
    signature: Option<String>,
}

impl MockWalletSigner {
    /// Create a new mock signer with predetermined signature
    pub fn new(address: Address, signature: &str) -> Self {
        Self {
            address,
            signature: Some(signature.to_string()),
        }
    }

    /// Mock signer whose every signing attempt is refused
    pub fn rejecting(address: Address) -> Self {
        Self {
            address,
            signature: None,
        }
    }
}

#[async_trait]
impl WalletSigner for MockWalletSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_typed_data_hash(&self, _hash: B256) -> Result<String> {
        self.signature.clone().ok_or_else(|| {
            ClearnodeError::Signing("user rejected the signature request".to_string())
        })
    }
}

/*
[INPUT]:  EVM private key (hex string)
[OUTPUT]: Typed-data signatures and wallet address for the primary wallet
[POS]:    Auth layer - local-key EVM wallet implementation
[UPDATE]: When signing logic or EVM address formatting changes
*/

use std::str::FromStr;

use alloy_primitives::{Address, B256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::auth::WalletSigner;
use crate::auth::signer::encode_signature;
use crate::error::{ClearnodeError, Result};

/// Primary wallet backed by a local private key
pub struct EvmWalletSigner {
    signer: PrivateKeySigner,
}

impl EvmWalletSigner {
    /// Create a new EVM wallet signer from a hex-encoded private key
    ///
    /// Supports both "0x"-prefixed and non-prefixed hex strings.
    pub fn new(private_key_hex: &str) -> Result<Self> {
        let private_key_hex = private_key_hex.trim();
        let private_key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
        let signer = PrivateKeySigner::from_str(private_key_hex)
            .map_err(|e| ClearnodeError::Config(format!("Invalid EVM private key: {e}")))?;

        Ok(Self { signer })
    }
}

#[async_trait]
impl WalletSigner for EvmWalletSigner {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_typed_data_hash(&self, hash: B256) -> Result<String> {
        let signature = self
            .signer
            .sign_hash(&hash)
            .await
            .map_err(|e| ClearnodeError::Signing(format!("Failed to sign typed data: {e}")))?;

        Ok(encode_signature(&signature))
    }
}

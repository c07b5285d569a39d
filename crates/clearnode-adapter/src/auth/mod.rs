/*
[INPUT]:  Wallet signer, session key storage and auth frames
[OUTPUT]: Session signers, authorization payloads and handshake state
[POS]:    Auth layer - handles ledger node authentication
[UPDATE]: When auth flow or signature methods change
*/

pub mod evm_wallet;
pub mod key_vault;
pub mod policy;
pub mod session;
pub mod signer;
pub mod token;
pub mod wallet;

pub use evm_wallet::EvmWalletSigner;
pub use key_vault::{EntropySource, KeyVault, OsEntropy, SigningIdentity, ThreadEntropy};
pub use policy::{AuthRequest, Policy};
pub use session::{AuthAction, AuthMessage, AuthSession};
pub use signer::SessionSigner;
pub use token::ReconnectTokenStore;
pub use wallet::{MockWalletSigner, WalletSigner};

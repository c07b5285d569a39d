/*
[INPUT]:  Wallet address and an injectable key-value store
[OUTPUT]: Persistent per-wallet session signing identities
[POS]:    Auth layer - persistent storage for session-signing keys
[UPDATE]: When key storage format, key derivation or naming conventions change
*/

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, B256, keccak256};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::SessionSigner;
use crate::error::{ClearnodeError, Result};
use crate::storage::KeyValueStore;

const KEY_PREFIX: &str = "clearnode_session_keypair_";

/// Session keypair bound to one wallet
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningIdentity {
    pub private_key: String,
    pub address: Address,
}

impl SigningIdentity {
    /// Build the signer for this identity
    pub fn signer(&self) -> Result<SessionSigner> {
        SessionSigner::from_hex(&self.private_key)
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("private_key", &"<redacted>")
            .field("address", &self.address)
            .finish()
    }
}

/// Source of raw key material
pub trait EntropySource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> std::result::Result<(), rand::Error>;
}

/// Operating system RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        OsRng.try_fill_bytes(dest)
    }
}

/// Thread-local CSPRNG, used as the alternate draw
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadEntropy;

impl EntropySource for ThreadEntropy {
    fn fill(&self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        rand::thread_rng().try_fill_bytes(dest)
    }
}

/// Manages persistence of per-wallet session keys
#[derive(Clone)]
pub struct KeyVault {
    store: Arc<dyn KeyValueStore>,
    primary: Arc<dyn EntropySource>,
    fallback: Arc<dyn EntropySource>,
}

impl KeyVault {
    /// Create a vault over the given store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_entropy(store, Arc::new(OsEntropy), Arc::new(ThreadEntropy))
    }

    /// Create a vault with explicit randomness sources
    pub fn with_entropy(
        store: Arc<dyn KeyValueStore>,
        primary: Arc<dyn EntropySource>,
        fallback: Arc<dyn EntropySource>,
    ) -> Self {
        Self {
            store,
            primary,
            fallback,
        }
    }

    /// Get an existing identity or create and persist a new one
    pub fn get_or_create(&self, wallet_address: &str) -> Result<SigningIdentity> {
        if let Some(identity) = self.load(wallet_address)? {
            return Ok(identity);
        }

        let identity = self.generate()?;
        let encoded = serde_json::to_string(&identity)?;
        self.store.set(&storage_key(wallet_address), &encoded)?;
        info!(
            wallet = %wallet_address,
            session_key = %identity.address,
            "session key created"
        );
        Ok(identity)
    }

    /// Load the stored identity for the given wallet.
    ///
    /// A corrupt entry is reported as absent so that a fresh key replaces it.
    pub fn load(&self, wallet_address: &str) -> Result<Option<SigningIdentity>> {
        let Some(raw) = self.store.get(&storage_key(wallet_address))? else {
            return Ok(None);
        };

        let identity = match serde_json::from_str::<SigningIdentity>(&raw) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(wallet = %wallet_address, error = %err, "stored session key unreadable");
                return Ok(None);
            }
        };

        match identity.signer() {
            Ok(signer) if signer.address() == identity.address => Ok(Some(identity)),
            Ok(_) | Err(_) => {
                warn!(wallet = %wallet_address, "stored session key does not match its address");
                Ok(None)
            }
        }
    }

    fn generate(&self) -> Result<SigningIdentity> {
        match derive_identity(self.primary.as_ref()) {
            Ok(identity) => Ok(identity),
            Err(first) => {
                warn!(
                    error = %first,
                    "session key generation failed, retrying with alternate source"
                );
                derive_identity(self.fallback.as_ref())
                    .map_err(|e| ClearnodeError::KeyGeneration(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVault").finish_non_exhaustive()
    }
}

/// Store key for a wallet's session keypair
pub fn storage_key(wallet_address: &str) -> String {
    format!("{KEY_PREFIX}{}", wallet_address.trim().to_ascii_lowercase())
}

fn derive_identity(source: &dyn EntropySource) -> Result<SigningIdentity> {
    let mut seed = [0u8; 32];
    source
        .fill(&mut seed)
        .map_err(|e| ClearnodeError::KeyGeneration(format!("randomness unavailable: {e}")))?;

    // Hash the raw draw once more before using it as a scalar.
    let key: B256 = keccak256(seed);
    let signer = SessionSigner::from_bytes(&key)
        .map_err(|e| ClearnodeError::KeyGeneration(e.to_string()))?;

    Ok(SigningIdentity {
        private_key: signer.private_key_hex(),
        address: signer.address(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::storage::MemoryStore;

    struct FailingEntropy {
        calls: AtomicUsize,
    }

    impl EntropySource for FailingEntropy {
        fn fill(&self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(rand::Error::new(std::io::Error::other("entropy pool closed")))
        }
    }

    fn failing() -> Arc<FailingEntropy> {
        Arc::new(FailingEntropy {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let vault = KeyVault::new(store.clone());
        let wallet = "0xF39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

        let first = vault.get_or_create(wallet).unwrap();
        let second = vault.get_or_create(wallet).unwrap();
        assert_eq!(first, second);

        // Keyed by the lowercase wallet address.
        let again = vault.get_or_create(&wallet.to_ascii_lowercase()).unwrap();
        assert_eq!(first, again);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_identity_address_matches_key() {
        let vault = KeyVault::new(Arc::new(MemoryStore::new()));
        let identity = vault.get_or_create("0x1111").unwrap();
        assert_eq!(identity.signer().unwrap().address(), identity.address);
    }

    #[test]
    fn test_multi_wallet_isolation() {
        let vault = KeyVault::new(Arc::new(MemoryStore::new()));
        let a = vault.get_or_create("0x1111").unwrap();
        let b = vault.get_or_create("0x2222").unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn test_falls_back_to_alternate_source() {
        let primary = failing();
        let vault = KeyVault::with_entropy(
            Arc::new(MemoryStore::new()),
            primary.clone(),
            Arc::new(ThreadEntropy),
        );

        assert!(vault.get_or_create("0x1111").is_ok());
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_both_sources_failing_is_key_generation_error() {
        let primary = failing();
        let fallback = failing();
        let store = Arc::new(MemoryStore::new());
        let vault = KeyVault::with_entropy(store.clone(), primary.clone(), fallback.clone());

        let err = vault.get_or_create("0x1111").unwrap_err();
        assert!(matches!(err, ClearnodeError::KeyGeneration(_)));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_entry_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        store.set(&storage_key("0x1111"), "{not json").unwrap();

        let vault = KeyVault::new(store.clone());
        let identity = vault.get_or_create("0x1111").unwrap();
        assert_eq!(vault.load("0x1111").unwrap(), Some(identity));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let vault = KeyVault::new(Arc::new(MemoryStore::new()));
        let identity = vault.get_or_create("0x1111").unwrap();
        let debug = format!("{identity:?}");
        assert!(!debug.contains(&identity.private_key));
    }
}

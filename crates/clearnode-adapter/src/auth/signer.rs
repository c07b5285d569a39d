/*
[INPUT]:  JSON payloads and secp256k1 private key bytes
[OUTPUT]: Deterministic ECDSA signatures over canonical payload hashes
[POS]:    Auth layer - cryptographic signing for ledger node requests
[UPDATE]: When changing signing algorithm, hashing or payload canonicalization
*/

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, Signature, keccak256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde_json::Value;

use crate::error::{ClearnodeError, Result};

/// secp256k1 signer for request authentication.
///
/// Signs `keccak256(canonical_json(payload))` directly, without the EIP-191
/// message prefix, which is what the ledger node recomputes on verification.
#[derive(Clone)]
pub struct SessionSigner {
    signer: PrivateKeySigner,
}

impl SessionSigner {
    /// Create signer from raw private key bytes
    pub fn from_bytes(key: &B256) -> Result<Self> {
        let signer = PrivateKeySigner::from_bytes(key)
            .map_err(|e| ClearnodeError::Signing(format!("invalid private key: {e}")))?;
        Ok(Self { signer })
    }

    /// Create signer from a hex private key, with or without `0x`
    pub fn from_hex(private_key_hex: &str) -> Result<Self> {
        let trimmed = private_key_hex.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(ClearnodeError::Signing("private key material is absent".to_string()));
        }
        let signer = PrivateKeySigner::from_str(trimmed)
            .map_err(|e| ClearnodeError::Signing(format!("invalid private key: {e}")))?;
        Ok(Self { signer })
    }

    /// Address derived from the public key
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Private key as `0x`-prefixed hex
    pub fn private_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.signer.to_bytes()))
    }

    /// Sign a payload and return a `0x`-prefixed 65-byte signature
    pub fn sign(&self, payload: &Value) -> Result<String> {
        self.sign_hash(&payload_hash(payload))
    }

    /// Sign a precomputed 32-byte digest
    pub fn sign_hash(&self, hash: &B256) -> Result<String> {
        let signature = self
            .signer
            .sign_hash_sync(hash)
            .map_err(|e| ClearnodeError::Signing(e.to_string()))?;
        Ok(encode_signature(&signature))
    }
}

impl fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Hash signed for a payload
pub fn payload_hash(payload: &Value) -> B256 {
    keccak256(canonical_json(payload).as_bytes())
}

/// Recover the signing address of a payload signature
pub fn recover_signer(payload: &Value, signature: &str) -> Result<Address> {
    let bytes = decode_hex(signature)?;
    let signature = Signature::from_raw(&bytes)
        .map_err(|e| ClearnodeError::Signing(format!("invalid signature: {e}")))?;
    signature
        .recover_address_from_prehash(&payload_hash(payload))
        .map_err(|e| ClearnodeError::Signing(format!("signature recovery failed: {e}")))
}

pub(crate) fn encode_signature(signature: &Signature) -> String {
    // r || s || v with v in {27, 28}
    format!("0x{}", hex::encode(signature.as_bytes()))
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let value = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(value).map_err(|e| ClearnodeError::Signing(format!("invalid hex: {e}")))
}

/// Serialize JSON with object keys sorted at every depth and no whitespace.
///
/// Independent of whether `serde_json` preserves insertion order, so the same
/// logical payload always produces the same bytes.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_address_derivation() {
        let signer = SessionSigner::from_hex(TEST_KEY).unwrap();
        assert_eq!(
            signer.address().to_checksum(None),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        assert_eq!(signer.private_key_hex(), TEST_KEY);
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = SessionSigner::from_hex(TEST_KEY).unwrap();
        let payload = json!([7, "ping", [], 1_700_000_000_000u64]);

        let first = signer.sign(&payload).unwrap();
        let second = signer.sign(&payload).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("0x"));
        assert_eq!(first.len(), 132);
    }

    #[test]
    fn test_key_order_does_not_change_signature() {
        let signer = SessionSigner::from_hex(TEST_KEY).unwrap();
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":3,"y":2},"b":1}"#).unwrap();

        assert_eq!(canonical_json(&a), r#"{"a":{"x":3,"y":2},"b":1}"#);
        assert_eq!(signer.sign(&a).unwrap(), signer.sign(&b).unwrap());
    }

    #[test]
    fn test_recover_signer() {
        let signer = SessionSigner::from_hex(TEST_KEY).unwrap();
        let payload = json!({"participant": "0x1"});
        let signature = signer.sign(&payload).unwrap();

        assert_eq!(recover_signer(&payload, &signature).unwrap(), signer.address());
        assert_ne!(
            recover_signer(&json!({"participant": "0x2"}), &signature).unwrap(),
            signer.address()
        );
    }

    #[test]
    fn test_absent_key_material() {
        assert!(matches!(
            SessionSigner::from_hex(""),
            Err(ClearnodeError::Signing(_))
        ));
        assert!(matches!(
            SessionSigner::from_hex("0x"),
            Err(ClearnodeError::Signing(_))
        ));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let signer = SessionSigner::from_hex(TEST_KEY).unwrap();
        let debug = format!("{signer:?}");
        assert!(!debug.contains("ac0974bec39a17e36ba4a6b4d238ff944bacb478"));
    }
}

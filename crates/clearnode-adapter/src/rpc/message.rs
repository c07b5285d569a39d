/*
[INPUT]:  Raw WebSocket text frames and outbound call parameters
[OUTPUT]: Typed request/response envelopes and method tags
[POS]:    RPC layer - wire envelope encoding and frame parsing
[UPDATE]: When adding methods or changing the envelope format
*/

use std::fmt;

use serde_json::{Value, json};

use crate::auth::SessionSigner;
use crate::auth::signer::canonical_json;
use crate::error::{ClearnodeError, Result};

/// Method tags understood by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    AuthRequest,
    AuthChallenge,
    AuthVerify,
    Error,
    GetLedgerBalances,
    BalanceUpdate,
    CreateAppSession,
    CloseAppSession,
    Ping,
    Pong,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::AuthRequest => "auth_request",
            Method::AuthChallenge => "auth_challenge",
            Method::AuthVerify => "auth_verify",
            Method::Error => "error",
            Method::GetLedgerBalances => "get_ledger_balances",
            Method::BalanceUpdate => "bu",
            Method::CreateAppSession => "create_app_session",
            Method::CloseAppSession => "close_app_session",
            Method::Ping => "ping",
            Method::Pong => "pong",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let method = match value {
            "auth_request" => Method::AuthRequest,
            "auth_challenge" => Method::AuthChallenge,
            "auth_verify" => Method::AuthVerify,
            "error" => Method::Error,
            "get_ledger_balances" => Method::GetLedgerBalances,
            "bu" => Method::BalanceUpdate,
            "create_app_session" => Method::CreateAppSession,
            "close_app_session" => Method::CloseAppSession,
            "ping" => Method::Ping,
            "pong" => Method::Pong,
            _ => return None,
        };
        Some(method)
    }

    /// Frames consumed by the auth handshake rather than RPC dispatch
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Method::AuthRequest | Method::AuthChallenge | Method::AuthVerify
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound request: `{"req": [id, method, params, timestamp], "sig": [...]}`
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub request_id: u64,
    pub method: Method,
    pub params: Value,
    pub timestamp: u64,
    pub signatures: Vec<String>,
}

impl RpcRequest {
    pub fn new(request_id: u64, method: Method, params: Value, timestamp: u64) -> Self {
        Self {
            request_id,
            method,
            params,
            timestamp,
            signatures: Vec::new(),
        }
    }

    /// The `req` tuple; this is the value every signature covers
    pub fn payload(&self) -> Value {
        json!([self.request_id, self.method.as_str(), self.params, self.timestamp])
    }

    /// Append a signature by `signer` over the payload
    pub fn sign_with(&mut self, signer: &SessionSigner) -> Result<()> {
        let signature = signer.sign(&self.payload())?;
        self.signatures.push(signature);
        Ok(())
    }

    /// Serialize for the wire
    pub fn to_frame(&self) -> String {
        canonical_json(&json!({
            "req": self.payload(),
            "sig": self.signatures,
        }))
    }

    /// Parse a request frame (used by test nodes and tooling)
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ClearnodeError::MalformedFrame(format!("not JSON: {e}")))?;
        let (request_id, method, params, timestamp) = split_tuple(value.get("req"))?;
        let method = Method::parse(&method)
            .ok_or_else(|| ClearnodeError::MalformedFrame(format!("unknown method {method}")))?;
        Ok(Self {
            request_id,
            method,
            params,
            timestamp,
            signatures: signatures_of(&value),
        })
    }
}

/// Inbound response or push.
///
/// Accepts the compact `{"res": [id, method, params, timestamp], "sig": [...]}`
/// form and the object form `{"method", "params", "requestId"?}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub request_id: u64,
    pub method: String,
    pub params: Value,
    pub timestamp: u64,
    pub signatures: Vec<String>,
}

impl RpcResponse {
    pub fn new(request_id: u64, method: &str, params: Value) -> Self {
        Self {
            request_id,
            method: method.to_string(),
            params,
            timestamp: 0,
            signatures: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ClearnodeError::MalformedFrame(format!("not JSON: {e}")))?;

        if let Some(res) = value.get("res") {
            let (request_id, method, params, timestamp) = split_tuple(Some(res))?;
            return Ok(Self {
                request_id,
                method,
                params,
                timestamp,
                signatures: signatures_of(&value),
            });
        }

        let method = value
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| ClearnodeError::MalformedFrame("frame has no method".to_string()))?;
        Ok(Self {
            request_id: value.get("requestId").and_then(Value::as_u64).unwrap_or(0),
            method: method.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
            timestamp: value.get("timestamp").and_then(Value::as_u64).unwrap_or(0),
            signatures: signatures_of(&value),
        })
    }

    /// Known method tag, `None` for unrecognized frames
    pub fn method(&self) -> Option<Method> {
        Method::parse(&self.method)
    }

    /// Params object; single-element arrays are unwrapped
    pub fn first_param(&self) -> &Value {
        match &self.params {
            Value::Array(items) if items.len() == 1 => &items[0],
            other => other,
        }
    }

    /// Error text carried by an `error` frame
    pub fn error_message(&self) -> String {
        let param = self.first_param();
        param
            .get("error")
            .and_then(Value::as_str)
            .or_else(|| param.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| param.to_string())
    }

    /// Serialize in compact form
    pub fn to_frame(&self) -> String {
        canonical_json(&json!({
            "res": [self.request_id, self.method, self.params, self.timestamp],
            "sig": self.signatures,
        }))
    }
}

fn split_tuple(tuple: Option<&Value>) -> Result<(u64, String, Value, u64)> {
    let items = tuple
        .and_then(Value::as_array)
        .ok_or_else(|| ClearnodeError::MalformedFrame("envelope is not an array".to_string()))?;
    if items.len() < 3 {
        return Err(ClearnodeError::MalformedFrame(format!(
            "envelope has {} elements, expected 4",
            items.len()
        )));
    }

    let request_id = items[0].as_u64().unwrap_or(0);
    let method = items[1]
        .as_str()
        .ok_or_else(|| ClearnodeError::MalformedFrame("method is not a string".to_string()))?
        .to_string();
    let params = items[2].clone();
    let timestamp = items.get(3).and_then(Value::as_u64).unwrap_or(0);
    Ok((request_id, method, params, timestamp))
}

fn signatures_of(value: &Value) -> Vec<String> {
    value
        .get("sig")
        .and_then(Value::as_array)
        .map(|sigs| {
            sigs.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

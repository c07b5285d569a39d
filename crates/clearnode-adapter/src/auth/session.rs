/*
[INPUT]:  Transport open/close notifications and auth-related inbound frames
[OUTPUT]: Outbound auth messages, wallet signing requests and auth outcome
[POS]:    Auth layer - challenge/response and token reconnect state machine
[UPDATE]: When auth message shapes or state transitions change
*/

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::auth::AuthRequest;
use crate::rpc::{Method, RpcResponse};
use crate::types::AuthState;

/// Auth message to be wrapped in a request envelope and sent
#[derive(Debug, Clone, PartialEq)]
pub struct AuthMessage {
    pub method: Method,
    pub params: Value,
    pub signatures: Vec<String>,
}

/// What the driver must do after an inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// Have the primary wallet sign the policy for this challenge
    SignChallenge { challenge: String },
    /// Handshake done; persist the token if one was issued
    Authenticated { token: Option<String> },
    /// Handshake rejected with the node's text
    Failed { reason: String },
    /// Frame not relevant in the current state
    Ignore,
}

/// Handshake state for one transport
#[derive(Debug)]
pub struct AuthSession {
    request: AuthRequest,
    token: Option<String>,
    state: AuthState,
    /// Id of the last auth message put on the wire
    outstanding: Option<u64>,
}

impl AuthSession {
    /// `token` selects the reconnect path when present
    pub fn new(request: AuthRequest, token: Option<String>) -> Self {
        Self {
            request,
            token,
            state: AuthState::Disconnected,
            outstanding: None,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn request(&self) -> &AuthRequest {
        &self.request
    }

    /// Whether this attempt presented a reconnect token
    pub fn uses_token(&self) -> bool {
        self.token.is_some()
    }

    /// Record the request id an auth message was sent under
    pub fn sent(&mut self, request_id: u64) {
        self.outstanding = Some(request_id);
    }

    /// First message after the transport opens
    pub fn on_open(&mut self) -> AuthMessage {
        match &self.token {
            Some(token) => {
                self.state = AuthState::AwaitingVerify;
                AuthMessage {
                    method: Method::AuthVerify,
                    params: json!([{ "jwt": token }]),
                    signatures: Vec::new(),
                }
            }
            None => {
                self.state = AuthState::AwaitingChallenge;
                AuthMessage {
                    method: Method::AuthRequest,
                    params: json!([self.request]),
                    signatures: Vec::new(),
                }
            }
        }
    }

    /// Whether `frame` belongs to the handshake rather than RPC dispatch.
    ///
    /// An `error` frame is claimed only while awaiting and only when it answers
    /// the outstanding auth message or carries no request id; errors for other
    /// requests (heartbeat pings) go to RPC dispatch.
    pub fn intercepts(&self, frame: &RpcResponse) -> bool {
        match frame.method() {
            Some(method) if method.is_auth() => true,
            Some(Method::Error) => {
                let awaiting = matches!(
                    self.state,
                    AuthState::AwaitingChallenge | AuthState::AwaitingVerify
                );
                let correlated =
                    frame.request_id == 0 || self.outstanding == Some(frame.request_id);
                awaiting && correlated
            }
            _ => false,
        }
    }

    /// Advance on an intercepted frame
    pub fn on_frame(&mut self, frame: &RpcResponse) -> AuthAction {
        match (frame.method(), &self.state) {
            (Some(Method::AuthChallenge), AuthState::AwaitingChallenge) => {
                let challenge = frame
                    .first_param()
                    .get("challenge_message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match challenge {
                    Some(challenge) => {
                        self.state = AuthState::AwaitingVerify;
                        AuthAction::SignChallenge { challenge }
                    }
                    None => self.fail("auth_challenge without challenge_message".to_string()),
                }
            }
            (Some(Method::AuthVerify), AuthState::AwaitingVerify) => {
                let param = frame.first_param();
                let success = param.get("success").and_then(Value::as_bool).unwrap_or(false);
                if success {
                    self.state = AuthState::Authenticated;
                    let token = param
                        .get("jwt_token")
                        .and_then(Value::as_str)
                        .filter(|token| !token.is_empty())
                        .map(str::to_string);
                    AuthAction::Authenticated { token }
                } else {
                    let reason = param
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("auth_verify rejected")
                        .to_string();
                    self.fail(reason)
                }
            }
            (Some(Method::Error), AuthState::AwaitingChallenge | AuthState::AwaitingVerify) => {
                self.fail(frame.error_message())
            }
            (method, state) => {
                debug!(?method, ?state, "auth frame ignored in current state");
                AuthAction::Ignore
            }
        }
    }

    /// Verify message carrying the wallet's policy signature.
    ///
    /// `None` if the handshake already ended while the wallet was signing.
    pub fn challenge_signed(&mut self, challenge: &str, signature: String) -> Option<AuthMessage> {
        if self.state != AuthState::AwaitingVerify || self.token.is_some() {
            warn!(state = ?self.state, "challenge signature arrived after handshake ended");
            return None;
        }
        Some(AuthMessage {
            method: Method::AuthVerify,
            params: json!([{ "challenge": challenge }]),
            signatures: vec![signature],
        })
    }

    /// Move to `Failed` unless already terminal
    pub fn fail(&mut self, reason: String) -> AuthAction {
        if self.state.is_terminal() {
            return AuthAction::Ignore;
        }
        self.state = AuthState::Failed(reason.clone());
        AuthAction::Failed { reason }
    }

    /// Transport closed
    pub fn on_closed(&mut self) {
        self.state = AuthState::Disconnected;
        self.outstanding = None;
    }
}

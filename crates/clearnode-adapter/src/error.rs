/*
[INPUT]:  Error sources (validation, storage, signing, WebSocket, ledger node frames)
[OUTPUT]: Structured error type shared by every layer of the engine
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

/// Main error type for the clearnode adapter
#[derive(Error, Debug)]
pub enum ClearnodeError {
    /// Deposit amount is not a finite positive decimal
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// An application session is already recorded open for this wallet
    #[error("Application session {session_id} is already open")]
    SessionAlreadyOpen { session_id: String },

    /// No application session is recorded for this wallet
    #[error("No active application session")]
    NoActiveSession,

    /// The open session has no stored deposit amount
    #[error("Deposit amount for the active session is missing")]
    MissingDepositAmount,

    /// Session key generation failed after the fallback draw
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Signing failed or key material is absent
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Transport is not open
    #[error("Not connected to the ledger node")]
    NotConnected,

    /// Transport closed while the call was in flight
    #[error("Connection to the ledger node was lost")]
    ConnectionLost,

    /// Challenge rejected, verify failed or reconnect token refused
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Ledger node answered with an explicit error frame
    #[error("Ledger node error: {0}")]
    Node(String),

    /// Inbound frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Close request was answered with a status other than closed
    #[error("Application session not closed (status {status})")]
    SessionNotClosed { status: String },

    /// Response did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Persistent storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClearnodeError {
    /// Check if the error is retryable.
    ///
    /// True only when the request never left the client. `ConnectionLost`
    /// is excluded: the node may already have applied the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClearnodeError::NotConnected | ClearnodeError::WebSocket(_)
        )
    }

    /// Check if error indicates authentication failure
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ClearnodeError::AuthFailed(_) | ClearnodeError::Signing(_)
        )
    }

    /// Errors detected before any network I/O
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ClearnodeError::InvalidAmount(_)
                | ClearnodeError::SessionAlreadyOpen { .. }
                | ClearnodeError::NoActiveSession
                | ClearnodeError::MissingDepositAmount
                | ClearnodeError::KeyGeneration(_)
                | ClearnodeError::Config(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClearnodeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClearnodeError::WebSocket(err.to_string())
    }
}

impl From<std::io::Error> for ClearnodeError {
    fn from(err: std::io::Error) -> Self {
        ClearnodeError::Storage(err.to_string())
    }
}

/// Result type alias for clearnode operations
pub type Result<T> = std::result::Result<T, ClearnodeError>;

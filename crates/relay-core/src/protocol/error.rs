//! Protocol-level errors
//!
//! `WireError` stays inside the protocol and manager layers; the adapter
//! boundary converts it to the public `InvokeError` taxonomy.

use crate::error::InvokeError;
use thiserror::Error;

/// Errors raised by transports and the server client
#[derive(Debug, Error, Clone)]
pub enum WireError {
    /// Could not establish or keep a session
    #[error("connection error: {0}")]
    Connection(String),

    /// Session-level I/O failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected protocol traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server answered with a JSON-RPC fault
    #[error("server fault {code}: {message}")]
    Server { code: i32, message: String },

    /// No response within the request timeout
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Message could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation before the handshake completed
    #[error("client not initialized")]
    NotInitialized,

    /// Handshake attempted twice on one session
    #[error("client already initialized")]
    AlreadyInitialized,
}

impl WireError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a server fault
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Server fault codes treated as transient: overload and internal classes
/// that a later identical request may not hit again.
fn fault_is_transient(code: i32) -> bool {
    matches!(code, -32000 | 429 | 500 | 502 | 503 | 504)
}

impl From<WireError> for InvokeError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Connection(message) | WireError::Transport(message) => {
                InvokeError::transport(message)
            }
            WireError::Timeout(_) => InvokeError::Timeout,
            WireError::Server { code, message } => InvokeError::RemoteExecution {
                message: format!("server fault {}: {}", code, message),
                retryable: fault_is_transient(code),
            },
            WireError::Protocol(message) | WireError::Serialization(message) => {
                InvokeError::internal(message)
            }
            WireError::NotInitialized | WireError::AlreadyInitialized => {
                InvokeError::transport(err.to_string())
            }
        }
    }
}

//! Invocation error taxonomy
//!
//! Every failure the core can hand back to the agent loop is one of the
//! kinds below. Retry policies match on [`ErrorKind`]; the richer
//! [`InvokeError`] carries the details.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, InvokeError>;

/// Coarse error classification used by retry policies and status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown or disabled capability
    NotFound,
    /// Arguments failed schema validation
    InvalidArguments,
    /// Admission denied by the rate limiter
    RateLimited,
    /// Deadline expired while waiting on a transport response or backoff sleep
    Timeout,
    /// Connection-level failure reaching the server
    Transport,
    /// The server ran the capability and reported failure
    RemoteExecution,
    /// Defensive catch-all
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::InvalidArguments => "invalid_arguments",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::RemoteExecution => "remote_execution",
            Self::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// A failed invocation or invocation attempt
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum InvokeError {
    /// Capability is unknown or disabled
    #[error("capability not found: {name}")]
    NotFound { name: String },

    /// Arguments did not match the capability's input schema
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// The rate limiter denied admission
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The invocation deadline expired
    #[error("deadline exceeded")]
    Timeout,

    /// Connection-level failure
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The remote server executed the capability and reported failure
    #[error("remote execution failed: {message}")]
    RemoteExecution { message: String, retryable: bool },

    /// Anything that should not happen
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl InvokeError {
    /// Create a NotFound error
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create an InvalidArguments error
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Create a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a non-retryable RemoteExecution error
    pub fn remote_execution(message: impl Into<String>) -> Self {
        Self::RemoteExecution {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a RemoteExecution error tagged retryable (e.g. upstream 503)
    pub fn remote_execution_retryable(message: impl Into<String>) -> Self {
        Self::RemoteExecution {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The kind of this error, for policy matching
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Timeout => ErrorKind::Timeout,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::RemoteExecution { .. } => ErrorKind::RemoteExecution,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the propagation policy allows this error to be retried at all,
    /// before the capability's own policy is consulted.
    ///
    /// Caller mistakes and policy decisions are final. Remote execution
    /// failures may only be retried when the server tagged them retryable.
    pub fn permits_retry(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::InvalidArguments { .. } | Self::RateLimited { .. } => {
                false
            }
            Self::Timeout | Self::Transport { .. } => true,
            Self::RemoteExecution { retryable, .. } => *retryable,
            Self::Internal { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(InvokeError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(InvokeError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            InvokeError::remote_execution("boom").kind(),
            ErrorKind::RemoteExecution
        );
    }

    #[test]
    fn test_caller_mistakes_never_permit_retry() {
        assert!(!InvokeError::not_found("x").permits_retry());
        assert!(!InvokeError::invalid_arguments("bad").permits_retry());
        assert!(
            !InvokeError::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .permits_retry()
        );
    }

    #[test]
    fn test_remote_execution_retry_gated_on_tag() {
        assert!(!InvokeError::remote_execution("file not found").permits_retry());
        assert!(InvokeError::remote_execution_retryable("upstream 503").permits_retry());
    }

    #[test]
    fn test_transport_and_timeout_permit_retry() {
        assert!(InvokeError::transport("connection reset").permits_retry());
        assert!(InvokeError::Timeout.permits_retry());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::RemoteExecution).unwrap();
        assert_eq!(json, "\"remote_execution\"");
    }
}

//! Transport layer
//!
//! Two kinds only: a local subprocess speaking newline-delimited JSON-RPC
//! over stdio, and a remote endpoint reached via a persistent SSE event
//! stream with HTTP POST as the companion send channel. Both deliver
//! incoming messages through a channel handed out once via
//! [`Transport::take_receiver`]; the channel closing signals session loss.
//! Everything above this module is transport-agnostic.

pub mod process;
pub mod stream;

pub use process::ProcessTransport;
pub use stream::{StreamTransport, StreamTransportConfig};

use super::error::WireError;
use super::wire::WireMessage;
use crate::config::{ServerConfig, TransportKind, resolve_env_map};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Message-level transport interface
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message
    async fn send(&mut self, message: WireMessage) -> Result<(), WireError>;

    /// Take the incoming-message stream. Yields messages until the session
    /// dies; the sender side is dropped on connection loss. May only be
    /// taken once.
    fn take_receiver(&mut self) -> Option<mpsc::Receiver<WireMessage>>;

    /// Close the session
    async fn close(&mut self) -> Result<(), WireError>;

    /// Whether the session is live
    fn is_connected(&self) -> bool;
}

/// Build and open a transport for a server config.
///
/// `${VAR}` placeholders in the configured environment and headers are
/// resolved here, once per session, not per invocation.
pub async fn open(config: &ServerConfig) -> Result<Box<dyn Transport>, WireError> {
    match config.transport {
        TransportKind::LocalProcess => {
            let command = config
                .command
                .as_deref()
                .ok_or_else(|| WireError::connection("local_process transport requires command"))?;
            let env = resolve_env_map(&config.env);
            let transport = ProcessTransport::spawn(command, &config.args, &env).await?;
            Ok(Box::new(transport))
        }
        TransportKind::RemoteStream => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| WireError::connection("remote_stream transport requires url"))?;
            let mut stream_config =
                StreamTransportConfig::new(url).with_headers(resolve_env_map(&config.headers));
            if let Some(timeout) = config.request_timeout {
                stream_config = stream_config.with_timeout(timeout);
            }
            let mut transport = StreamTransport::new(stream_config)?;
            transport.connect().await?;
            Ok(Box::new(transport))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_rejects_incomplete_configs() {
        let mut config = ServerConfig::local_process("srv", vec![]);
        config.command = None;
        assert!(open(&config).await.is_err());

        let mut config = ServerConfig::remote_stream("http://localhost:1");
        config.url = None;
        assert!(open(&config).await.is_err());
    }
}

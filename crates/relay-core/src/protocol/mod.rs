//! Protocol layer for external tool servers
//!
//! JSON-RPC framing, the transport abstraction (local subprocess and remote
//! event stream), and the per-server client that multiplexes requests over
//! one transport session.

pub mod client;
pub mod error;
pub mod transport;
pub mod types;
pub mod wire;

pub use client::ServerClient;
pub use error::WireError;
pub use transport::{ProcessTransport, StreamTransport, Transport};
pub use types::{CallResult, ServerInfo, ToolDescriptor, WireContent};
pub use wire::{WireMessage, WireNotification, WireRequest, WireResponse};

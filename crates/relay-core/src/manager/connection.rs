//! Server connection state
//!
//! One `Connection` per configured server, owned by the manager. The
//! supervisor task in `manager` drives the state machine:
//!
//! `Disconnected → Connecting → Connected ⇄ Degraded → ShuttingDown →
//! Disconnected`
//!
//! A connection holds at most one live client/transport session; the
//! supervisor fully tears a session down before establishing the next one.

use crate::config::ServerConfig;
use crate::protocol::ServerClient;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tracing::debug;

/// Lifecycle state of a server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// No live session
    Disconnected,
    /// Establishing transport and handshake
    Connecting,
    /// Healthy
    Connected,
    /// Recent probe failures, not yet torn down
    Degraded,
    /// Process shutdown in progress
    ShuttingDown,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::ShuttingDown => "shutting_down",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot of one connection for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Server id
    pub id: String,
    /// Current state
    pub state: ServerState,
    /// Capabilities currently registered from this server
    pub capability_count: usize,
    /// Consecutive probe failures
    pub consecutive_failures: u32,
    /// Time since the last health probe, if one has run
    pub last_probe_age: Option<std::time::Duration>,
}

/// State after a probe outcome. Pure so the escalation policy is testable:
/// one failure degrades, reaching the limit disconnects, a success heals.
pub(crate) fn next_state_after_probe(
    probe_ok: bool,
    consecutive_failures: u32,
    failure_limit: u32,
) -> ServerState {
    if probe_ok {
        ServerState::Connected
    } else if consecutive_failures >= failure_limit {
        ServerState::Disconnected
    } else {
        ServerState::Degraded
    }
}

/// One configured server connection
pub(crate) struct Connection {
    pub(crate) id: String,
    pub(crate) config: ServerConfig,
    state: RwLock<ServerState>,
    client: tokio::sync::RwLock<Option<Arc<ServerClient>>>,
    consecutive_failures: AtomicU32,
    last_probe_at: Mutex<Option<Instant>>,
}

impl Connection {
    pub(crate) fn new(id: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            id: id.into(),
            config,
            state: RwLock::new(ServerState::Disconnected),
            client: tokio::sync::RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            last_probe_at: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ServerState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, next: ServerState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(server = %self.id, from = %*state, to = %next, "connection state change");
            *state = next;
        }
    }

    pub(crate) async fn client(&self) -> Option<Arc<ServerClient>> {
        self.client.read().await.clone()
    }

    pub(crate) async fn install_client(&self, client: Arc<ServerClient>) {
        *self.client.write().await = Some(client);
    }

    pub(crate) async fn take_client(&self) -> Option<Arc<ServerClient>> {
        self.client.write().await.take()
    }

    /// Record a probe outcome and return the failure streak after it
    pub(crate) fn record_probe(&self, ok: bool) -> u32 {
        *self.last_probe_at.lock() = Some(Instant::now());
        if ok {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            0
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    pub(crate) fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub(crate) fn status(&self, capability_count: usize) -> ServerStatus {
        ServerStatus {
            id: self.id.clone(),
            state: self.state(),
            capability_count,
            consecutive_failures: self.failures(),
            last_probe_age: (*self.last_probe_at.lock()).map(|at| at.elapsed()),
        }
    }
}

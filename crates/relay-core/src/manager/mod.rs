//! Protocol client manager
//!
//! Owns every server connection described by configuration. Each connection
//! gets its own supervisor task: connect, discover capabilities into the
//! registry, probe on a fixed interval, degrade and eventually tear down on
//! repeated failures, then reconnect with jittered exponential backoff.
//! Nothing here is fatal to the process; a sick server only affects itself.

mod connection;

pub use connection::{ServerState, ServerStatus};

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::config::{CoreConfig, ServerConfig};
use crate::error::InvokeError;
use crate::protocol::transport;
use crate::protocol::{CallResult, ServerClient};
use crate::registry::{Capability, CapabilityOrigin, CapabilityRegistry, namespaced};
use connection::{Connection, next_state_after_probe};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables for connection supervision
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Interval between health probes
    pub probe_interval: Duration,
    /// Consecutive probe failures before teardown
    pub probe_failure_limit: u32,
    /// Reconnect backoff
    pub reconnect: BackoffConfig,
    /// Default per-request transport timeout
    pub request_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_failure_limit: 3,
            reconnect: BackoffConfig::default(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&CoreConfig> for ManagerSettings {
    fn from(config: &CoreConfig) -> Self {
        Self {
            probe_interval: config.probe_interval,
            probe_failure_limit: config.probe_failure_limit,
            reconnect: BackoffConfig::default()
                .with_initial_delay(config.reconnect_initial_delay)
                .with_max_delay(config.reconnect_max_delay),
            request_timeout: config.request_timeout,
        }
    }
}

/// Manager for all configured server connections
pub struct ClientManager {
    registry: Arc<CapabilityRegistry>,
    settings: ManagerSettings,
    connections: DashMap<String, Arc<Connection>>,
    shutdown: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ClientManager {
    /// Create a manager registering discoveries into `registry`
    pub fn new(registry: Arc<CapabilityRegistry>, settings: ManagerSettings) -> Self {
        Self {
            registry,
            settings,
            connections: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Start supervision for every enabled server in the config
    pub fn start(self: &Arc<Self>, config: &CoreConfig) {
        if !config.enabled {
            debug!("server connections disabled by config");
            return;
        }
        for (id, server) in config.enabled_servers() {
            self.add_server(id.clone(), server.clone());
        }
    }

    /// Add one server and spawn its supervisor task
    pub fn add_server(self: &Arc<Self>, id: String, config: ServerConfig) {
        if !config.enabled {
            debug!(server = %id, "skipping disabled server");
            return;
        }
        let connection = Arc::new(Connection::new(id.clone(), config));
        self.connections.insert(id, Arc::clone(&connection));

        let manager = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(async move {
            manager.supervise(connection, cancel).await;
        });
        self.tasks.lock().push(handle);
    }

    /// Invoke a remote tool on a connected server.
    ///
    /// Invocation tasks never touch a transport directly; this goes through
    /// the connection's client, whose receiver task owns the session.
    pub async fn invoke(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallResult, InvokeError> {
        let connection = self
            .connections
            .get(server_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| InvokeError::transport(format!("unknown server: {}", server_id)))?;

        let client = connection.client().await.ok_or_else(|| {
            InvokeError::transport(format!(
                "server {} is {}",
                server_id,
                connection.state()
            ))
        })?;

        client
            .invoke(tool_name, arguments)
            .await
            .map_err(InvokeError::from)
    }

    /// Status snapshot for every connection
    pub fn status(&self) -> Vec<ServerStatus> {
        let mut statuses: Vec<ServerStatus> = self
            .connections
            .iter()
            .map(|entry| {
                let origin = CapabilityOrigin::Remote(entry.key().clone());
                entry.value().status(self.registry.count_for(&origin))
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// State of one server, if configured
    pub fn server_state(&self, server_id: &str) -> Option<ServerState> {
        self.connections.get(server_id).map(|c| c.state())
    }

    /// Cancel all supervision and wait (bounded by `grace`) for the tasks
    /// to tear their sessions down.
    pub async fn shutdown(&self, grace: Duration) {
        info!("shutting down server connections");
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("grace period expired with connection tasks still running");
        }
    }

    /// Supervisor loop for one connection: runs until shutdown
    async fn supervise(&self, connection: Arc<Connection>, cancel: CancellationToken) {
        let mut backoff = ExponentialBackoff::new(self.settings.reconnect.clone());

        loop {
            if cancel.is_cancelled() {
                break;
            }

            connection.set_state(ServerState::Connecting);
            match self.establish(&connection).await {
                Ok(capability_count) => {
                    connection.reset_failures();
                    connection.set_state(ServerState::Connected);
                    backoff.reset();
                    info!(
                        server = %connection.id,
                        capabilities = capability_count,
                        "server connected"
                    );

                    let torn_down = self.probe_loop(&connection, &cancel).await;
                    if !torn_down {
                        // cancelled during probing
                        connection.set_state(ServerState::ShuttingDown);
                    }
                    self.teardown(&connection).await;
                    connection.set_state(ServerState::Disconnected);

                    if !torn_down {
                        break;
                    }
                }
                Err(e) => {
                    warn!(server = %connection.id, error = %e, "connection attempt failed");
                    connection.set_state(ServerState::Disconnected);
                }
            }

            let delay = backoff.next_delay();
            debug!(
                server = %connection.id,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // shutdown path: close whatever session is still up
        if connection.client().await.is_some() {
            connection.set_state(ServerState::ShuttingDown);
            self.teardown(&connection).await;
        }
        connection.set_state(ServerState::Disconnected);
    }

    /// Open the transport, run the handshake, and register discovered
    /// capabilities wholesale under this server's origin.
    async fn establish(&self, connection: &Arc<Connection>) -> Result<usize, InvokeError> {
        let transport = transport::open(&connection.config)
            .await
            .map_err(InvokeError::from)?;
        let request_timeout = connection
            .config
            .request_timeout
            .unwrap_or(self.settings.request_timeout);
        let client = Arc::new(ServerClient::with_timeout(transport, request_timeout));

        let server_info = client.initialize().await.map_err(InvokeError::from)?;
        debug!(
            server = %connection.id,
            name = %server_info.name,
            version = %server_info.version,
            "handshake complete"
        );

        let descriptors = client.list_capabilities().await.map_err(InvokeError::from)?;
        let capabilities: Vec<Capability> = descriptors
            .into_iter()
            .map(|d| {
                let mut cap = Capability::new(
                    namespaced(&connection.id, &d.name),
                    CapabilityOrigin::Remote(connection.id.clone()),
                )
                .with_input_schema(d.input_schema);
                cap.description = d.description;
                cap
            })
            .collect();
        let count = capabilities.len();

        self.registry
            .replace_origin(CapabilityOrigin::Remote(connection.id.clone()), capabilities);
        connection.install_client(client).await;
        Ok(count)
    }

    /// Probe until the failure limit is hit (returns true) or shutdown is
    /// requested (returns false).
    async fn probe_loop(&self, connection: &Arc<Connection>, cancel: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.settings.probe_interval) => {}
            }

            let probe_ok = match connection.client().await {
                Some(client) => client.ping().await.is_ok(),
                None => false,
            };
            let failures = connection.record_probe(probe_ok);

            match next_state_after_probe(probe_ok, failures, self.settings.probe_failure_limit) {
                ServerState::Connected => {
                    if connection.state() == ServerState::Degraded {
                        info!(server = %connection.id, "probe recovered");
                    }
                    connection.set_state(ServerState::Connected);
                }
                ServerState::Degraded => {
                    warn!(server = %connection.id, failures, "probe failed");
                    connection.set_state(ServerState::Degraded);
                }
                _ => {
                    warn!(
                        server = %connection.id,
                        failures,
                        "probe failure limit reached, tearing down"
                    );
                    return true;
                }
            }
        }
    }

    /// Close the session and drop this server's capabilities
    async fn teardown(&self, connection: &Arc<Connection>) {
        if let Some(client) = connection.take_client().await {
            if let Err(e) = client.close().await {
                debug!(server = %connection.id, error = %e, "error closing client");
            }
        }
        self.registry
            .unregister_all_from(&CapabilityOrigin::Remote(connection.id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<ClientManager> {
        Arc::new(ClientManager::new(
            Arc::new(CapabilityRegistry::new()),
            ManagerSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_invoke_unknown_server() {
        let manager = manager();
        let result = manager
            .invoke("nope", "tool", serde_json::json!({}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_disabled_server_not_supervised() {
        let manager = manager();
        manager.add_server(
            "off".to_string(),
            ServerConfig::local_process("srv", vec![]).disabled(),
        );
        assert!(manager.status().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_while_disconnected_is_transport_failure() {
        let manager = manager();
        // unreachable command: supervisor will fail to connect and back off
        manager.add_server(
            "flaky".to_string(),
            ServerConfig::local_process("relay-test-no-such-binary", vec![]),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = manager.invoke("flaky", "tool", serde_json::json!({})).await;
        match result {
            Err(e) => assert_eq!(e.kind(), crate::error::ErrorKind::Transport),
            Ok(_) => panic!("expected failure against disconnected server"),
        }

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_status_lists_configured_servers() {
        let manager = manager();
        manager.add_server(
            "a".to_string(),
            ServerConfig::local_process("relay-test-no-such-binary", vec![]),
        );
        manager.add_server(
            "b".to_string(),
            ServerConfig::local_process("relay-test-no-such-binary", vec![]),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        let status = manager.status();
        let ids: Vec<&str> = status.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_settings_from_config() {
        let mut config = CoreConfig::default();
        config.probe_interval = Duration::from_secs(7);
        config.probe_failure_limit = 5;

        let settings = ManagerSettings::from(&config);
        assert_eq!(settings.probe_interval, Duration::from_secs(7));
        assert_eq!(settings.probe_failure_limit, 5);
    }
}

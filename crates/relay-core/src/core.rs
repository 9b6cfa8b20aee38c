//! Assembled invocation core
//!
//! Convenience composition root: builds the registry, client manager, rate
//! limiter, and retry engine from configuration, wires the adapter over
//! them, and owns the shutdown sequence. Components stay explicitly owned
//! and injectable; tests that want isolation construct them directly.

use crate::adapter::ToolAdapter;
use crate::config::CoreConfig;
use crate::limiter::{LimiterConfig, RateLimiter};
use crate::manager::{ClientManager, ManagerSettings};
use crate::registry::CapabilityRegistry;
use crate::retry::RetryEngine;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Interval for the rate-bucket idle sweep
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The fully-wired tool-invocation core
pub struct Core {
    registry: Arc<CapabilityRegistry>,
    manager: Arc<ClientManager>,
    limiter: Arc<RateLimiter>,
    retries: Arc<RetryEngine>,
    adapter: Arc<ToolAdapter>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    /// Build everything from configuration and start background work:
    /// one supervisor task per enabled server plus the limiter sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &CoreConfig, limiter_config: LimiterConfig) -> Self {
        let registry = Arc::new(CapabilityRegistry::new());
        let manager = Arc::new(ClientManager::new(
            Arc::clone(&registry),
            ManagerSettings::from(config),
        ));
        manager.start(config);

        let limiter = Arc::new(RateLimiter::new(limiter_config));
        let shutdown = CancellationToken::new();
        let sweeper = limiter.spawn_sweeper(SWEEP_INTERVAL, shutdown.child_token());

        let retries = Arc::new(RetryEngine::new());
        let adapter = Arc::new(
            ToolAdapter::new(
                Arc::clone(&registry),
                Arc::clone(&manager),
                Arc::clone(&limiter),
                Arc::clone(&retries),
            )
            .with_default_deadline(config.invocation_deadline),
        );

        info!(servers = config.servers.len(), "invocation core started");
        Self {
            registry,
            manager,
            limiter,
            retries,
            adapter,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// The dispatch façade the agent loop talks to
    pub fn adapter(&self) -> Arc<ToolAdapter> {
        Arc::clone(&self.adapter)
    }

    /// The capability registry
    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        Arc::clone(&self.registry)
    }

    /// The retry policy table
    pub fn retries(&self) -> Arc<RetryEngine> {
        Arc::clone(&self.retries)
    }

    /// The rate limiter
    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Stop background work and close every server session, waiting up to
    /// `grace` for connection tasks to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.manager.shutdown(grace).await;
        info!("invocation core stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn test_start_and_shutdown_with_no_servers() {
        let core = Core::start(&CoreConfig::default(), LimiterConfig::default());
        assert!(core.adapter().list_capabilities().is_empty());
        core.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_disabled_config_connects_nothing() {
        let mut config = CoreConfig::default();
        config.enabled = false;
        config.servers.insert(
            "search".to_string(),
            ServerConfig::local_process("search-server", vec![]),
        );

        let core = Core::start(&config, LimiterConfig::default());
        assert!(core.adapter().status().servers.is_empty());
        core.shutdown(Duration::from_secs(1)).await;
    }
}

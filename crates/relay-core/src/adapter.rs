//! Tool adapter — the single entry point for invocations
//!
//! The agent loop calls [`ToolAdapter::invoke`] and nothing else. The
//! adapter resolves the capability, validates arguments, consults the rate
//! limiter, runs the attempt through the retry engine, and normalizes
//! whatever the backend produced into the ordered content-block envelope.

use crate::error::InvokeError;
use crate::invocation::{ContentBlock, InvocationResult};
use crate::limiter::{Admission, LimiterSummary, RateLimiter};
use crate::manager::{ClientManager, ServerStatus};
use crate::protocol::WireContent;
use crate::registry::{Capability, CapabilityOrigin, CapabilityRegistry};
use crate::retry::RetryEngine;
use crate::schema::validate_args;
use crate::tool::LocalTool;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Capability class used for rate limiting local tools
const LOCAL_CLASS: &str = "local";

/// One capability as advertised to the agent loop
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySummary {
    /// Capability name
    pub name: String,
    /// Description, if any
    pub description: Option<String>,
    /// Input schema
    pub input_schema: Value,
}

/// Operational snapshot for inspection commands
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    /// Per-server connection state and capability counts
    pub servers: Vec<ServerStatus>,
    /// Rate limiter summary
    pub rate_limiter: LimiterSummary,
}

/// Dispatch façade over registry, limiter, retry engine, and connections
pub struct ToolAdapter {
    registry: Arc<CapabilityRegistry>,
    manager: Arc<ClientManager>,
    limiter: Arc<RateLimiter>,
    retries: Arc<RetryEngine>,
    local_tools: DashMap<String, Arc<dyn LocalTool>>,
    default_deadline: Duration,
}

impl ToolAdapter {
    /// Create an adapter over explicitly-owned components.
    ///
    /// Nothing here is a process-wide singleton; tests build isolated
    /// instances.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        manager: Arc<ClientManager>,
        limiter: Arc<RateLimiter>,
        retries: Arc<RetryEngine>,
    ) -> Self {
        Self {
            registry,
            manager,
            limiter,
            retries,
            local_tools: DashMap::new(),
            default_deadline: Duration::from_secs(120),
        }
    }

    /// Set the default invocation deadline
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Register a local tool as an enabled capability
    pub fn register_local_tool(&self, tool: Arc<dyn LocalTool>) {
        self.register_local_tool_tagged(tool, &[]);
    }

    /// Register a local tool with security tags
    pub fn register_local_tool_tagged(&self, tool: Arc<dyn LocalTool>, tags: &[&str]) {
        let mut capability = Capability::new(tool.name(), CapabilityOrigin::Local)
            .with_description(tool.description())
            .with_input_schema(tool.input_schema());
        for tag in tags {
            capability = capability.with_security_tag(*tag);
        }
        self.registry.register(capability);
        self.local_tools.insert(tool.name().to_string(), tool);
    }

    /// Enabled capabilities for advertising to the LLM
    pub fn list_capabilities(&self) -> Vec<CapabilitySummary> {
        self.registry
            .list()
            .into_iter()
            .map(|c| CapabilitySummary {
                name: c.name.clone(),
                description: c.description.clone(),
                input_schema: c.input_schema.clone(),
            })
            .collect()
    }

    /// Operational status
    pub fn status(&self) -> CoreStatus {
        CoreStatus {
            servers: self.manager.status(),
            rate_limiter: self.limiter.summary(),
        }
    }

    /// The sole execution path.
    ///
    /// All failures come back as a structured result; nothing is raised
    /// across this boundary.
    #[instrument(skip(self, args), fields(capability = %name, caller = %caller_id))]
    pub async fn invoke(&self, name: &str, args: Value, caller_id: &str) -> InvocationResult {
        let deadline = Instant::now() + self.default_deadline;

        let capability = match self.registry.lookup(name) {
            Some(c) if c.enabled => c,
            _ => return InvocationResult::failure(InvokeError::not_found(name), 0),
        };

        // Validation failures never reach the retry engine
        if let Err(message) = validate_args(&capability.input_schema, &args) {
            return InvocationResult::failure(InvokeError::invalid_arguments(message), 0);
        }

        let class = match &capability.origin {
            CapabilityOrigin::Local => LOCAL_CLASS.to_string(),
            CapabilityOrigin::Remote(server_id) => server_id.clone(),
        };
        if let Admission::Denied { retry_after } = self.limiter.try_admit(caller_id, &class) {
            return InvocationResult::failure(InvokeError::RateLimited { retry_after }, 0);
        }

        debug!("dispatching invocation");
        match &capability.origin {
            CapabilityOrigin::Local => self.invoke_local(name, args, deadline).await,
            CapabilityOrigin::Remote(server_id) => {
                self.invoke_remote(&capability, server_id, args, deadline).await
            }
        }
    }

    async fn invoke_local(
        &self,
        name: &str,
        args: Value,
        deadline: Instant,
    ) -> InvocationResult {
        let Some(tool) = self.local_tools.get(name).map(|t| Arc::clone(t.value())) else {
            return InvocationResult::failure(
                InvokeError::internal(format!("no implementation for local capability {}", name)),
                0,
            );
        };

        self.retries
            .execute(name, deadline, move || {
                let tool = Arc::clone(&tool);
                let args = args.clone();
                async move { tool.call(args).await }
            })
            .await
    }

    async fn invoke_remote(
        &self,
        capability: &Capability,
        server_id: &str,
        args: Value,
        deadline: Instant,
    ) -> InvocationResult {
        // strip the `<serverId>:` namespace for the wire call
        let remote_name = capability
            .name
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(&capability.name)
            .to_string();
        let manager = Arc::clone(&self.manager);
        let server_id = server_id.to_string();

        self.retries
            .execute(&capability.name, deadline, move || {
                let manager = Arc::clone(&manager);
                let server_id = server_id.clone();
                let remote_name = remote_name.clone();
                let args = args.clone();
                async move {
                    let result = manager.invoke(&server_id, &remote_name, args).await?;
                    if result.is_error {
                        return Err(InvokeError::remote_execution(result.text()));
                    }
                    Ok(normalize_content(result.content))
                }
            })
            .await
    }
}

/// Normalize wire content into the core's content blocks.
///
/// Classification is structural — by the declared content type only. Order
/// is preserved; nothing is re-derived by scanning text.
pub fn normalize_content(content: Vec<WireContent>) -> Vec<ContentBlock> {
    content
        .into_iter()
        .map(|item| match item {
            WireContent::Text { text } => ContentBlock::Text { text },
            WireContent::Image { data, mime_type } => ContentBlock::Binary {
                reference: data,
                media_type: Some(mime_type),
            },
            WireContent::Resource { resource } => ContentBlock::Structured {
                data: serde_json::to_value(resource).unwrap_or(Value::Null),
            },
        })
        .collect()
}

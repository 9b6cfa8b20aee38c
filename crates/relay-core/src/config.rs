//! Core configuration
//!
//! The core consumes a declarative list of external servers plus a handful
//! of tunables for probing, reconnection, and invocation deadlines. Config
//! files are JSON or TOML; `${VAR}` placeholders in server environments and
//! headers are resolved from the process environment once, at connection
//! construction time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

fn default_true() -> bool {
    true
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_failure_limit() -> u32 {
    3
}

fn default_reconnect_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_reconnect_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_invocation_deadline() -> Duration {
    Duration::from_secs(120)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Transport kind for reaching an external server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Subprocess speaking newline-delimited JSON-RPC over stdio
    LocalProcess,
    /// Persistent HTTP event stream with a POST companion channel
    RemoteStream,
}

/// Configuration for a single external server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport kind
    pub transport: TransportKind,
    /// Command to execute (local process transport)
    pub command: Option<String>,
    /// Command arguments (local process transport)
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables, values may contain `${VAR}` placeholders
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL (remote stream transport)
    pub url: Option<String>,
    /// HTTP headers, values may contain `${VAR}` placeholders
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Disabled servers are never connected
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-server request timeout (overrides the default)
    #[serde(default, with = "humantime_serde::option")]
    pub request_timeout: Option<Duration>,
}

impl ServerConfig {
    /// Create a local-process server config
    pub fn local_process(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: TransportKind::LocalProcess,
            command: Some(command.into()),
            args,
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            enabled: true,
            request_timeout: None,
        }
    }

    /// Create a remote-stream server config
    pub fn remote_stream(url: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::RemoteStream,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.into()),
            headers: HashMap::new(),
            enabled: true,
            request_timeout: None,
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add an HTTP header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Mark disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Top-level core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Master switch; when false no servers are connected
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// External servers by id
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
    /// Interval between health probes per connection
    #[serde(default = "default_probe_interval", with = "humantime_serde")]
    pub probe_interval: Duration,
    /// Consecutive probe failures before a connection is torn down
    #[serde(default = "default_probe_failure_limit")]
    pub probe_failure_limit: u32,
    /// Initial reconnect backoff delay
    #[serde(default = "default_reconnect_initial_delay", with = "humantime_serde")]
    pub reconnect_initial_delay: Duration,
    /// Reconnect backoff cap
    #[serde(default = "default_reconnect_max_delay", with = "humantime_serde")]
    pub reconnect_max_delay: Duration,
    /// Default deadline for a whole invocation (all attempts and sleeps)
    #[serde(default = "default_invocation_deadline", with = "humantime_serde")]
    pub invocation_deadline: Duration,
    /// Default per-request transport timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            servers: HashMap::new(),
            probe_interval: default_probe_interval(),
            probe_failure_limit: default_probe_failure_limit(),
            reconnect_initial_delay: default_reconnect_initial_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
            invocation_deadline: default_invocation_deadline(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl CoreConfig {
    /// Iterate servers that should be connected
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.servers.iter().filter(|(_, s)| s.enabled)
    }

    /// Request timeout for a server, falling back to the default
    pub fn request_timeout_for(&self, server_id: &str) -> Duration {
        self.servers
            .get(server_id)
            .and_then(|s| s.request_timeout)
            .unwrap_or(self.request_timeout)
    }

    /// Parse from a JSON string
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        serde_json::from_str(input).map_err(|e| format!("invalid JSON config: {}", e))
    }

    /// Parse from a TOML string
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        toml::from_str(input).map_err(|e| format!("invalid TOML config: {}", e))
    }

    /// Load from a file, dispatching on extension (`.json` or `.toml`)
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            Some("toml") => Self::from_toml_str(&raw),
            other => Err(format!("unsupported config extension: {:?}", other)),
        }
    }
}

/// Resolve `${VAR}` placeholders in a string map from the process
/// environment.
///
/// Unresolvable placeholders keep their literal value; connecting with a
/// literal `${TOKEN}` fails loudly at the server instead of silently
/// dropping the entry.
pub fn resolve_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(key, value)| {
            let resolved = match shellexpand::env(value) {
                Ok(expanded) => expanded.into_owned(),
                Err(e) => {
                    warn!(key = %key, error = %e, "unresolved placeholder in config value");
                    value.clone()
                }
            };
            (key.clone(), resolved)
        })
        .collect()
}

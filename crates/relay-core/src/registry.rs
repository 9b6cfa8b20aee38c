//! Capability registry
//!
//! In-memory mapping of capability name to metadata, shared by the adapter
//! (lookups) and the client manager (per-server registration). Capabilities
//! are grouped by origin and each origin's set is swapped wholesale, so a
//! reader never observes a half-applied discovery pass.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Where a capability comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityOrigin {
    /// Registered in-process at startup
    Local,
    /// Discovered from the named external server
    Remote(String),
}

impl std::fmt::Display for CapabilityOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote(id) => write!(f, "remote:{}", id),
        }
    }
}

/// One invocable unit, local or remotely discovered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Unique name; remote capabilities are namespaced `<serverId>:<tool>`
    pub name: String,
    /// Human-readable description, advertised to the LLM
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema for accepted arguments
    #[serde(default)]
    pub input_schema: Value,
    /// Origin of the capability
    pub origin: CapabilityOrigin,
    /// Disabled capabilities are excluded from discovery and invocation
    pub enabled: bool,
    /// Labels consumed by an external policy layer
    #[serde(default)]
    pub security_tags: BTreeSet<String>,
}

impl Capability {
    /// Create an enabled capability with an empty schema
    pub fn new(name: impl Into<String>, origin: CapabilityOrigin) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: Value::Object(serde_json::Map::new()),
            origin,
            enabled: true,
            security_tags: BTreeSet::new(),
        }
    }

    /// Set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set input schema
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Add a security tag
    pub fn with_security_tag(mut self, tag: impl Into<String>) -> Self {
        self.security_tags.insert(tag.into());
        self
    }

    /// Mark disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Build the namespaced name for a remotely-discovered capability
pub fn namespaced(server_id: &str, tool_name: &str) -> String {
    format!("{}:{}", server_id, tool_name)
}

/// Registry of every invocable capability
///
/// Capabilities are stored per origin behind an `Arc`'d map; registration
/// clones and swaps the owning origin's map, which keeps reads lock-free at
/// the capability level and makes rediscovery atomic.
pub struct CapabilityRegistry {
    by_origin: DashMap<CapabilityOrigin, Arc<HashMap<String, Arc<Capability>>>>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            by_origin: DashMap::new(),
        }
    }

    /// Register one capability; an existing name under the same origin is
    /// overwritten.
    pub fn register(&self, capability: Capability) {
        let origin = capability.origin.clone();
        let name = capability.name.clone();
        let mut entry = self
            .by_origin
            .entry(origin)
            .or_insert_with(|| Arc::new(HashMap::new()));
        let mut updated: HashMap<String, Arc<Capability>> = entry.value().as_ref().clone();
        updated.insert(name, Arc::new(capability));
        *entry.value_mut() = Arc::new(updated);
    }

    /// Replace everything an origin offers in one step.
    ///
    /// Used by the client manager after each discovery pass: the previous
    /// set is dropped wholesale rather than patched, so stale entries cannot
    /// survive a reconnect.
    pub fn replace_origin(&self, origin: CapabilityOrigin, capabilities: Vec<Capability>) {
        let map: HashMap<String, Arc<Capability>> = capabilities
            .into_iter()
            .map(|c| (c.name.clone(), Arc::new(c)))
            .collect();
        debug!(origin = %origin, count = map.len(), "replacing origin capabilities");
        self.by_origin.insert(origin, Arc::new(map));
    }

    /// Remove every capability contributed by an origin.
    ///
    /// Called by the client manager whenever a server disconnects.
    pub fn unregister_all_from(&self, origin: &CapabilityOrigin) {
        if let Some((_, removed)) = self.by_origin.remove(origin) {
            debug!(origin = %origin, count = removed.len(), "unregistered origin capabilities");
        }
    }

    /// Look up a capability by name.
    ///
    /// Remote names carry their origin as a `server:` prefix, so the common
    /// case is a single map probe; local names and anything unusual fall
    /// back to scanning the (few) origins.
    pub fn lookup(&self, name: &str) -> Option<Arc<Capability>> {
        if let Some((server_id, _)) = name.split_once(':') {
            let origin = CapabilityOrigin::Remote(server_id.to_string());
            if let Some(map) = self.by_origin.get(&origin) {
                if let Some(cap) = map.get(name) {
                    return Some(Arc::clone(cap));
                }
            }
        }
        if let Some(map) = self.by_origin.get(&CapabilityOrigin::Local) {
            if let Some(cap) = map.get(name) {
                return Some(Arc::clone(cap));
            }
        }
        self.by_origin
            .iter()
            .find_map(|entry| entry.value().get(name).map(Arc::clone))
    }

    /// List enabled capabilities across all origins, sorted by name
    pub fn list(&self) -> Vec<Arc<Capability>> {
        let mut all: Vec<Arc<Capability>> = self
            .by_origin
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|c| c.enabled)
                    .map(Arc::clone)
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// List enabled capabilities contributed by one origin
    pub fn list_from(&self, origin: &CapabilityOrigin) -> Vec<Arc<Capability>> {
        let mut caps: Vec<Arc<Capability>> = self
            .by_origin
            .get(origin)
            .map(|map| {
                map.values()
                    .filter(|c| c.enabled)
                    .map(Arc::clone)
                    .collect()
            })
            .unwrap_or_default();
        caps.sort_by(|a, b| a.name.cmp(&b.name));
        caps
    }

    /// Number of capabilities (enabled or not) contributed by an origin
    pub fn count_for(&self, origin: &CapabilityOrigin) -> usize {
        self.by_origin
            .get(origin)
            .map(|map| map.len())
            .unwrap_or(0)
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(server: &str, tool: &str) -> Capability {
        Capability::new(
            namespaced(server, tool),
            CapabilityOrigin::Remote(server.to_string()),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = CapabilityRegistry::new();
        registry.register(Capability::new("echo", CapabilityOrigin::Local));

        let cap = registry.lookup("echo").unwrap();
        assert_eq!(cap.name, "echo");
        assert_eq!(cap.origin, CapabilityOrigin::Local);
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_register_overwrites_existing_name() {
        let registry = CapabilityRegistry::new();
        registry.register(Capability::new("echo", CapabilityOrigin::Local));
        registry.register(
            Capability::new("echo", CapabilityOrigin::Local).with_description("round two"),
        );

        let cap = registry.lookup("echo").unwrap();
        assert_eq!(cap.description.as_deref(), Some("round two"));
        assert_eq!(registry.count_for(&CapabilityOrigin::Local), 1);
    }

    #[test]
    fn test_namespaced_lookup_probes_owning_origin() {
        let registry = CapabilityRegistry::new();
        registry.register(remote("search", "web_search"));

        let cap = registry.lookup("search:web_search").unwrap();
        assert_eq!(
            cap.origin,
            CapabilityOrigin::Remote("search".to_string())
        );
    }

    #[test]
    fn test_disabled_excluded_from_list_but_not_lookup() {
        let registry = CapabilityRegistry::new();
        registry.register(Capability::new("on", CapabilityOrigin::Local));
        registry.register(Capability::new("off", CapabilityOrigin::Local).disabled());

        let names: Vec<String> = registry.list().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["on"]);
        // lookup still resolves it so the adapter can report disabled-vs-missing
        assert!(registry.lookup("off").is_some());
    }

    #[test]
    fn test_unregister_all_from_removes_only_that_origin() {
        let registry = CapabilityRegistry::new();
        registry.register(Capability::new("local_echo", CapabilityOrigin::Local));
        registry.register(remote("search", "web_search"));
        registry.register(remote("search", "news_search"));

        registry.unregister_all_from(&CapabilityOrigin::Remote("search".to_string()));

        assert!(registry.lookup("search:web_search").is_none());
        assert!(registry.lookup("search:news_search").is_none());
        assert!(registry.lookup("local_echo").is_some());
    }

    #[test]
    fn test_replace_origin_restores_same_names_after_reconnect() {
        let registry = CapabilityRegistry::new();
        let discovered = || vec![remote("search", "web_search"), remote("search", "news_search")];
        let origin = CapabilityOrigin::Remote("search".to_string());

        registry.replace_origin(origin.clone(), discovered());
        let before: Vec<String> = registry.list().iter().map(|c| c.name.clone()).collect();

        registry.unregister_all_from(&origin);
        assert!(registry.list().is_empty());

        registry.replace_origin(origin, discovered());
        let after: Vec<String> = registry.list().iter().map(|c| c.name.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_list_from_scopes_to_origin() {
        let registry = CapabilityRegistry::new();
        registry.register(Capability::new("local_echo", CapabilityOrigin::Local));
        registry.register(remote("search", "web_search"));

        let origin = CapabilityOrigin::Remote("search".to_string());
        let names: Vec<String> = registry
            .list_from(&origin)
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["search:web_search"]);
        assert!(
            registry
                .list_from(&CapabilityOrigin::Remote("other".to_string()))
                .is_empty()
        );
    }

    #[test]
    fn test_replace_origin_drops_stale_entries() {
        let registry = CapabilityRegistry::new();
        let origin = CapabilityOrigin::Remote("srv".to_string());
        registry.replace_origin(origin.clone(), vec![remote("srv", "old_tool")]);
        registry.replace_origin(origin, vec![remote("srv", "new_tool")]);

        assert!(registry.lookup("srv:old_tool").is_none());
        assert!(registry.lookup("srv:new_tool").is_some());
    }
}

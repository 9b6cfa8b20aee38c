//! Wire-side payload types
//!
//! Descriptors and result shapes exchanged with tool servers. These mirror
//! what servers actually send; the core's normalized [`ContentBlock`]
//! representation lives in `crate::invocation` and is produced from these
//! at the adapter boundary.
//!
//! [`ContentBlock`]: crate::invocation::ContentBlock

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Server identity returned by the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

/// Client identity sent during the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "relay-core".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Handshake request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    /// Protocol version the client speaks
    pub protocol_version: String,
    /// Client capabilities (opaque to the server here)
    #[serde(default)]
    pub capabilities: HashMap<String, Value>,
    /// Client info
    pub client_info: ClientInfo,
}

/// Handshake response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResult {
    /// Protocol version the server speaks
    pub protocol_version: String,
    /// Server info
    pub server_info: ServerInfo,
}

/// One remotely-offered tool, as discovered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name (unqualified; the manager namespaces it)
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: Option<String>,
    /// Input schema (JSON Schema)
    #[serde(default)]
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Create a descriptor with an empty schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: Value::Object(serde_json::Map::new()),
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
}

/// Content kinds a server may return, tagged by declared type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireContent {
    /// Text content
    #[serde(rename = "text")]
    Text { text: String },
    /// Binary/media content with a declared media type
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Structured resource payload
    #[serde(rename = "resource")]
    Resource { resource: ResourceRef },
}

impl WireContent {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create image content
    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Reference to a server-side resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource URI
    pub uri: String,
    /// Inline text content, if any
    #[serde(default)]
    pub text: Option<String>,
    /// Inline blob content (base64), if any
    #[serde(default)]
    pub blob: Option<String>,
}

/// Result of a remote invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    /// Ordered content
    pub content: Vec<WireContent>,
    /// Whether the server reports the execution as failed
    #[serde(default)]
    pub is_error: bool,
}

impl CallResult {
    /// Concatenated text of all text content, used for error messages
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                WireContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

//! JSON-RPC wire format
//!
//! Both transports exchange the same JSON-RPC 2.0 messages; only the
//! framing differs (newline-delimited lines vs. HTTP bodies and SSE
//! events).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision sent during the handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version
pub const JSONRPC_VERSION: &str = "2.0";

/// Any message that can cross a transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    /// Request expecting a response
    Request(WireRequest),
    /// Response to a prior request
    Response(WireResponse),
    /// One-way notification (no id)
    Notification(WireNotification),
}

impl WireMessage {
    /// Check if this is a response
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Check if this is a request
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

/// Request ID (string or number per JSON-RPC)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String ID
    String(String),
    /// Number ID
    Number(i64),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Request ID
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl WireRequest {
    /// Create a new request
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Attach parameters
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// ID of the request this answers
    pub id: RequestId,
    /// Result (success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFault>,
}

impl WireResponse {
    /// Create a success response
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn fault(id: impl Into<RequestId>, fault: RpcFault) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(fault),
        }
    }

    /// Unpack into the result value or the fault
    pub fn into_result(self) -> Result<Value, RpcFault> {
        match self.error {
            Some(fault) => Err(fault),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFault {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcFault {
    /// Create a new fault
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for RpcFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcFault {}

/// JSON-RPC notification (no id, no response)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNotification {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl WireNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
        }
    }
}

/// Method names understood by tool servers
pub mod methods {
    /// Handshake
    pub const INITIALIZE: &str = "initialize";
    /// Handshake acknowledgement notification
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Capability discovery
    pub const TOOLS_LIST: &str = "tools/list";
    /// Capability invocation
    pub const TOOLS_CALL: &str = "tools/call";
    /// Liveness probe
    pub const PING: &str = "ping";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = WireRequest::new(7i64, methods::TOOLS_LIST);
        let json = serde_json::to_string(&req).unwrap();

        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(json.contains("\"id\":7"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_response_unpacking() {
        let ok = WireResponse::success(1i64, serde_json::json!({"pong": true}));
        assert_eq!(ok.into_result().unwrap()["pong"], true);

        let bad = WireResponse::fault(1i64, RpcFault::new(-32601, "Method not found"));
        let fault = bad.into_result().unwrap_err();
        assert_eq!(fault.code, -32601);
    }

    #[test]
    fn test_untagged_message_parsing() {
        let req: WireMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(req.is_request());

        let res: WireMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#).unwrap();
        assert!(res.is_response());

        let notif: WireMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(matches!(notif, WireMessage::Notification(_)));
    }

    #[test]
    fn test_notification_has_no_id() {
        let notif = WireNotification::new(methods::INITIALIZED);
        let json = serde_json::to_string(&notif).unwrap();
        assert!(!json.contains("\"id\""));
    }
}

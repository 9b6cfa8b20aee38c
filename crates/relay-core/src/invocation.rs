//! Normalized invocation result envelope
//!
//! Every invocation, local or remote, resolves to an [`InvocationResult`]:
//! an ordered sequence of typed content blocks plus the outcome metadata the
//! agent loop needs. Heterogeneous server payloads are normalized into this
//! shape once, at the adapter boundary.

use crate::error::{ErrorKind, InvokeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One typed unit of an invocation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    /// Plain text
    #[serde(rename = "text")]
    Text { text: String },
    /// Reference to binary/media content (opaque handle plus media type)
    #[serde(rename = "binary")]
    Binary {
        reference: String,
        #[serde(default)]
        media_type: Option<String>,
    },
    /// Structured resource payload
    #[serde(rename = "structured")]
    Structured { data: Value },
}

impl ContentBlock {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a binary reference block
    pub fn binary(reference: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self::Binary {
            reference: reference.into(),
            media_type: Some(media_type.into()),
        }
    }

    /// Create a structured block
    pub fn structured(data: Value) -> Self {
        Self::Structured { data }
    }
}

/// Outcome of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    /// The capability ran and produced content
    Success,
    /// The invocation failed; `error` carries the kind
    Failure,
}

/// Normalized result handed back to the agent loop
///
/// Failures are always materialized here, never raised across the adapter
/// boundary. `attempts` counts the attempts actually made, which is zero for
/// failures rejected before dispatch (unknown capability, bad arguments,
/// rate-limit denial).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Success or failure
    pub status: InvocationStatus,
    /// Ordered content blocks (empty on failure unless a fallback supplied them)
    pub content: Vec<ContentBlock>,
    /// Present iff status is Failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
    /// Attempts actually made
    pub attempts: u32,
}

impl InvocationResult {
    /// Create a success result
    pub fn success(content: Vec<ContentBlock>, attempts: u32) -> Self {
        Self {
            status: InvocationStatus::Success,
            content,
            error: None,
            attempts,
        }
    }

    /// Create a failure result
    pub fn failure(error: InvokeError, attempts: u32) -> Self {
        Self {
            status: InvocationStatus::Failure,
            content: Vec::new(),
            error: Some(error),
            attempts,
        }
    }

    /// Check if the invocation succeeded
    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Success
    }

    /// The error kind, if this is a failure
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind())
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_block_serialization() {
        let block = ContentBlock::text("hello");
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"text\""));

        let block = ContentBlock::binary("att://42", "image/png");
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"binary\""));
        assert!(json.contains("image/png"));
    }

    #[test]
    fn test_success_result() {
        let result = InvocationResult::success(vec![ContentBlock::text("ok")], 1);
        assert!(result.is_success());
        assert!(result.error.is_none());
        assert_eq!(result.error_kind(), None);
        assert_eq!(result.text(), "ok");
    }

    #[test]
    fn test_failure_result() {
        let result = InvocationResult::failure(InvokeError::not_found("missing"), 0);
        assert!(!result.is_success());
        assert_eq!(result.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(result.attempts, 0);
        assert!(result.content.is_empty());
    }

    #[test]
    fn test_text_skips_non_text_blocks() {
        let result = InvocationResult::success(
            vec![
                ContentBlock::text("a"),
                ContentBlock::binary("att://1", "image/png"),
                ContentBlock::text("b"),
            ],
            1,
        );
        assert_eq!(result.text(), "a\nb");
    }
}

//! Local tool trait
//!
//! In-process capabilities registered at startup. Local tools share the
//! invocation path (rate limiting, retry policy, normalized results) with
//! remotely-discovered capabilities.

use crate::error::CoreResult;
use crate::invocation::ContentBlock;
use async_trait::async_trait;
use serde_json::Value;

/// A capability implemented as an in-process function
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Unique tool name (lowercase with underscores, e.g. `read_notes`)
    fn name(&self) -> &str;

    /// Description advertised to the LLM
    fn description(&self) -> &str;

    /// JSON Schema for accepted arguments
    fn input_schema(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    /// Execute one call with already-validated arguments
    async fn call(&self, arguments: Value) -> CoreResult<Vec<ContentBlock>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::InvokeError;

    struct Upper;

    #[async_trait]
    impl LocalTool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase a string"
        }

        async fn call(&self, arguments: Value) -> CoreResult<Vec<ContentBlock>> {
            let input = arguments["input"]
                .as_str()
                .ok_or_else(|| InvokeError::invalid_arguments("input must be a string"))?;
            Ok(vec![ContentBlock::text(input.to_uppercase())])
        }
    }

    #[tokio::test]
    async fn test_local_tool_call() {
        let tool = Upper;
        let blocks = tool
            .call(serde_json::json!({"input": "abc"}))
            .await
            .unwrap();
        assert_eq!(blocks, vec![ContentBlock::text("ABC")]);
        assert!(tool.input_schema().is_object());
    }
}

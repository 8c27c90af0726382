//! Client-side tool capability seam.
//!
//! The protocol never runs a tool itself. A client registers a
//! [`ToolExecutor`] — the bridge to whatever actually reads files or
//! runs commands — and the client answers inbound execution requests
//! through it. The same executor supplies the definitions sent in a
//! discovery message.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::protocol::ToolDefinition;

/// Capability provider backing a client's advertised tools.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions to advertise in a `tool_discovery` message.
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Run one tool. Must not panic; every failure is the `Err` string,
    /// which travels back as the response's `error` field verbatim.
    async fn execute(&self, tool: &str, parameters: &Map<String, Value>) -> Result<Value, String>;
}

/// Synchronous callback backing a [`CallbackExecutor`].
pub type ToolCallback = Arc<dyn Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync>;

/// A single-tool executor built from one callback.
///
/// This is the single-callback handler form expressed through the
/// executor interface: exactly one listed tool, and any other tool name
/// answered with `Unknown tool: <name>`.
pub struct CallbackExecutor {
    definition: ToolDefinition,
    callback: ToolCallback,
}

impl CallbackExecutor {
    pub fn new(
        definition: ToolDefinition,
        callback: impl Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            definition,
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl ToolExecutor for CallbackExecutor {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![self.definition.clone()]
    }

    async fn execute(&self, tool: &str, parameters: &Map<String, Value>) -> Result<Value, String> {
        if tool != self.definition.name {
            return Err(format!("Unknown tool: {tool}"));
        }
        (self.callback)(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ParameterSchema;
    use serde_json::json;

    fn echo_executor() -> CallbackExecutor {
        CallbackExecutor::new(
            ToolDefinition::new("echo", "Echo the arguments back", ParameterSchema::empty_object()),
            |parameters| Ok(Value::Object(parameters.clone())),
        )
    }

    #[tokio::test]
    async fn callback_executor_lists_exactly_one_tool() {
        let executor = echo_executor();
        let definitions = executor.tool_definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "echo");
    }

    #[tokio::test]
    async fn callback_executor_rejects_other_tool_names() {
        let executor = echo_executor();
        let err = executor.execute("bogus", &Map::new()).await.unwrap_err();
        assert_eq!(err, "Unknown tool: bogus");
    }

    #[tokio::test]
    async fn callback_executor_runs_its_tool() {
        let executor = echo_executor();
        let mut parameters = Map::new();
        parameters.insert("msg".to_string(), json!("hi"));
        let result = executor.execute("echo", &parameters).await.unwrap();
        assert_eq!(result, json!({ "msg": "hi" }));
    }
}

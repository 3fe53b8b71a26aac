// ABOUTME: Tool capability records and the Tool trait every bound tool implements.
// ABOUTME: Rollback and return-direct flags are declared data, never discovered from concrete types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::TurnContext;

/// Declared capabilities of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(default = "empty_object_schema")]
    pub schema: Value,
    /// Hand the tool's output straight back to the caller, skipping the follow-up model call.
    #[serde(default)]
    pub returns_direct: bool,
    /// The exchange that triggered this tool would bias later turns and must
    /// be kept out of future context.
    #[serde(default)]
    pub rollback: bool,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: empty_object_schema(),
            returns_direct: false,
            rollback: false,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_returns_direct(mut self, returns_direct: bool) -> Self {
        self.returns_direct = returns_direct;
        self
    }

    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }
}

/// A callable tool bound into a session.
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> &ToolMetadata;

    /// Run the tool. The turn context identifies the session and turn.
    async fn call(&self, arguments: Value, context: &TurnContext) -> anyhow::Result<String>;
}

type ToolFn = dyn Fn(Value, &TurnContext) -> anyhow::Result<String> + Send + Sync;

/// A tool backed by a plain closure.
pub struct FunctionTool {
    metadata: ToolMetadata,
    func: Box<ToolFn>,
}

impl FunctionTool {
    pub fn new<F>(metadata: ToolMetadata, func: F) -> Self
    where
        F: Fn(Value, &TurnContext) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self {
            metadata,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn call(&self, arguments: Value, context: &TurnContext) -> anyhow::Result<String> {
        (self.func)(arguments, context)
    }
}

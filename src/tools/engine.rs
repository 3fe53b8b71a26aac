// ABOUTME: Tool-execution engine: runs the tool calls a completion requests against the session's tools.
// ABOUTME: Tool failures become textual results; unknown tools are engine errors.

use async_trait::async_trait;

use crate::conversation::{Message, ToolCall};
use crate::error::DialogueError;
use crate::model::{Completion, ModelRequest};

/// Outcome of executing one completion's tool calls.
#[derive(Debug, Clone, Default)]
pub struct ToolExecution {
    /// The request's messages followed by the assistant tool-call message and
    /// one tool message per call, ready to send back to the model.
    pub messages: Vec<Message>,
    /// Every invoked tool asked for its output to go straight to the caller.
    pub return_direct: bool,
    /// Call id and tool name of each invocation, in call order.
    pub invoked: Vec<(String, String)>,
    /// Tool outputs joined by newlines, used when `return_direct` is set.
    pub direct_text: String,
}

impl ToolExecution {
    /// The first invoked tool, as `(call_id, name)`.
    pub fn first_invoked(&self) -> Option<(&str, &str)> {
        self.invoked
            .first()
            .map(|(id, name)| (id.as_str(), name.as_str()))
    }
}

/// Executes the tool calls requested by a completion.
#[async_trait]
pub trait ToolEngine: Send + Sync {
    async fn execute_tool_calls(
        &self,
        request: &ModelRequest,
        completion: &Completion,
    ) -> crate::error::Result<ToolExecution>;
}

/// Runs each requested call against the tools bound in the request options.
#[derive(Debug, Clone, Default)]
pub struct DefaultToolEngine;

#[async_trait]
impl ToolEngine for DefaultToolEngine {
    async fn execute_tool_calls(
        &self,
        request: &ModelRequest,
        completion: &Completion,
    ) -> crate::error::Result<ToolExecution> {
        if completion.tool_calls.is_empty() {
            return Err(DialogueError::NoToolCalls);
        }

        let tools = &request.options.tools;
        let mut messages = request.messages.clone();
        messages.push(Message::assistant_tool_calls(
            completion.text.clone().unwrap_or_default(),
            completion.tool_calls.clone(),
        ));

        let mut return_direct = true;
        let mut invoked = Vec::with_capacity(completion.tool_calls.len());
        let mut outputs = Vec::with_capacity(completion.tool_calls.len());

        for ToolCall {
            id,
            name,
            arguments,
        } in &completion.tool_calls
        {
            let tool = tools
                .get(name)
                .ok_or_else(|| DialogueError::ToolNotFound(name.clone()))?;

            let output = match tool.call(arguments.clone(), &request.options.context).await {
                Ok(output) => output,
                Err(error) => {
                    tracing::warn!(tool = %name, %error, "tool call failed");
                    format!("Error executing tool: {}", error)
                }
            };

            return_direct &= tool.metadata().returns_direct;
            invoked.push((id.clone(), name.clone()));
            messages.push(Message::tool_result(id, &output));
            outputs.push(output);
        }

        Ok(ToolExecution {
            messages,
            return_direct,
            invoked,
            direct_text: outputs.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::{Value, json};

    use crate::conversation::Role;
    use crate::model::ModelOptions;
    use crate::session::TurnContext;
    use crate::tools::{FunctionTool, SessionTools, Tool, ToolCatalog, ToolMetadata};

    fn request_with(tools: Vec<Arc<dyn Tool>>) -> ModelRequest {
        ModelRequest::new(
            vec![Message::user("what's the weather in Porto")],
            ModelOptions {
                tools: SessionTools::merge(&ToolCatalog::new(tools), Vec::new()),
                context: TurnContext::untracked(),
            },
        )
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    fn weather() -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(
            ToolMetadata::new("weather", "Current weather"),
            |args, _| {
                let city = args.get("city").and_then(Value::as_str).unwrap_or("nowhere");
                Ok(format!("Sunny in {}", city))
            },
        ))
    }

    fn end_chat() -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(
            ToolMetadata::new("end_chat", "End the conversation")
                .with_returns_direct(true)
                .with_rollback(true),
            |_, _| Ok("Goodbye!".to_string()),
        ))
    }

    fn broken() -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(
            ToolMetadata::new("broken", "Always fails").with_returns_direct(true),
            |_, _| anyhow::bail!("backend offline"),
        ))
    }

    #[tokio::test]
    async fn ordinary_tool_feeds_result_back() {
        let request = request_with(vec![weather()]);
        let completion = Completion::tool_use(vec![call("c1", "weather", json!({"city": "Porto"}))]);

        let out = DefaultToolEngine
            .execute_tool_calls(&request, &completion)
            .await
            .unwrap();

        assert!(!out.return_direct);
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[1].role, Role::Assistant);
        assert_eq!(out.messages[1].tool_calls.len(), 1);
        assert_eq!(out.messages[2].role, Role::Tool);
        assert_eq!(out.messages[2].text, "Sunny in Porto");
        assert_eq!(out.first_invoked(), Some(("c1", "weather")));
    }

    #[tokio::test]
    async fn return_direct_needs_every_tool_to_agree() {
        let request = request_with(vec![weather(), end_chat()]);

        let direct = DefaultToolEngine
            .execute_tool_calls(
                &request,
                &Completion::tool_use(vec![call("c1", "end_chat", json!({}))]),
            )
            .await
            .unwrap();
        assert!(direct.return_direct);
        assert_eq!(direct.direct_text, "Goodbye!");

        let mixed = DefaultToolEngine
            .execute_tool_calls(
                &request,
                &Completion::tool_use(vec![
                    call("c1", "end_chat", json!({})),
                    call("c2", "weather", json!({})),
                ]),
            )
            .await
            .unwrap();
        assert!(!mixed.return_direct);
        assert_eq!(mixed.invoked.len(), 2);
    }

    #[tokio::test]
    async fn tool_error_becomes_text() {
        let request = request_with(vec![broken()]);
        let out = DefaultToolEngine
            .execute_tool_calls(
                &request,
                &Completion::tool_use(vec![call("c1", "broken", json!({}))]),
            )
            .await
            .unwrap();
        assert_eq!(out.direct_text, "Error executing tool: backend offline");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_engine_error() {
        let request = request_with(vec![weather()]);
        let err = DefaultToolEngine
            .execute_tool_calls(
                &request,
                &Completion::tool_use(vec![call("c1", "launch_rocket", json!({}))]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::ToolNotFound(name) if name == "launch_rocket"));
    }

    #[tokio::test]
    async fn no_calls_is_an_engine_error() {
        let request = request_with(vec![weather()]);
        let err = DefaultToolEngine
            .execute_tool_calls(&request, &Completion::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::NoToolCalls));
    }
}

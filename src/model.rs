// ABOUTME: Model/completion service seam: request, completion, termination and usage types.
// ABOUTME: Providers implement ModelService; EchoModel is a local stand-in used by the console driver.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};

use crate::conversation::{Message, Role, ToolCall};
use crate::session::TurnContext;
use crate::tools::SessionTools;

/// Why the model stopped producing output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    #[default]
    Stop,
    Length,
    /// The model asks for tools to be executed.
    ToolUse,
    /// The answer is a tool's output handed back directly.
    ToolCall,
    Other(String),
}

/// Termination metadata of a completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Termination {
    pub reason: TerminationReason,
    #[serde(default)]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
}

impl Termination {
    pub fn stop() -> Self {
        Self::default()
    }

    pub fn reason(reason: TerminationReason) -> Self {
        Self {
            reason,
            ..Self::default()
        }
    }

    /// A completion produced by a tool whose output went straight to the caller.
    pub fn tool_call(tool_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            reason: TerminationReason::ToolCall,
            tool_id: Some(tool_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }
}

/// Token usage reported by the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}

/// A model completion, or one partial of a streamed completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub termination: Termination,
    #[serde(default)]
    pub usage: Usage,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// A completion that asks for tools to be run.
    pub fn tool_use(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            termination: Termination::reason(TerminationReason::ToolUse),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = Usage {
            prompt_tokens,
            completion_tokens,
        };
        self
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    /// The text, if it is anything other than whitespace.
    pub fn usable_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Options sent with every model call.
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Tools the model may call; empty when tools are disabled.
    pub tools: SessionTools,
    /// Correlation data for the turn this call belongs to.
    pub context: TurnContext,
}

/// One model call: ordered context plus options.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub options: ModelOptions,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>, options: ModelOptions) -> Self {
        Self { messages, options }
    }

    /// The last user message of the context: what this turn is answering.
    pub fn user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}

/// Stream of partial completions.
pub type CompletionStream = BoxStream<'static, anyhow::Result<Completion>>;

/// The model/completion service.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    /// Produce one complete completion.
    async fn call(&self, request: &ModelRequest) -> anyhow::Result<Completion>;

    /// Produce a completion incrementally. The default streams the result of
    /// [`ModelService::call`] as a single partial.
    fn stream(self: std::sync::Arc<Self>, request: ModelRequest) -> CompletionStream {
        Box::pin(stream::once(async move { self.call(&request).await }))
    }
}

/// Answers every turn by repeating the user's words back.
#[derive(Debug, Clone, Default)]
pub struct EchoModel;

#[async_trait]
impl ModelService for EchoModel {
    async fn call(&self, request: &ModelRequest) -> anyhow::Result<Completion> {
        let Some(user) = request.user_message() else {
            anyhow::bail!("no user message in context");
        };
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| word_count(&m.text))
            .sum();
        let text = format!("You said: {}", user.text);
        let completion_tokens = word_count(&text);
        Ok(Completion::text(text).with_usage(prompt_tokens, completion_tokens))
    }

    fn stream(self: std::sync::Arc<Self>, request: ModelRequest) -> CompletionStream {
        Box::pin(stream::once(async move { self.call(&request).await }).flat_map(
            |result| -> CompletionStream {
                match result {
                    Ok(done) => {
                        let usage = done.usage;
                        let words: Vec<String> = done
                            .text
                            .unwrap_or_default()
                            .split_inclusive(' ')
                            .map(str::to_string)
                            .collect();
                        let last = words.len().saturating_sub(1);
                        let partials = words.into_iter().enumerate().map(move |(i, word)| {
                            let partial = Completion::text(word);
                            Ok::<_, anyhow::Error>(if i == last {
                                partial.with_usage(usage.prompt_tokens, usage.completion_tokens)
                            } else {
                                partial
                            })
                        });
                        Box::pin(stream::iter(partials))
                    }
                    Err(error) => Box::pin(stream::once(async move { Err(error) })),
                }
            },
        ))
    }
}

fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request(texts: &[(&str, Role)]) -> ModelRequest {
        let messages = texts
            .iter()
            .map(|(text, role)| match role {
                Role::User => Message::user(*text),
                _ => Message::assistant(*text),
            })
            .collect();
        ModelRequest::new(messages, ModelOptions::default())
    }

    #[test]
    fn user_message_is_the_last_user_entry() {
        let req = request(&[("a", Role::User), ("b", Role::Assistant), ("c", Role::User)]);
        assert_eq!(req.user_message().unwrap().text, "c");
    }

    #[test]
    fn whitespace_is_not_usable_text() {
        assert!(Completion::text("  \n").usable_text().is_none());
        assert!(Completion::default().usable_text().is_none());
        assert_eq!(Completion::text("ok").usable_text(), Some("ok"));
    }

    #[test]
    fn usage_adds_up() {
        let mut total = Usage::default();
        total += Usage {
            prompt_tokens: 3,
            completion_tokens: 1,
        };
        total += Usage {
            prompt_tokens: 5,
            completion_tokens: 2,
        };
        assert_eq!(total.prompt_tokens, 8);
        assert_eq!(total.completion_tokens, 3);
    }

    #[test]
    fn tool_call_termination_names_the_tool() {
        let term = Termination::tool_call("call-1", "end_chat");
        assert_eq!(term.reason, TerminationReason::ToolCall);
        assert_eq!(term.tool_name.as_deref(), Some("end_chat"));
    }

    #[tokio::test]
    async fn echo_model_repeats_the_user() {
        let out = EchoModel
            .call(&request(&[("hello there", Role::User)]))
            .await
            .unwrap();
        assert_eq!(out.text.as_deref(), Some("You said: hello there"));
        assert_eq!(out.usage.prompt_tokens, 2);
    }

    #[tokio::test]
    async fn echo_model_streams_word_by_word() {
        let partials: Vec<Completion> = Arc::new(EchoModel)
            .stream(request(&[("one two", Role::User)]))
            .map(|p| p.unwrap())
            .collect()
            .await;
        let joined: String = partials.iter().filter_map(|p| p.text.clone()).collect();
        assert_eq!(joined, "You said: one two");
        assert!(partials.len() > 1);
        assert!(partials.last().unwrap().usage.completion_tokens > 0);
    }
}

// ABOUTME: Conversation message types: roles, message kinds, tool-call payloads, log entries.
// ABOUTME: A Message is immutable once appended; rollback markers hold an assistant slot with no text.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Whether a turn was an ordinary exchange or a context-corrupting tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Normal,
    FunctionCall,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::FunctionCall => "function_call",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A single message of generation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub created_at_millis: i64,
    #[serde(default)]
    pub token_count: u32,
    #[serde(default)]
    pub first_completion_latency_ms: u32,
    #[serde(default)]
    pub first_audio_latency_ms: u32,
    #[serde(default)]
    pub kind: MessageKind,
    /// Tool calls requested by an assistant message in a tool round trip.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call a tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            created_at_millis: now_millis(),
            token_count: 0,
            first_completion_latency_ms: 0,
            first_audio_latency_ms: 0,
            kind: MessageKind::Normal,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// An assistant message that carries the tool calls it requested.
    pub fn assistant_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, text)
        }
    }

    /// The result of one tool call, fed back to the model.
    pub fn tool_result(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, text)
        }
    }

    /// Copy of this message stamped with the given creation time.
    pub fn at(mut self, created_at_millis: i64) -> Self {
        self.created_at_millis = created_at_millis;
        self
    }
}

/// One slot of a conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum LogEntry {
    Message(Message),
    /// Stands in for the assistant reply of a rolled-back turn.
    RollbackMarker { created_at_millis: i64 },
}

impl LogEntry {
    pub fn created_at_millis(&self) -> i64 {
        match self {
            Self::Message(msg) => msg.created_at_millis,
            Self::RollbackMarker { created_at_millis } => *created_at_millis,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Message(msg) => msg.role,
            Self::RollbackMarker { .. } => Role::Assistant,
        }
    }

    pub fn is_rollback_marker(&self) -> bool {
        matches!(self, Self::RollbackMarker { .. })
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(msg) => Some(msg),
            Self::RollbackMarker { .. } => None,
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

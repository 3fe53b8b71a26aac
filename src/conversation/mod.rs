// ABOUTME: Conversation module: message types, the per-session log, and the role system prompt.
// ABOUTME: The log is the authoritative context source for every model call of a session.

pub mod log;
pub mod message;
pub mod prompt;

pub use log::{ConversationLog, SharedConversation, lock};
pub use message::{LogEntry, Message, MessageKind, Role, ToolCall, now_millis};
pub use prompt::RolePromptBuilder;

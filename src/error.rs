// ABOUTME: Error vocabulary of the dialogue core.
// ABOUTME: Every variant is recoverable; turns degrade to an apology, background jobs to a log line.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DialogueError>;

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("Model error: {0}")]
    Model(String),
    #[error("Model returned no usable text")]
    EmptyCompletion,
    #[error("No tool call requested by the model")]
    NoToolCalls,
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    #[error("Tool rounds exhausted after {0} rounds")]
    ToolRoundsExhausted(usize),
    #[error("Stream aborted: {0}")]
    StreamAborted(String),
}

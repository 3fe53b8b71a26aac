// ABOUTME: Streamed completion handling: forwards partials to the caller and aggregates the final result.
// ABOUTME: A dropped receiver or a stream error ends the round; the turn is then treated as failed.

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::{DialogueError, Result};
use crate::model::{Completion, CompletionStream, Termination, Usage};

/// Folds partial completions into one.
///
/// Text is concatenated, tool calls collected in order; the last non-default
/// termination and usage reported win.
#[derive(Debug, Default)]
pub struct CompletionAggregator {
    text: Option<String>,
    completion: Completion,
    partials: usize,
}

impl CompletionAggregator {
    pub fn push(&mut self, partial: &Completion) {
        self.partials += 1;
        if let Some(delta) = &partial.text {
            self.text.get_or_insert_with(String::new).push_str(delta);
        }
        self.completion
            .tool_calls
            .extend(partial.tool_calls.iter().cloned());
        if partial.termination != Termination::default() {
            self.completion.termination = partial.termination.clone();
        }
        if partial.usage != Usage::default() {
            self.completion.usage = partial.usage;
        }
    }

    /// Partials seen so far.
    pub fn len(&self) -> usize {
        self.partials
    }

    pub fn is_empty(&self) -> bool {
        self.partials == 0
    }

    pub fn finish(self) -> Completion {
        Completion {
            text: self.text,
            ..self.completion
        }
    }
}

/// Drain `partials` into `tx` and return the aggregate.
///
/// Returns [`DialogueError::StreamAborted`] as soon as the receiving side is
/// gone, and [`DialogueError::Model`] when the model stream yields an error.
pub async fn forward(
    mut partials: CompletionStream,
    tx: &mpsc::Sender<Completion>,
) -> Result<Completion> {
    let mut aggregator = CompletionAggregator::default();
    loop {
        let next = tokio::select! {
            next = partials.next() => next,
            _ = tx.closed() => {
                return Err(DialogueError::StreamAborted("receiver dropped".into()));
            }
        };
        let Some(partial) = next else {
            break;
        };
        let partial = partial.map_err(|error| DialogueError::Model(error.to_string()))?;
        aggregator.push(&partial);
        if tx.send(partial).await.is_err() {
            return Err(DialogueError::StreamAborted("receiver dropped".into()));
        }
    }
    tracing::trace!(partials = aggregator.len(), "model stream finished");
    Ok(aggregator.finish())
}

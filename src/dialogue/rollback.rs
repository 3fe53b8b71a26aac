// ABOUTME: Rollback decision: whether a turn's tool call would corrupt future context.
// ABOUTME: Pure function of the completion's termination metadata and the session's bound tools.

use crate::model::{Termination, TerminationReason};
use crate::tools::SessionTools;

/// True iff the completion came from a tool call, the tool is bound in this
/// session, and its declared metadata asks for rollback.
///
/// Control-plane tools ("end conversation", "switch persona") set `rollback`;
/// echoing their exchange back into context would bias every later turn.
pub fn decide(termination: &Termination, bound_tools: &SessionTools) -> bool {
    if termination.reason != TerminationReason::ToolCall {
        return false;
    }
    let Some(tool_name) = termination.tool_name.as_deref().filter(|n| !n.is_empty()) else {
        return false;
    };

    let rollback = bound_tools
        .metadata(tool_name)
        .is_some_and(|meta| meta.rollback);
    if rollback {
        tracing::info!(
            tool = tool_name,
            tool_id = termination.tool_id.as_deref().unwrap_or_default(),
            "tool call marks turn for rollback"
        );
    }
    rollback
}

// ABOUTME: Dialogue module: turn orchestration, completion observation, and the rollback decision.
// ABOUTME: The orchestrator runs turns; the observer is the only writer of assistant entries.

pub mod observer;
pub mod orchestrator;
pub mod rollback;
pub mod stream;

pub use observer::TurnObserver;
pub use orchestrator::{DEFAULT_APOLOGY, DialogueSettings, TurnOrchestrator, TurnStream};
pub use stream::CompletionAggregator;

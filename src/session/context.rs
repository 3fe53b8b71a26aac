// ABOUTME: Turn-scoped correlation context passed along with every model call.
// ABOUTME: Carries the session handle and turn timestamp to tools and the completion observer.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use super::SessionHandle;

/// Key under which the session handle travels.
pub const SESSION_KEY: &str = "session";

/// Key under which the turn timestamp travels.
pub const TIMESTAMP_KEY: &str = "conversationTimestamp";

/// Correlation data for one turn.
///
/// This is the only way the completion observer learns which session a
/// completion belongs to. A context without a session marks an untracked
/// call that must not touch any conversation.
#[derive(Clone, Default)]
pub struct TurnContext {
    session: Option<SessionHandle>,
    turn_timestamp_millis: Option<i64>,
    extras: HashMap<String, Value>,
}

impl TurnContext {
    pub fn new(session: SessionHandle, turn_timestamp_millis: i64) -> Self {
        Self {
            session: Some(session),
            turn_timestamp_millis: Some(turn_timestamp_millis),
            extras: HashMap::new(),
        }
    }

    /// A context that belongs to no dialogue.
    pub fn untracked() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn turn_timestamp_millis(&self) -> Option<i64> {
        self.turn_timestamp_millis
    }

    /// Attach a free-form value for tools. Fixed keys are reserved and
    /// rejected; returns whether the value was stored.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if key == SESSION_KEY || key == TIMESTAMP_KEY {
            return false;
        }
        self.extras.insert(key, value);
        true
    }

    /// Look up a value by key. The session handle is not a JSON value and is
    /// only reachable through [`TurnContext::session`]; its key yields the
    /// session id.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            SESSION_KEY => self
                .session
                .as_ref()
                .map(|s| Value::from(s.session_id().to_string())),
            TIMESTAMP_KEY => self.turn_timestamp_millis.map(Value::from),
            other => self.extras.get(other).cloned(),
        }
    }
}

impl fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnContext")
            .field("session", &self.session.as_ref().map(|s| s.session_id()))
            .field("turn_timestamp_millis", &self.turn_timestamp_millis)
            .field("extras", &self.extras)
            .finish()
    }
}

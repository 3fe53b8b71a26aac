// ABOUTME: ConversationLog: ordered per-session history that feeds the next model call.
// ABOUTME: Tail appends only, non-decreasing timestamps, rollback-marked turns hidden from context.

use tracing::debug;

use super::message::{LogEntry, Message, Role};
use super::prompt::RolePromptBuilder;
use crate::session::{DeviceRef, RoleRef};

/// Shared handle to one session's log. Mutated only by the session's
/// orchestrator and completion observer, one turn at a time.
pub type SharedConversation = std::sync::Arc<std::sync::Mutex<ConversationLog>>;

/// Lock a shared log. A panic while the lock was held leaves the log as the
/// last completed operation wrote it, so poisoning is not fatal.
pub fn lock(conversation: &SharedConversation) -> std::sync::MutexGuard<'_, ConversationLog> {
    conversation
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Append-only, ordered message history for a single session.
///
/// The caller must serialize turns per session; overlapping turns on one log
/// are not defended against here.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    session_id: String,
    device: DeviceRef,
    role: RoleRef,
    entries: Vec<LogEntry>,
    max_messages: Option<usize>,
}

impl ConversationLog {
    pub fn new(session_id: impl Into<String>, device: DeviceRef, role: RoleRef) -> Self {
        Self {
            session_id: session_id.into(),
            device,
            role,
            entries: Vec::new(),
            max_messages: None,
        }
    }

    /// Limit the retained history. Oldest turns are dropped whole once the log
    /// holds more than `max_messages` entries plus the in-flight user message.
    pub fn with_window(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    pub fn role(&self) -> &RoleRef {
        &self.role
    }

    /// Load previously persisted turns ahead of any live traffic.
    pub fn seed(&mut self, history: Vec<Message>) {
        for msg in history {
            let ts = msg.created_at_millis;
            self.append(msg, ts);
        }
        self.trim();
    }

    /// Insert a message at the tail, stamped with `timestamp_millis`.
    ///
    /// A timestamp older than the current tail is raised to the tail's, so
    /// timestamps never decrease. Returns the timestamp actually recorded.
    pub fn append(&mut self, message: Message, timestamp_millis: i64) -> i64 {
        let ts = self.monotonic(timestamp_millis);
        let is_user = message.role == Role::User;
        self.entries.push(LogEntry::Message(message.at(ts)));
        if is_user {
            self.trim();
        }
        ts
    }

    /// Occupy the assistant slot of the current turn with a rollback marker.
    pub fn append_rollback_marker(&mut self, timestamp_millis: i64) -> i64 {
        let ts = self.monotonic(timestamp_millis);
        self.entries.push(LogEntry::RollbackMarker {
            created_at_millis: ts,
        });
        ts
    }

    /// Remove the trailing user entry of a turn that never completed.
    ///
    /// Only the entry recorded at `created_at_millis` is removed, and only if
    /// it is still the tail. Returns whether anything was removed.
    pub fn retract_user(&mut self, created_at_millis: i64) -> bool {
        let is_tail = matches!(
            self.entries.last(),
            Some(LogEntry::Message(msg))
                if msg.role == Role::User && msg.created_at_millis == created_at_millis
        );
        if is_tail {
            self.entries.pop();
        }
        is_tail
    }

    /// Every slot in order, rollback markers included.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Ordered messages usable as generation context.
    ///
    /// A rolled-back turn is left out entirely: neither the user message that
    /// triggered it nor its marker reaches the model again.
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.entries.len());
        let mut iter = self.entries.iter().peekable();
        while let Some(entry) = iter.next() {
            let LogEntry::Message(msg) = entry else {
                continue;
            };
            if msg.role == Role::User && iter.peek().is_some_and(|next| next.is_rollback_marker())
            {
                iter.next();
                continue;
            }
            out.push(msg.clone());
        }
        out
    }

    /// The role system prompt (if the role has one) followed by `messages()`.
    pub fn context(&self) -> Vec<Message> {
        let prompt = RolePromptBuilder::new(
            self.role.description.as_deref(),
            self.device.location.as_deref(),
        )
        .build();

        let mut out = Vec::with_capacity(self.entries.len() + 1);
        if let Some(text) = prompt {
            out.push(Message::system(text));
        }
        out.extend(self.messages());
        out
    }

    /// Forget every entry ("new conversation").
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.entries.last().map(LogEntry::created_at_millis)
    }

    fn monotonic(&self, timestamp_millis: i64) -> i64 {
        match self.last_timestamp() {
            Some(last) if timestamp_millis < last => {
                debug!(
                    session_id = %self.session_id,
                    requested = timestamp_millis,
                    tail = last,
                    "raising out-of-order timestamp to log tail"
                );
                last
            }
            _ => timestamp_millis,
        }
    }

    /// Enforce the window over context-visible messages only. Rolled-back
    /// turns cost no slots; they are only shed once the raw log grows past
    /// twice the window.
    fn trim(&mut self) {
        let Some(max) = self.max_messages else {
            return;
        };
        while self.visible_len() > max + 1 {
            self.drop_oldest_turn();
        }
        while self.entries.len() > 2 * (max + 1) && self.drop_oldest_hidden_turn() {}
    }

    /// Entries that `messages()` would return.
    fn visible_len(&self) -> usize {
        let markers = self
            .entries
            .iter()
            .filter(|entry| entry.is_rollback_marker())
            .count();
        self.entries.len() - markers - self.hidden_user_positions().count()
    }

    /// Positions of user entries answered by a rollback marker.
    fn hidden_user_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0].role() == Role::User && pair[1].is_rollback_marker())
            .map(|(i, _)| i)
    }

    /// Remove the oldest rolled-back user entry and its marker.
    fn drop_oldest_hidden_turn(&mut self) -> bool {
        let Some(pos) = self.hidden_user_positions().next() else {
            return false;
        };
        self.entries.drain(pos..pos + 2);
        true
    }

    /// Drop the first entry and anything up to the next user message.
    fn drop_oldest_turn(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.remove(0);
        while self
            .entries
            .first()
            .is_some_and(|entry| entry.role() != Role::User)
        {
            self.entries.remove(0);
        }
    }
}

// ABOUTME: Turn completion observer: finalizes each turn exactly once.
// ABOUTME: Resolves rollback, appends to the log synchronously, and queues persistence in the background.

use crate::conversation::{self, Message, MessageKind, Role, now_millis};
use crate::model::{Completion, ModelRequest};
use crate::persistence::record::{created_at_key, normalize_device_id};
use crate::persistence::{AudioAttachment, MessageRecord, PersistenceJob, PersistenceQueue};
use crate::session::Session;
use crate::tools::SessionTools;

use super::rollback;

/// Finalizes turns: log append plus background persistence.
///
/// Turns are recognised only through the session handle carried in the
/// request's turn context; a completion without one is left alone.
#[derive(Clone)]
pub struct TurnObserver {
    queue: PersistenceQueue,
}

impl TurnObserver {
    pub fn new(queue: PersistenceQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &PersistenceQueue {
        &self.queue
    }

    /// Record a finished turn.
    ///
    /// The log append happens before this returns, so the next turn's
    /// context already reflects the rollback decision. Storage catches up
    /// in the background.
    pub fn on_turn_final(&self, request: &ModelRequest, response: &Completion) {
        let Some(session) = request.options.context.session() else {
            tracing::debug!("completion without session context, not recording");
            return;
        };
        let Some(user) = request.user_message() else {
            tracing::warn!(
                session_id = %session.session_id(),
                "finished turn has no user message, not recording"
            );
            return;
        };
        let Some(log) = session.conversation() else {
            tracing::warn!(
                session_id = %session.session_id(),
                "finished turn has no conversation log, not recording"
            );
            return;
        };

        let empty_tools = SessionTools::default();
        let bound_tools = session.bound_tools().unwrap_or(&empty_tools);
        let rollback = rollback::decide(&response.termination, bound_tools);
        let kind = if rollback {
            MessageKind::FunctionCall
        } else {
            MessageKind::Normal
        };

        let latency_ms = session
            .synthesis_timing()
            .and_then(|timing| timing.first_completion_latency_ms())
            .unwrap_or(0);
        let mut assistant = Message::assistant(response.text.clone().unwrap_or_default());
        assistant.token_count = response.usage.completion_tokens;
        assistant.first_completion_latency_ms = latency_ms;

        let requested_at = request
            .options
            .context
            .turn_timestamp_millis()
            .unwrap_or_else(now_millis);
        let assistant_at = {
            let mut log = conversation::lock(log);
            if rollback {
                log.append_rollback_marker(requested_at)
            } else {
                log.append(assistant.clone(), requested_at)
            }
        };
        let assistant = assistant.at(assistant_at);

        tracing::debug!(
            session_id = %session.session_id(),
            kind = kind.as_str(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "turn finalized"
        );

        self.persist(session, user, &assistant, kind, response);
    }

    /// Undo the user entry of a turn that produced no answer, so no orphaned
    /// user message remains in the log.
    pub fn on_turn_aborted(&self, request: &ModelRequest) {
        let Some(session) = request.options.context.session() else {
            return;
        };
        let (Some(user), Some(log)) = (request.user_message(), session.conversation()) else {
            return;
        };
        let retracted = conversation::lock(log).retract_user(user.created_at_millis);
        if retracted {
            tracing::debug!(session_id = %session.session_id(), "retracted user entry of failed turn");
        } else {
            tracing::warn!(
                session_id = %session.session_id(),
                "failed turn's user entry is no longer the log tail, left in place"
            );
        }
    }

    fn persist(
        &self,
        session: &Session,
        user: &Message,
        assistant: &Message,
        kind: MessageKind,
        response: &Completion,
    ) {
        let device_id = normalize_device_id(&session.device().device_id);
        let role_id = session.role().role_id;
        let record = |msg: &Message| {
            MessageRecord::from_message(msg, &device_id, session.session_id(), role_id, kind)
        };

        let records = vec![
            record(user).with_token_count(response.usage.prompt_tokens),
            record(assistant)
                .with_token_count(response.usage.completion_tokens)
                .with_first_completion_latency(assistant.first_completion_latency_ms),
        ];
        self.queue.submit(PersistenceJob::SaveTurn(records));

        let audio_path = session.audio_path(Role::User, user.created_at_millis);
        self.queue.submit(PersistenceJob::AttachAudio(AudioAttachment {
            device_id,
            role_id,
            sender: Role::User,
            kind,
            created_at_key: created_at_key(user.created_at_millis),
            created_at_millis: user.created_at_millis,
            audio_path: audio_path.to_string_lossy().into_owned(),
        }));
    }
}

// ABOUTME: Turn orchestrator: drives one user-to-assistant exchange, blocking or streamed.
// ABOUTME: Builds context from the log, calls the model, runs tool rounds, and hands the result to the observer.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::conversation::{self, ConversationLog, Message, Role, SharedConversation};
use crate::error::{DialogueError, Result};
use crate::model::{Completion, ModelOptions, ModelRequest, ModelService, Termination, Usage};
use crate::persistence::record::normalize_device_id;
use crate::persistence::{MessageRecord, PersistenceGateway};
use crate::session::{Session, SessionHandle, TurnContext};
use crate::tools::{
    DefaultToolEngine, SessionTools, ToolBinder, ToolCatalog, ToolEngine, bind_session_tools,
};

use super::observer::TurnObserver;
use super::stream;

/// Returned to the caller whenever a turn cannot produce an answer.
pub const DEFAULT_APOLOGY: &str =
    "Sorry, I ran into a problem while handling your request. Please try again later.";

/// Tunables of the turn loop.
#[derive(Debug, Clone)]
pub struct DialogueSettings {
    pub apology: String,
    /// Follow-up model calls allowed after tool executions within one turn.
    pub max_tool_rounds: usize,
    /// Message window of each conversation log; `None` keeps everything.
    pub max_messages: Option<usize>,
    /// Persisted messages loaded into a freshly created log.
    pub history_limit: usize,
    /// Partials buffered between the stream driver and the caller.
    pub stream_buffer: usize,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            apology: DEFAULT_APOLOGY.to_string(),
            max_tool_rounds: 4,
            max_messages: Some(16),
            history_limit: 16,
            stream_buffer: 32,
        }
    }
}

/// Partial completions of a streamed turn, in production order.
pub type TurnStream = ReceiverStream<Completion>;

/// What to do after one model completion.
enum Step {
    /// The model answered.
    Answer(Completion),
    /// A return-direct tool answered on the model's behalf.
    Direct(Completion),
    /// Tools ran; send these messages back to the model.
    Continue(Vec<Message>),
}

/// Drives turns for any number of sessions.
///
/// Turns of one session must not overlap; serializing them is the caller's job.
pub struct TurnOrchestrator {
    model: Arc<dyn ModelService>,
    engine: Arc<dyn ToolEngine>,
    catalog: ToolCatalog,
    binder: Option<Arc<dyn ToolBinder>>,
    history: Option<Arc<dyn PersistenceGateway>>,
    observer: TurnObserver,
    settings: DialogueSettings,
}

impl TurnOrchestrator {
    pub fn new(model: Arc<dyn ModelService>, observer: TurnObserver) -> Self {
        Self {
            model,
            engine: Arc::new(DefaultToolEngine),
            catalog: ToolCatalog::default(),
            binder: None,
            history: None,
            observer,
            settings: DialogueSettings::default(),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn ToolEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_binder(mut self, binder: Arc<dyn ToolBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    /// Seed newly created logs from this gateway's stored history.
    pub fn with_history(mut self, gateway: Arc<dyn PersistenceGateway>) -> Self {
        self.history = Some(gateway);
        self
    }

    pub fn with_settings(mut self, settings: DialogueSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &DialogueSettings {
        &self.settings
    }

    pub fn observer(&self) -> &TurnObserver {
        &self.observer
    }

    /// Run one exchange and return the assistant's text.
    ///
    /// Never fails: any model or tool failure yields the apology, and the
    /// turn's user entry is taken back out of the log.
    pub async fn run_turn(
        &self,
        session: &SessionHandle,
        user_text: &str,
        allow_tools: bool,
    ) -> String {
        let request = self
            .prepare(session, Message::user(user_text), allow_tools)
            .await;

        match self.complete(&request).await {
            Ok(done) => {
                let text = done.text.clone().unwrap_or_default();
                self.observer.on_turn_final(&request, &done);
                text
            }
            Err(error) => {
                tracing::warn!(session_id = %session.session_id(), %error, "turn failed");
                self.observer.on_turn_aborted(&request);
                self.settings.apology.clone()
            }
        }
    }

    /// Start one exchange and return its partial completions as they are produced.
    ///
    /// Returns immediately; the turn runs on a background task. The stream
    /// ends once the turn is finalized. Dropping the stream aborts the turn,
    /// which then leaves no trace in the log. A failed turn ends with one
    /// partial carrying the apology.
    pub fn stream_turn(
        self: &Arc<Self>,
        session: &SessionHandle,
        user_message: Message,
        allow_tools: bool,
    ) -> TurnStream {
        let (tx, rx) = mpsc::channel(self.settings.stream_buffer.max(1));
        let this = self.clone();
        let session = session.clone();
        tokio::spawn(async move {
            this.drive_stream(session, user_message, allow_tools, tx)
                .await;
        });
        ReceiverStream::new(rx)
    }

    async fn drive_stream(
        &self,
        session: SessionHandle,
        user_message: Message,
        allow_tools: bool,
        tx: mpsc::Sender<Completion>,
    ) {
        let request = self.prepare(&session, user_message, allow_tools).await;

        match self.stream_rounds(&request, &tx).await {
            Ok(done) => self.observer.on_turn_final(&request, &done),
            Err(DialogueError::StreamAborted(reason)) => {
                tracing::info!(session_id = %session.session_id(), %reason, "streamed turn aborted");
                self.observer.on_turn_aborted(&request);
            }
            Err(error) => {
                tracing::warn!(session_id = %session.session_id(), %error, "streamed turn failed");
                self.observer.on_turn_aborted(&request);
                let _ = tx.send(Completion::text(&self.settings.apology)).await;
            }
        }
    }

    /// Bind tools, append the user message, and build the request.
    async fn prepare(
        &self,
        session: &SessionHandle,
        user_message: Message,
        allow_tools: bool,
    ) -> ModelRequest {
        let tools = if allow_tools && session.supports_tools() {
            bind_session_tools(session, &self.catalog, self.binder.as_deref())
                .await
                .clone()
        } else {
            SessionTools::default()
        };

        let log = self.conversation(session).await;
        let messages = {
            let mut log = conversation::lock(&log);
            let at = user_message.created_at_millis;
            log.append(user_message, at);
            log.context()
        };

        let turn_at = conversation::now_millis();
        ModelRequest::new(
            messages,
            ModelOptions {
                tools,
                context: TurnContext::new(session.clone(), turn_at),
            },
        )
    }

    /// The session's log, created and seeded from history on the first turn.
    async fn conversation(&self, session: &Session) -> SharedConversation {
        session
            .conversation_or_init(|| async {
                let mut log = ConversationLog::new(
                    session.session_id(),
                    session.device().clone(),
                    session.role().clone(),
                );
                if let Some(max) = self.settings.max_messages {
                    log = log.with_window(max);
                }
                if let Some(gateway) = &self.history {
                    let device_id = normalize_device_id(&session.device().device_id);
                    match gateway
                        .find_recent(&device_id, session.role().role_id, self.settings.history_limit)
                        .await
                    {
                        Ok(records) => log.seed(history_messages(records)),
                        Err(error) => tracing::warn!(
                            session_id = %session.session_id(),
                            %error,
                            "failed to load conversation history"
                        ),
                    }
                }
                tracing::debug!(
                    session_id = %session.session_id(),
                    seeded = log.len(),
                    "conversation created"
                );
                Arc::new(Mutex::new(log))
            })
            .await
            .clone()
    }

    /// Blocking completion with tool rounds.
    async fn complete(&self, request: &ModelRequest) -> Result<Completion> {
        let mut round = request.clone();
        let mut usage = Usage::default();
        for _ in 0..=self.settings.max_tool_rounds {
            let completion = self
                .model
                .call(&round)
                .await
                .map_err(|error| DialogueError::Model(error.to_string()))?;
            usage += completion.usage;
            match self.next_step(&round, completion).await? {
                Step::Answer(done) | Step::Direct(done) => return Ok(Completion { usage, ..done }),
                Step::Continue(messages) => round.messages = messages,
            }
        }
        Err(DialogueError::ToolRoundsExhausted(self.settings.max_tool_rounds))
    }

    /// Streamed completion with tool rounds.
    ///
    /// Every partial reaches the consumer as it arrives, including text the
    /// model emits ahead of a tool call. That text is kept and leads the
    /// finalized completion, so log and storage hold what the consumer saw.
    async fn stream_rounds(
        &self,
        request: &ModelRequest,
        tx: &mpsc::Sender<Completion>,
    ) -> Result<Completion> {
        let mut round = request.clone();
        let mut usage = Usage::default();
        let mut streamed = String::new();
        for _ in 0..=self.settings.max_tool_rounds {
            let partials = self.model.clone().stream(round.clone());
            let completion = stream::forward(partials, tx).await?;
            usage += completion.usage;
            let round_text = completion.text.clone().unwrap_or_default();
            match self.next_step(&round, completion).await? {
                Step::Answer(done) => {
                    return Ok(Completion {
                        usage,
                        ..prefixed(&streamed, done)
                    });
                }
                Step::Direct(done) => {
                    // Tool output never went through the model stream.
                    if tx.send(done.clone()).await.is_err() {
                        return Err(DialogueError::StreamAborted("receiver dropped".into()));
                    }
                    return Ok(Completion {
                        usage,
                        ..prefixed(&streamed, done)
                    });
                }
                Step::Continue(messages) => {
                    streamed.push_str(&round_text);
                    round.messages = messages;
                }
            }
        }
        Err(DialogueError::ToolRoundsExhausted(self.settings.max_tool_rounds))
    }

    async fn next_step(&self, request: &ModelRequest, completion: Completion) -> Result<Step> {
        if completion.requests_tools() && !request.options.tools.is_empty() {
            let execution = self.engine.execute_tool_calls(request, &completion).await?;
            tracing::debug!(
                tools = ?execution.invoked,
                return_direct = execution.return_direct,
                "tool calls executed"
            );
            if !execution.return_direct {
                return Ok(Step::Continue(execution.messages));
            }

            let (tool_id, tool_name) = execution.first_invoked().unwrap_or_default();
            let direct = Completion::text(&execution.direct_text)
                .with_termination(Termination::tool_call(tool_id, tool_name));
            if direct.usable_text().is_none() {
                return Err(DialogueError::EmptyCompletion);
            }
            return Ok(Step::Direct(direct));
        }

        if completion.usable_text().is_none() {
            return Err(DialogueError::EmptyCompletion);
        }
        Ok(Step::Answer(completion))
    }
}

/// `done` with `streamed` put in front of its text.
fn prefixed(streamed: &str, mut done: Completion) -> Completion {
    if !streamed.is_empty() {
        let text = done.text.take().unwrap_or_default();
        done.text = Some(format!("{}{}", streamed, text));
    }
    done
}

/// Turn stored records back into context messages, starting at a user message.
fn history_messages(records: Vec<MessageRecord>) -> Vec<Message> {
    records
        .iter()
        .map(MessageRecord::to_message)
        .skip_while(|msg| msg.role != Role::User)
        .collect()
}

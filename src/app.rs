// ABOUTME: App orchestrator: wires storage, the persistence queue, observer, and orchestrator together.
// ABOUTME: Runs a line-oriented console session: each stdin line is one turn.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::Config;
use crate::conversation::{Message, now_millis};
use crate::dialogue::{TurnObserver, TurnOrchestrator};
use crate::model::EchoModel;
use crate::persistence::{JsonlGateway, PersistenceGateway, PersistenceQueue};
use crate::session::{DeviceRef, RoleRef, Session, SessionHandle};

/// Console command that starts a new conversation.
const NEW_CONVERSATION: &str = "/new";
/// Console command that ends the session.
const QUIT: &str = "/quit";

/// Who the console session talks as.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub device_id: String,
    pub location: Option<String>,
    pub role_id: i64,
    pub role_name: String,
    pub role_description: Option<String>,
}

/// Top-level application that orchestrates all subsystems.
pub struct App {
    config: Config,
    profile: SessionProfile,
    fresh: bool,
    stream: bool,
}

impl App {
    /// Create a new app with the given configuration.
    pub fn new(config: Config, profile: SessionProfile, fresh: bool, stream: bool) -> Self {
        Self {
            config,
            profile,
            fresh,
            stream,
        }
    }

    /// Set up subsystems and run turns until stdin closes or `/quit`.
    pub async fn run(self) -> anyhow::Result<()> {
        let gateway = Arc::new(JsonlGateway::open(self.config.messages_path())?);
        tracing::info!(path = %gateway.path().display(), "message store opened");

        let queue = PersistenceQueue::start(gateway.clone(), self.config.queue_settings());
        let mut orchestrator =
            TurnOrchestrator::new(Arc::new(EchoModel), TurnObserver::new(queue.clone()))
                .with_settings(self.config.dialogue_settings());
        // A fresh start skips loading stored history into the new log.
        if !self.fresh {
            orchestrator = orchestrator.with_history(gateway.clone() as Arc<dyn PersistenceGateway>);
        }
        let orchestrator = Arc::new(orchestrator);

        let session = self.open_session();
        tracing::info!(session_id = %session.session_id(), "session started");

        let allow_tools = self.config.tools.enabled;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            let text = line.trim();
            match text {
                "" => continue,
                QUIT => break,
                NEW_CONVERSATION => {
                    session.new_conversation();
                    stdout.write_all(b"(new conversation)\n").await?;
                }
                _ if self.stream => {
                    let mut partials =
                        orchestrator.stream_turn(&session, Message::user(text), allow_tools);
                    while let Some(partial) = partials.next().await {
                        if let Some(delta) = partial.text {
                            stdout.write_all(delta.as_bytes()).await?;
                            stdout.flush().await?;
                        }
                    }
                    stdout.write_all(b"\n").await?;
                }
                _ => {
                    let reply = orchestrator.run_turn(&session, text, allow_tools).await;
                    stdout.write_all(reply.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
            }
            stdout.flush().await?;
        }

        queue.shutdown().await;
        tracing::info!(session_id = %session.session_id(), "session ended");
        Ok(())
    }

    fn open_session(&self) -> SessionHandle {
        let mut device = DeviceRef::new(&self.profile.device_id);
        if let Some(location) = &self.profile.location {
            device = device.with_location(location);
        }
        let mut role = RoleRef::new(self.profile.role_id, &self.profile.role_name);
        if let Some(description) = &self.profile.role_description {
            role = role.with_description(description);
        }
        let session_id = format!("{}-{}", self.profile.device_id, now_millis());
        Session::new(session_id, device, role)
            .with_audio_dir(self.config.audio_dir())
            .into_handle()
    }
}

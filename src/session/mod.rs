// ABOUTME: Session module: device/role references and the per-session state a turn runs against.
// ABOUTME: A session lazily owns one ConversationLog and a tool binding table written once.

pub mod context;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::conversation::{Role, SharedConversation};
use crate::persistence::record::{created_at_key, device_path_segment};
use crate::tools::SessionTools;

pub use context::{SESSION_KEY, TIMESTAMP_KEY, TurnContext};

/// Shared, recoverable handle to a live session.
pub type SessionHandle = Arc<Session>;

/// The device a session talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub device_id: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl DeviceRef {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// The persona the assistant plays in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub role_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl RoleRef {
    pub fn new(role_id: i64, name: impl Into<String>) -> Self {
        Self {
            role_id,
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Reports speech-synthesis timings for the current turn.
pub trait SynthesisTiming: Send + Sync {
    /// Milliseconds from turn start to the first model output, if measured.
    fn first_completion_latency_ms(&self) -> Option<u32>;
}

/// One live dialogue between a device and a role.
pub struct Session {
    session_id: String,
    device: DeviceRef,
    role: RoleRef,
    supports_tools: bool,
    audio_dir: PathBuf,
    synthesis: Option<Arc<dyn SynthesisTiming>>,
    conversation: OnceCell<SharedConversation>,
    tools: OnceLock<SessionTools>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, device: DeviceRef, role: RoleRef) -> Self {
        Self {
            session_id: session_id.into(),
            device,
            role,
            supports_tools: true,
            audio_dir: PathBuf::from("audio"),
            synthesis: None,
            conversation: OnceCell::new(),
            tools: OnceLock::new(),
        }
    }

    /// Whether the session's model can be offered tools at all.
    pub fn with_tool_support(mut self, supported: bool) -> Self {
        self.supports_tools = supported;
        self
    }

    pub fn with_audio_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audio_dir = dir.into();
        self
    }

    pub fn with_synthesis_timing(mut self, timing: Arc<dyn SynthesisTiming>) -> Self {
        self.synthesis = Some(timing);
        self
    }

    pub fn into_handle(self) -> SessionHandle {
        Arc::new(self)
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

    pub fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    pub fn synthesis_timing(&self) -> Option<&Arc<dyn SynthesisTiming>> {
        self.synthesis.as_ref()
    }

    /// The session's log, if the first turn has created it.
    pub fn conversation(&self) -> Option<&SharedConversation> {
        self.conversation.get()
    }

    /// The session's log, created by `init` on first use.
    pub async fn conversation_or_init<F, Fut>(&self, init: F) -> &SharedConversation
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SharedConversation>,
    {
        self.conversation.get_or_init(init).await
    }

    /// External "new conversation" trigger.
    pub fn new_conversation(&self) {
        if let Some(log) = self.conversation.get() {
            crate::conversation::lock(log).clear();
        }
    }

    /// The tools bound to this session, once binding has happened.
    pub fn bound_tools(&self) -> Option<&SessionTools> {
        self.tools.get()
    }

    /// Write the binding table. Only the first call takes effect; returns
    /// whether this call performed the binding.
    pub fn bind_tools(&self, tools: SessionTools) -> bool {
        self.tools.set(tools).is_ok()
    }

    /// The binding table, writing `tools` if nothing was bound yet.
    pub fn bound_tools_or_init(&self, tools: SessionTools) -> &SessionTools {
        self.tools.get_or_init(|| tools)
    }

    /// Where the audio of a message is stored, by sender and creation time.
    pub fn audio_path(&self, sender: Role, created_at_millis: i64) -> PathBuf {
        audio_path_in(&self.audio_dir, &self.device.device_id, sender, created_at_millis)
    }
}

fn audio_path_in(dir: &Path, device_id: &str, sender: Role, created_at_millis: i64) -> PathBuf {
    dir.join(device_path_segment(device_id)).join(format!(
        "{}-{}.wav",
        created_at_key(created_at_millis),
        sender.as_str()
    ))
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("device", &self.device)
            .field("role", &self.role)
            .field("supports_tools", &self.supports_tools)
            .field("audio_dir", &self.audio_dir)
            .finish_non_exhaustive()
    }
}

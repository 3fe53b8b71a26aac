// ABOUTME: Shared test fixtures: a scripted model service, sample tools, and session/stack builders.
// ABOUTME: Used by the integration tests to drive whole turns deterministically.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use parley::conversation::{Message, ToolCall};
use parley::dialogue::{TurnObserver, TurnOrchestrator};
use parley::model::{Completion, CompletionStream, ModelRequest, ModelService};
use parley::persistence::{MemoryGateway, PersistenceQueue, QueueSettings};
use parley::session::{DeviceRef, RoleRef, Session, SessionHandle};
use parley::tools::{FunctionTool, Tool, ToolCatalog, ToolMetadata};

/// One scripted model reply.
pub enum Reply {
    Complete(Completion),
    Fail(String),
}

/// Model that plays back a fixed list of replies and records every request.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Vec<Message>>>,
    offered: Mutex<Vec<Vec<ToolMetadata>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            offered: Mutex::new(Vec::new()),
        })
    }

    /// Context messages of every call, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// Tool definitions offered with every call, in call order.
    pub fn offered_tools(&self) -> Vec<Vec<ToolMetadata>> {
        self.offered.lock().unwrap().clone()
    }

    fn next(&self, request: &ModelRequest) -> anyhow::Result<Completion> {
        self.requests.lock().unwrap().push(request.messages.clone());
        self.offered
            .lock()
            .unwrap()
            .push(request.options.tools.definitions());
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Complete(completion)) => Ok(completion),
            Some(Reply::Fail(reason)) => Err(anyhow::anyhow!(reason)),
            None => Err(anyhow::anyhow!("script exhausted")),
        }
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn call(&self, request: &ModelRequest) -> anyhow::Result<Completion> {
        self.next(request)
    }

    /// Streams the reply as one partial per character of text, with tool
    /// calls, termination and usage on the last partial.
    fn stream(self: Arc<Self>, request: ModelRequest) -> CompletionStream {
        let completion = match self.next(&request) {
            Ok(completion) => completion,
            Err(error) => return Box::pin(stream::iter(vec![Err(error)])),
        };
        let mut partials: Vec<anyhow::Result<Completion>> = completion
            .text
            .clone()
            .unwrap_or_default()
            .chars()
            .map(|c| Ok(Completion::text(c.to_string())))
            .collect();
        partials.push(Ok(Completion {
            text: None,
            ..completion
        }));
        Box::pin(stream::iter(partials))
    }
}

pub fn answer(text: &str) -> Reply {
    Reply::Complete(Completion::text(text).with_usage(12, 5))
}

pub fn call_tool(name: &str) -> Reply {
    Reply::Complete(
        Completion::tool_use(vec![ToolCall {
            id: format!("call-{}", name),
            name: name.to_string(),
            arguments: serde_json::json!({"city": "Porto"}),
        }])
        .with_usage(10, 2),
    )
}

/// Ordinary informational tool.
pub fn weather_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        ToolMetadata::new("get_weather", "Current weather for a city").with_schema(
            serde_json::json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            }),
        ),
        |args, _| {
            let city = args
                .get("city")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("somewhere");
            Ok(format!("{}: 21C and sunny", city))
        },
    ))
}

/// Control-plane tool whose exchange must not re-enter context.
pub fn end_chat_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        ToolMetadata::new("end_chat", "End the conversation when the user says goodbye")
            .with_returns_direct(true)
            .with_rollback(true),
        |_, _| Ok("Goodbye, talk soon!".to_string()),
    ))
}

pub fn session() -> SessionHandle {
    session_for("session-1", "aa:bb:cc:dd:ee:ff")
}

pub fn session_for(session_id: &str, device_id: &str) -> SessionHandle {
    Session::new(
        session_id,
        DeviceRef::new(device_id),
        RoleRef::new(3, "companion"),
    )
    .with_audio_dir("/var/audio")
    .into_handle()
}

/// A full stack over an in-memory gateway.
pub struct Stack {
    pub model: Arc<ScriptedModel>,
    pub gateway: Arc<MemoryGateway>,
    pub orchestrator: Arc<TurnOrchestrator>,
}

impl Stack {
    pub fn new(replies: Vec<Reply>) -> Self {
        let model = ScriptedModel::new(replies);
        let gateway = Arc::new(MemoryGateway::new());
        let queue = PersistenceQueue::start(gateway.clone(), QueueSettings::default());
        let orchestrator = TurnOrchestrator::new(model.clone(), TurnObserver::new(queue))
            .with_catalog(ToolCatalog::new(vec![weather_tool(), end_chat_tool()]));
        Self {
            model,
            gateway,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Wait for background persistence to settle.
    pub async fn settle(&self) {
        self.orchestrator.observer().queue().idle().await;
    }
}

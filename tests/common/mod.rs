//! Shared test doubles: a scripted turn backend and a recording dispatcher.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::Notify;
use turnstream::{
    ChatOptions, ChatSession, ConversationItem, ConversationState, ConversationStore, DONE_FRAME,
    Error, EventStream, Item, MemoryStore, Persona, Result, ToolDeclaration, ToolDispatcher,
    TurnBackend, TurnRequest, decode_events, encode_event, retry::RetryConfig,
};

static LOGGING: Once = Once::new();

/// Routes crate logs through the test harness; `RUST_LOG=turnstream=debug`
/// shows them.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// What the backend does for one turn request
pub enum Script {
    /// Stream these bytes, split into chunks of the given size
    Wire(String, usize),
    /// Stream these bytes, then never produce another chunk
    Stall(String),
    /// Fail to open the turn
    Reject(String),
}

#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn wait_for_requests(&self, count: usize) {
        for _ in 0..200 {
            if self.requests.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("backend never received {} requests", count);
    }
}

fn chunked(wire: String, size: usize) -> Vec<Result<Vec<u8>>> {
    wire.into_bytes()
        .chunks(size.max(1))
        .map(|c| Ok(c.to_vec()))
        .collect()
}

#[async_trait]
impl TurnBackend for ScriptedBackend {
    async fn open_turn(&self, request: &TurnRequest) -> Result<EventStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Wire(wire, size)) => Ok(decode_events(stream::iter(chunked(wire, size)))),
            Some(Script::Stall(wire)) => Ok(decode_events(
                stream::iter(chunked(wire, 5)).chain(stream::pending()),
            )),
            Some(Script::Reject(message)) => Err(Error::api(message)),
            None => Err(Error::api("HTTP 410: no scripted turn left")),
        }
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    Echo,
    Fail,
    Hang,
}

/// Records every dispatch and answers from a fixed outcome
pub struct RecordingDispatcher {
    pub calls: Mutex<Vec<(String, Value)>>,
    outcome: Outcome,
}

impl RecordingDispatcher {
    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            outcome,
        }
    }

    pub fn ok() -> Self {
        Self::with_outcome(Outcome::Echo)
    }

    pub fn failing() -> Self {
        Self::with_outcome(Outcome::Fail)
    }

    /// Never answers
    pub fn hanging() -> Self {
        Self::with_outcome(Outcome::Hang)
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn wait_for_calls(&self, count: usize) {
        for _ in 0..200 {
            if self.calls.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("dispatcher never received {} calls", count);
    }
}

#[async_trait]
impl ToolDispatcher for RecordingDispatcher {
    async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        match self.outcome {
            Outcome::Echo => Ok(json!({"ok": true, "echo": arguments})),
            Outcome::Fail => Err(Error::tool(format!("{} is broken", name))),
            Outcome::Hang => futures::future::pending().await,
        }
    }

    fn declarations(&self) -> Vec<ToolDeclaration> {
        vec![ToolDeclaration::Function {
            name: "get_weather".into(),
            description: "Weather lookup".into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        }]
    }
}

pub fn options() -> ChatOptions {
    ChatOptions::builder()
        .endpoint("http://localhost/turn")
        .persona(Persona::new("emily", "Emily", "You are Emily."))
        .persona(Persona::new("max", "Max", "You are Max."))
        .retry(RetryConfig::disabled())
        .idle_timeout(5)
        .max_tool_iterations(3)
        .build()
        .unwrap()
}

pub fn session(
    backend: Arc<ScriptedBackend>,
    dispatcher: Arc<RecordingDispatcher>,
) -> ChatSession {
    init_logging();
    ChatSession::new(options(), backend, Arc::new(MemoryStore::new()), dispatcher)
}

/// A [`MemoryStore`] whose first `set_chat_messages` waits for [`GatedStore::release`]
#[derive(Default)]
pub struct GatedStore {
    inner: MemoryStore,
    armed: AtomicBool,
    entered: Notify,
    released: Notify,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Resolves once a writer is parked at the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl ConversationStore for GatedStore {
    async fn get_state(&self, persona: &str) -> Result<ConversationState> {
        self.inner.get_state(persona).await
    }

    async fn set_chat_messages(&self, persona: &str, messages: Vec<Item>) -> Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
        self.inner.set_chat_messages(persona, messages).await
    }

    async fn set_conversation_items(
        &self,
        persona: &str,
        items: Vec<ConversationItem>,
    ) -> Result<()> {
        self.inner.set_conversation_items(persona, items).await
    }

    async fn set_last_response_id(&self, persona: &str, id: Option<String>) -> Result<()> {
        self.inner.set_last_response_id(persona, id).await
    }

    async fn set_thread_id(&self, persona: &str, id: Option<String>) -> Result<()> {
        self.inner.set_thread_id(persona, id).await
    }

    async fn clear_conversation(&self, persona: &str) -> Result<()> {
        self.inner.clear_conversation(persona).await
    }

    async fn clear_all(&self) -> Result<()> {
        self.inner.clear_all().await
    }

    async fn select_persona(&self, persona: &str) -> Result<Option<String>> {
        self.inner.select_persona(persona).await
    }

    async fn selected_persona(&self) -> Result<Option<String>> {
        self.inner.selected_persona().await
    }
}

// ----------------------------------------------------------------------------
// Wire builders
// ----------------------------------------------------------------------------

pub fn frame(event: &str, data: Value) -> String {
    encode_event(event, &data)
}

/// `response.created` plus a streamed assistant message, without terminator
pub fn text_frames(response_id: &str, item_id: &str, parts: &[&str]) -> String {
    let mut wire = frame("response.created", json!({"response": {"id": response_id}}));
    wire.push_str(&frame(
        "response.output_item.added",
        json!({"item": {"type": "message", "id": item_id, "content": []}}),
    ));
    for part in parts {
        wire.push_str(&frame(
            "response.output_text.delta",
            json!({"item_id": item_id, "delta": part}),
        ));
    }
    wire.push_str(&frame(
        "response.output_text.done",
        json!({"item_id": item_id, "text": parts.concat()}),
    ));
    wire
}

/// A whole text-only turn
pub fn text_turn(response_id: &str, item_id: &str, parts: &[&str]) -> String {
    let mut wire = text_frames(response_id, item_id, parts);
    wire.push_str(&frame("response.completed", json!({})));
    wire.push_str(DONE_FRAME);
    wire
}

/// A whole turn consisting of one function call
pub fn tool_turn(response_id: &str, item_id: &str, call_id: &str, fragments: &[&str]) -> String {
    let mut wire = frame("response.created", json!({"id": response_id}));
    wire.push_str(&frame(
        "response.output_item.added",
        json!({"item": {"type": "function_call", "id": item_id, "name": "get_weather", "call_id": call_id, "arguments": ""}}),
    ));
    for fragment in fragments {
        wire.push_str(&frame(
            "response.function_call_arguments.delta",
            json!({"item_id": item_id, "delta": fragment}),
        ));
    }
    wire.push_str(&frame(
        "response.function_call_arguments.done",
        json!({"item_id": item_id, "arguments": fragments.concat()}),
    ));
    wire.push_str(&frame("response.completed", json!({})));
    wire.push_str(DONE_FRAME);
    wire
}

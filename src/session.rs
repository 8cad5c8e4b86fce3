//! Chat sessions
//!
//! [`ChatSession`] ties the pieces together for a set of personas:
//!
//! ```text
//! user text ──► store ──► TurnRequest ──► TurnBackend ──► events
//!                 ▲                                         │
//!                 │                                   TurnReducer
//!                 │                                         │
//!                 └──── save ◄── continuation? ◄── ToolDispatcher
//! ```
//!
//! One user message can take several turns: whenever a turn dispatches a
//! function call successfully, another turn is scheduled carrying the tool
//! output. The chain runs as a loop, never by recursion, and stops at the first
//! turn without tool output, at the first error, or after
//! [`ChatOptions::max_tool_iterations`] continuations.
//!
//! At most one chain runs per persona. A second message for a busy persona is
//! rejected with [`Error::TurnInProgress`]. Selecting another persona
//! interrupts the chain of the previously selected one.

use crate::backend::{HttpBackend, TurnBackend, TurnRequest};
use crate::config::ChatOptions;
use crate::reducer::TurnReducer;
use crate::retry::retry_with_backoff;
use crate::sse::EventStream;
use crate::store::{ConversationStore, MemoryStore};
use crate::tools::ToolDispatcher;
use crate::types::{ConversationItem, ConversationState, Item, MessageItem, Role, is_response_id};
use crate::{Error, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};

/// Outcome of one user message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnSummary {
    /// Turns streamed, the first one included
    pub turns: u32,
    /// Function calls dispatched
    pub tool_calls: u32,
    /// True when the continuation limit stopped the chain
    pub truncated: bool,
}

enum Next {
    Done,
    Continue,
}

struct PersonaSlot {
    turn: Arc<Mutex<()>>,
    interrupt: watch::Sender<u64>,
}

impl PersonaSlot {
    fn new() -> Self {
        Self {
            turn: Arc::new(Mutex::new(())),
            interrupt: watch::channel(0).0,
        }
    }
}

/// Streams turns for a set of personas
pub struct ChatSession {
    options: ChatOptions,
    backend: Arc<dyn TurnBackend>,
    store: Arc<dyn ConversationStore>,
    tools: Arc<dyn ToolDispatcher>,
    slots: Mutex<HashMap<String, Arc<PersonaSlot>>>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    pub fn new(
        options: ChatOptions,
        backend: Arc<dyn TurnBackend>,
        store: Arc<dyn ConversationStore>,
        tools: Arc<dyn ToolDispatcher>,
    ) -> Self {
        Self {
            options,
            backend,
            store,
            tools,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Session over HTTP with in-memory storage.
    pub fn connect(options: ChatOptions, tools: Arc<dyn ToolDispatcher>) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&options)?);
        Ok(Self::new(options, backend, Arc::new(MemoryStore::new()), tools))
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub async fn state(&self, persona: &str) -> Result<ConversationState> {
        self.store.get_state(persona).await
    }

    /// Appends a user message and runs turns until the model stops calling
    /// tools.
    pub async fn send_user_message(&self, persona: &str, text: &str) -> Result<TurnSummary> {
        self.check_persona(persona)?;
        if text.trim().is_empty() {
            return Err(Error::invalid_input("message is empty"));
        }

        let slot = self.slot(persona).await;
        let mut interrupt = slot.interrupt.subscribe();
        let _guard = begin(&slot, persona)?;

        let mut state = self.store.get_state(persona).await?;
        state
            .chat_messages
            .push(Item::Message(MessageItem::user(text)));
        state
            .conversation_items
            .push(ConversationItem::message(Role::User, text));
        self.store
            .set_chat_messages(persona, state.chat_messages.clone())
            .await?;
        self.store
            .set_conversation_items(persona, state.conversation_items.clone())
            .await?;

        self.drive(persona, &mut interrupt, &mut state).await
    }

    /// Runs turns from the stored history without adding a message, e.g. to
    /// retry after a transport error.
    pub async fn run_turns(&self, persona: &str) -> Result<TurnSummary> {
        self.check_persona(persona)?;
        let slot = self.slot(persona).await;
        let mut interrupt = slot.interrupt.subscribe();
        let _guard = begin(&slot, persona)?;
        let mut state = self.store.get_state(persona).await?;
        self.drive(persona, &mut interrupt, &mut state).await
    }

    /// Selects `persona`, interrupting the previous persona's running turn.
    pub async fn select_persona(&self, persona: &str) -> Result<()> {
        self.check_persona(persona)?;
        let previous = self.store.select_persona(persona).await?;
        if let Some(previous) = previous.filter(|p| p != persona) {
            log::debug!("switching persona {} -> {}", previous, persona);
            self.interrupt(&previous).await;
        }
        Ok(())
    }

    pub async fn selected_persona(&self) -> Result<Option<String>> {
        self.store.selected_persona().await
    }

    /// Interrupts the running turn of `persona`, if any.
    pub async fn interrupt(&self, persona: &str) {
        let slot = self.slot(persona).await;
        slot.interrupt.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Interrupts and waits out any running turn, then empties the persona.
    pub async fn clear_conversation(&self, persona: &str) -> Result<()> {
        let slot = self.slot(persona).await;
        slot.interrupt.send_modify(|generation| *generation = generation.wrapping_add(1));
        let _guard = slot.turn.lock().await;
        self.store.clear_conversation(persona).await
    }

    /// Empties every persona.
    pub async fn clear_all(&self) -> Result<()> {
        let slots: Vec<Arc<PersonaSlot>> = self.slots.lock().await.values().cloned().collect();
        let mut guards = Vec::with_capacity(slots.len());
        for slot in &slots {
            slot.interrupt.send_modify(|generation| *generation = generation.wrapping_add(1));
            guards.push(slot.turn.clone().lock_owned().await);
        }
        self.store.clear_all().await
    }

    /// Request for the next turn of `persona`.
    ///
    /// The persona prompt leads as a `developer` item. The previous turn id is
    /// only passed along when it has the server's turn id shape.
    pub fn build_request(&self, persona: &str, state: &ConversationState) -> TurnRequest {
        let mut messages = Vec::with_capacity(state.conversation_items.len() + 1);
        if let Some(p) = self.options.persona(persona).filter(|p| !p.prompt.is_empty()) {
            messages.push(ConversationItem::message(Role::Developer, &p.prompt));
        }
        messages.extend(state.conversation_items.iter().cloned());

        let previous_response_id = state
            .last_response_id
            .clone()
            .filter(|id| is_response_id(id));

        TurnRequest {
            messages,
            tools: self.tools.declarations(),
            previous_response_id,
        }
    }

    /// Opens one turn, retrying transient failures.
    pub async fn open_turn(&self, request: &TurnRequest) -> Result<EventStream> {
        retry_with_backoff(&self.options.retry, "open turn", || {
            self.backend.open_turn(request)
        })
        .await
    }

    fn check_persona(&self, persona: &str) -> Result<()> {
        if self.options.personas.is_empty() || self.options.persona(persona).is_some() {
            Ok(())
        } else {
            Err(Error::config(format!("unknown persona '{}'", persona)))
        }
    }

    async fn slot(&self, persona: &str) -> Arc<PersonaSlot> {
        self.slots
            .lock()
            .await
            .entry(persona.to_string())
            .or_insert_with(|| Arc::new(PersonaSlot::new()))
            .clone()
    }

    // `interrupt` is subscribed before the persona lock is taken, so an
    // interrupt sent while the chain is being set up is still observed.
    async fn drive(
        &self,
        persona: &str,
        interrupt: &mut watch::Receiver<u64>,
        state: &mut ConversationState,
    ) -> Result<TurnSummary> {
        let mut summary = TurnSummary::default();

        loop {
            summary.turns += 1;
            log::debug!("starting turn {} for {}", summary.turns, persona);
            let outcome = self
                .run_turn(persona, state, interrupt, &mut summary)
                .await;

            let saved = self.store.save_turn(persona, state).await;
            if let (Err(e), Err(_)) = (&saved, &outcome) {
                log::warn!("failed to save aborted turn for {}: {}", persona, e);
            }
            let next = outcome?;
            saved?;

            match next {
                Next::Done => break,
                Next::Continue if summary.turns > self.options.max_tool_iterations => {
                    log::warn!(
                        "stopping {} after {} continuation turns",
                        persona,
                        summary.turns - 1
                    );
                    summary.truncated = true;
                    break;
                }
                Next::Continue => log::debug!("continuing {} with tool output", persona),
            }
        }

        log::debug!("{} finished: {:?}", persona, summary);
        Ok(summary)
    }

    async fn run_turn(
        &self,
        persona: &str,
        state: &mut ConversationState,
        interrupt: &mut watch::Receiver<u64>,
        summary: &mut TurnSummary,
    ) -> Result<Next> {
        let request = self.build_request(persona, state);
        let mut events = tokio::select! {
            biased;
            _ = interrupt.changed() => return Err(Error::Interrupted),
            opened = self.open_turn(&request) => opened?,
        };

        let mut reducer = TurnReducer::new();
        let mut next = Next::Done;
        let idle = self.options.idle_timeout();

        loop {
            let received = tokio::select! {
                biased;
                _ = interrupt.changed() => None,
                received = tokio::time::timeout(idle, events.next()) => Some(received),
            };

            let event = match received {
                None => {
                    log::debug!("turn for {} interrupted", persona);
                    reducer.abort(state);
                    return Err(Error::Interrupted);
                }
                Some(Err(_)) => {
                    log::warn!(
                        "turn for {} idle for {}s, giving up",
                        persona,
                        idle.as_secs()
                    );
                    reducer.abort(state);
                    return Err(Error::timeout());
                }
                Some(Ok(None)) => break,
                Some(Ok(Some(Err(e)))) => {
                    log::warn!("turn for {} failed: {}", persona, e);
                    reducer.abort(state);
                    return Err(e);
                }
                Some(Ok(Some(Ok(event)))) => event,
            };

            let invocation = match reducer.reduce(state, event) {
                Ok(Some(invocation)) => invocation,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("turn for {} failed: {}", persona, e);
                    reducer.abort(state);
                    return Err(e);
                }
            };

            summary.tool_calls += 1;
            log::debug!(
                "dispatching {} ({}) with {}",
                invocation.name,
                invocation.call_id,
                invocation.arguments
            );
            let dispatch = self
                .tools
                .dispatch(&invocation.name, invocation.arguments.clone());
            let dispatched = tokio::select! {
                biased;
                _ = interrupt.changed() => None,
                result = dispatch => Some(result),
            };
            let Some(dispatched) = dispatched else {
                log::debug!("turn for {} interrupted during {}", persona, invocation.name);
                reducer.abort(state);
                return Err(Error::Interrupted);
            };
            match dispatched {
                Ok(output) => {
                    reducer.record_output(state, &invocation, output.to_string());
                    next = Next::Continue;
                }
                Err(e) => {
                    log::warn!("tool {} failed: {}", invocation.name, e);
                    reducer.fail_tool(state, &invocation.item_id);
                    reducer.abort(state);
                    return Err(match e {
                        Error::Tool(_) => e,
                        other => Error::tool(format!("{}: {}", invocation.name, other)),
                    });
                }
            }
        }

        Ok(next)
    }
}

fn begin(slot: &PersonaSlot, persona: &str) -> Result<OwnedMutexGuard<()>> {
    slot.turn
        .clone()
        .try_lock_owned()
        .map_err(|_| Error::TurnInProgress(persona.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Persona;
    use crate::tools::{ToolDeclaration, ToolRegistry};
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl TurnBackend for Unreachable {
        async fn open_turn(&self, _request: &TurnRequest) -> Result<EventStream> {
            Err(Error::api("HTTP 404: no backend"))
        }
    }

    fn session() -> ChatSession {
        let options = ChatOptions::builder()
            .endpoint("http://localhost/turn")
            .persona(Persona::new("emily", "Emily", "You are Emily."))
            .persona(Persona::new("quiet", "Quiet", ""))
            .build()
            .unwrap();
        ChatSession::new(
            options,
            Arc::new(Unreachable),
            Arc::new(MemoryStore::new()),
            Arc::new(ToolRegistry::new().with_web_search()),
        )
    }

    #[test]
    fn test_build_request_leads_with_persona_prompt() {
        let session = session();
        let mut state = ConversationState::new();
        state
            .conversation_items
            .push(ConversationItem::message(Role::User, "hi"));
        state.last_response_id = Some("resp_7".into());

        let request = session.build_request("emily", &state);
        assert_eq!(
            request.messages,
            vec![
                ConversationItem::message(Role::Developer, "You are Emily."),
                ConversationItem::message(Role::User, "hi"),
            ]
        );
        assert_eq!(request.tools, vec![ToolDeclaration::WebSearch]);
        assert_eq!(request.previous_response_id.as_deref(), Some("resp_7"));
    }

    #[test]
    fn test_build_request_drops_foreign_previous_id() {
        let session = session();
        let state = ConversationState {
            last_response_id: Some("msg_1".into()),
            ..ConversationState::default()
        };
        let request = session.build_request("quiet", &state);
        assert!(request.messages.is_empty());
        assert!(request.previous_response_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_persona_rejected() {
        let session = session();
        let err = session.send_user_message("nobody", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_failed_open_keeps_user_message() {
        let session = session();
        let err = session.send_user_message("emily", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Api(_)));

        let state = session.state("emily").await.unwrap();
        assert_eq!(state.chat_messages.len(), 1);
        assert_eq!(state.conversation_items.len(), 1);
    }

    #[tokio::test]
    async fn test_busy_persona_rejected() {
        let session = session();
        let slot = session.slot("emily").await;
        let _held = begin(&slot, "emily").unwrap();
        let err = session.send_user_message("emily", "hi").await.unwrap_err();
        assert!(matches!(err, Error::TurnInProgress(ref p) if p == "emily"));
    }
}

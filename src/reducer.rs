//! Conversation reducer
//!
//! [`TurnReducer`] folds the events of one turn into a persona's
//! [`ConversationState`]. It never performs I/O: when a function call's
//! arguments are complete it hands back a [`ToolInvocation`] and the caller
//! decides what to do with it, reporting the outcome through
//! [`TurnReducer::record_output`] or [`TurnReducer::fail_tool`].
//!
//! A reducer lives for exactly one turn. Continuation turns get a fresh one.

use crate::events::{OutputItem, TurnEvent};
use crate::partial_json::ArgumentAccumulator;
use crate::types::{
    ContentItem, ConversationItem, ConversationState, Item, MessageItem, Role, ToolCallItem,
    ToolStatus, ToolType, is_response_id,
};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// A function call whose arguments are final and ready to dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Display id of the tool call
    pub item_id: String,
    pub name: String,
    /// Correlation id used when reporting the output back
    pub call_id: String,
    pub arguments: Value,
}

/// Per-turn reduction state
#[derive(Debug, Default)]
pub struct TurnReducer {
    message_contents: HashMap<String, String>,
    arguments: ArgumentAccumulator,
    /// Display ids created during this turn, in arrival order
    touched: Vec<String>,
    /// Message ids whose text has been finalized
    finalized: HashSet<String>,
}

impl TurnReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event.
    ///
    /// Returns the function call to dispatch, if this event completed one.
    /// Fails when the backend reports an error, or when the final argument
    /// string of a function call is not valid JSON; in the latter case the
    /// call has already been marked `failed`.
    pub fn reduce(
        &mut self,
        state: &mut ConversationState,
        event: TurnEvent,
    ) -> Result<Option<ToolInvocation>> {
        match event {
            TurnEvent::ResponseCreated { id } => {
                match id {
                    Some(id) if is_response_id(&id) => {
                        log::debug!("turn created: {}", id);
                        state.last_response_id = Some(id);
                    }
                    other => log::debug!("turn created without usable id: {:?}", other),
                }
                Ok(None)
            }
            TurnEvent::OutputTextDelta { item_id, delta } => {
                let text = self.message_contents.entry(item_id.clone()).or_default();
                text.push_str(&delta);
                let text = text.clone();
                self.set_message_text(state, &item_id, text);
                if state.last_response_id.is_none() {
                    state.last_response_id = Some(item_id);
                }
                Ok(None)
            }
            TurnEvent::AnnotationAdded {
                item_id,
                annotation,
            } => {
                match state.message_mut(&item_id) {
                    Some(msg) => {
                        if let Some(first) = msg.content.first() {
                            msg.content = vec![first.with_annotation(annotation)];
                        }
                    }
                    None => log::debug!("annotation for unknown message {}", item_id),
                }
                Ok(None)
            }
            TurnEvent::OutputItemAdded { item } => {
                self.add_item(state, item);
                Ok(None)
            }
            TurnEvent::FunctionCallArgumentsDelta { item_id, delta } => {
                let parsed = self.arguments.push(&item_id, &delta);
                match state.tool_call_mut(&item_id) {
                    Some(call) => {
                        call.arguments.push_str(&delta);
                        call.parsed_arguments = parsed.clone();
                    }
                    None => log::debug!("argument delta for unknown tool call {}", item_id),
                }
                Ok(None)
            }
            TurnEvent::FunctionCallArgumentsDone { item_id, arguments } => {
                self.finish_arguments(state, &item_id, arguments)
            }
            TurnEvent::OutputTextDone { item_id, text } => {
                self.message_contents.insert(item_id.clone(), text.clone());
                self.set_message_text(state, &item_id, text.clone());
                self.finalize_message(state, &item_id, text);
                Ok(None)
            }
            TurnEvent::WebSearchCallCompleted { item_id, output }
            | TurnEvent::FileSearchCallCompleted { item_id, output } => {
                match state.tool_call_mut(&item_id) {
                    Some(call) if call.tool_type == ToolType::FunctionCall => {
                        log::warn!("search completion names function call {}, ignored", item_id);
                    }
                    Some(call) => {
                        if let Some(output) = output {
                            call.set_output(output);
                        }
                        call.transition(ToolStatus::Completed);
                    }
                    None => log::debug!("completion for unknown search call {}", item_id),
                }
                Ok(None)
            }
            TurnEvent::ResponseCompleted => {
                let last = state
                    .last_message()
                    .filter(|m| m.role == Role::Assistant)
                    .map(|m| (m.id.clone(), m.text().to_string()));
                if let Some((id, text)) = last {
                    match id {
                        Some(id) => self.finalize_message(state, &id, text),
                        None => state
                            .conversation_items
                            .push(ConversationItem::assistant_from(None, text)),
                    }
                }
                log::debug!("turn completed");
                Ok(None)
            }
            TurnEvent::Error { message } => Err(Error::api(message)),
            TurnEvent::Unknown(kind) => {
                log::trace!("ignoring event {}", kind);
                Ok(None)
            }
        }
    }

    /// Records a successful dispatch and appends its `function_call_output`.
    pub fn record_output(
        &mut self,
        state: &mut ConversationState,
        invocation: &ToolInvocation,
        output: String,
    ) {
        let Some(call) = state.tool_call_mut(&invocation.item_id) else {
            log::warn!("output for unknown tool call {}", invocation.item_id);
            return;
        };
        if !call.transition(ToolStatus::Completed) {
            return;
        }
        call.set_output(output.clone());
        state.conversation_items.push(ConversationItem::function_call_output(
            invocation.call_id.clone(),
            output,
        ));
    }

    /// Marks a tool call as failed.
    pub fn fail_tool(&mut self, state: &mut ConversationState, item_id: &str) {
        if let Some(call) = state.tool_call_mut(item_id) {
            call.transition(ToolStatus::Failed);
        }
    }

    /// Abandons the turn.
    ///
    /// Tool calls of this turn that never finished become `failed`, and history
    /// entries for messages whose text was never finalized are dropped. Display
    /// messages keep whatever text they received.
    pub fn abort(&mut self, state: &mut ConversationState) {
        for id in &self.touched {
            if let Some(call) = state.tool_call_mut(id) {
                if !call.status.is_terminal() {
                    call.transition(ToolStatus::Failed);
                }
            }
        }

        let unfinished: HashSet<&str> = self
            .touched
            .iter()
            .map(String::as_str)
            .filter(|id| !self.finalized.contains(*id))
            .collect();
        state
            .conversation_items
            .retain(|item| item.source_id().is_none_or(|id| !unfinished.contains(id)));

        self.arguments.clear();
        self.message_contents.clear();
        log::debug!("turn aborted, {} items touched", self.touched.len());
    }

    fn add_item(&mut self, state: &mut ConversationState, item: OutputItem) {
        match item {
            OutputItem::Message { id, content } => {
                let text = content
                    .into_iter()
                    .next()
                    .and_then(|c| c.text)
                    .unwrap_or_default();
                // The announced text only seeds the display; deltas replace it.
                if let Some(id) = &id {
                    self.touched.push(id.clone());
                }
                let exists = id.as_deref().is_some_and(|id| state.message_mut(id).is_some());
                if !exists {
                    state.chat_messages.push(Item::Message(MessageItem {
                        role: Role::Assistant,
                        id: id.clone(),
                        content: vec![ContentItem::output_text(text.clone())],
                    }));
                }
                state
                    .conversation_items
                    .push(ConversationItem::assistant_from(id, text));
            }
            OutputItem::FunctionCall { id, name, call_id } => {
                log::debug!("function call {} announced: {:?}", id, name);
                self.touched.push(id.clone());
                state
                    .chat_messages
                    .push(Item::ToolCall(ToolCallItem::function_call(id, name, call_id)));
            }
            OutputItem::WebSearchCall { id, status } => {
                self.add_hosted(state, ToolType::WebSearchCall, id, status);
            }
            OutputItem::FileSearchCall { id, status } => {
                self.add_hosted(state, ToolType::FileSearchCall, id, status);
            }
            OutputItem::Unsupported => log::trace!("ignoring unsupported output item"),
        }
    }

    fn add_hosted(
        &mut self,
        state: &mut ConversationState,
        tool_type: ToolType,
        id: String,
        status: Option<String>,
    ) {
        let status = match status.as_deref().map(ToolStatus::parse) {
            Some(Some(status)) => status,
            Some(None) => {
                log::warn!("unknown status {:?} for {}, assuming in_progress", status, id);
                ToolStatus::InProgress
            }
            None => ToolStatus::InProgress,
        };
        self.touched.push(id.clone());
        state
            .chat_messages
            .push(Item::ToolCall(ToolCallItem::hosted(tool_type, id, status)));
    }

    fn finish_arguments(
        &mut self,
        state: &mut ConversationState,
        item_id: &str,
        arguments: String,
    ) -> Result<Option<ToolInvocation>> {
        let parsed = self.arguments.finalize(item_id, &arguments);
        let Some(call) = state.tool_call_mut(item_id) else {
            log::warn!("arguments done for unknown tool call {}", item_id);
            return Ok(None);
        };
        if call.status.is_terminal() {
            log::warn!("arguments done for finished tool call {}", item_id);
            return Ok(None);
        }

        call.arguments = arguments;
        let name = call.name.clone().unwrap_or_default();
        let parsed = match parsed {
            Ok(value) => value,
            Err(e) => {
                log::warn!("invalid final arguments for {} ({}): {}", name, item_id, e);
                call.transition(ToolStatus::Failed);
                return Err(Error::tool_arguments(name, e.to_string()));
            }
        };
        call.parsed_arguments = parsed.clone();

        if name.is_empty() {
            call.transition(ToolStatus::Failed);
            return Err(Error::tool(format!("function call {} has no name", item_id)));
        }
        let call_id = match &call.call_id {
            Some(call_id) => call_id.clone(),
            None => {
                log::warn!("function call {} has no call_id, using its item id", item_id);
                item_id.to_string()
            }
        };

        Ok(Some(ToolInvocation {
            item_id: item_id.to_string(),
            name,
            call_id,
            arguments: parsed,
        }))
    }

    // Every update swaps in a new content item.
    fn set_message_text(&mut self, state: &mut ConversationState, item_id: &str, text: String) {
        match state.message_mut(item_id) {
            Some(msg) => {
                let content = match msg.content.first() {
                    Some(first) => first.with_text(text),
                    None => ContentItem::output_text(text),
                };
                msg.content = vec![content];
            }
            None => {
                self.touched.push(item_id.to_string());
                state
                    .chat_messages
                    .push(Item::Message(MessageItem::assistant(item_id, text)));
            }
        }
    }

    // Updates the history entry derived from `item_id`, or appends one.
    fn finalize_message(&mut self, state: &mut ConversationState, item_id: &str, text: String) {
        self.finalized.insert(item_id.to_string());
        let existing = state.conversation_items.iter_mut().find_map(|item| match item {
            ConversationItem::Message(m) if m.source_id.as_deref() == Some(item_id) => Some(m),
            _ => None,
        });
        match existing {
            Some(entry) => entry.content = text,
            None => state
                .conversation_items
                .push(ConversationItem::assistant_from(Some(item_id.to_string()), text)),
        }
    }
}

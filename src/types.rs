//! Conversation data model
//!
//! Two parallel representations of one conversation live here:
//!
//! - [`Item`]: what the user sees. Messages and tool calls in arrival order,
//!   including partial states while a turn is still streaming.
//! - [`ConversationItem`]: what the backend receives as input on the next turn.
//!   Only finalized content ends up here.
//!
//! Both are owned by [`ConversationState`], one instance per persona.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of server-assigned turn identifiers that can be used for threading.
pub const RESPONSE_ID_PREFIX: &str = "resp_";

/// Returns true if `id` has the shape of a server turn identifier.
pub fn is_response_id(id: &str) -> bool {
    id.starts_with(RESPONSE_ID_PREFIX)
}

/// Message role in the conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

/// Kind of a single content piece
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    InputText,
    OutputText,
    Refusal,
    OutputAudio,
}

/// Citation or file reference attached to output text. Opaque to the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Annotation(pub Value);

/// One discrete piece of message content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<Annotation>>,
}

impl ContentItem {
    pub fn output_text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::OutputText,
            text: Some(text.into()),
            annotations: None,
        }
    }

    pub fn input_text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::InputText,
            text: Some(text.into()),
            annotations: None,
        }
    }

    /// Builds a fresh `output_text` item carrying `text` and this item's annotations.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::OutputText,
            text: Some(text.into()),
            annotations: self.annotations.clone(),
        }
    }

    /// Builds a fresh item with `annotation` appended.
    pub fn with_annotation(&self, annotation: Annotation) -> Self {
        let mut annotations = self.annotations.clone().unwrap_or_default();
        annotations.push(annotation);
        Self {
            kind: self.kind,
            text: self.text.clone(),
            annotations: Some(annotations),
        }
    }
}

/// A displayable message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageItem {
    pub role: Role,
    /// Server-assigned item id. Absent for locally authored messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: Vec<ContentItem>,
}

impl MessageItem {
    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            id: Some(id.into()),
            content: vec![ContentItem::output_text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            id: None,
            content: vec![ContentItem::input_text(text)],
        }
    }

    /// Text of the first content item, or "" when there is none.
    pub fn text(&self) -> &str {
        self.content
            .first()
            .and_then(|c| c.text.as_deref())
            .unwrap_or("")
    }
}

/// Which kind of tool the model invoked
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    FunctionCall,
    WebSearchCall,
    FileSearchCall,
}

/// Tool call lifecycle
///
/// ```text
/// in_progress ──► searching ──► completed
///      │              │
///      ├──────────────┴───────► failed
///      └──────────────────────► completed
/// ```
///
/// `completed` and `failed` are terminal. Function calls never pass through
/// `searching`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    InProgress,
    Searching,
    Completed,
    Failed,
}

impl ToolStatus {
    /// Parses a wire status string. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(ToolStatus::InProgress),
            "searching" => Some(ToolStatus::Searching),
            "completed" => Some(ToolStatus::Completed),
            "failed" => Some(ToolStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Failed)
    }
}

/// A displayable tool call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallItem {
    pub tool_type: ToolType,
    pub status: ToolStatus,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Raw argument text, append-only while streaming.
    #[serde(default)]
    pub arguments: String,
    /// Best-effort decode of `arguments`. May lag behind or be partial.
    #[serde(default, rename = "parsedArguments")]
    pub parsed_arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ToolCallItem {
    pub fn function_call(id: impl Into<String>, name: Option<String>, call_id: Option<String>) -> Self {
        Self {
            tool_type: ToolType::FunctionCall,
            status: ToolStatus::InProgress,
            id: id.into(),
            name,
            call_id,
            arguments: String::new(),
            parsed_arguments: Value::Object(serde_json::Map::new()),
            output: None,
        }
    }

    pub fn hosted(tool_type: ToolType, id: impl Into<String>, status: ToolStatus) -> Self {
        Self {
            tool_type,
            status,
            id: id.into(),
            name: None,
            call_id: None,
            arguments: String::new(),
            parsed_arguments: Value::Null,
            output: None,
        }
    }

    /// Moves to `to` unless the call already reached a terminal status, or
    /// `to` is `searching` for a function call.
    ///
    /// Returns false when the transition was refused.
    pub fn transition(&mut self, to: ToolStatus) -> bool {
        let searching_function =
            self.tool_type == ToolType::FunctionCall && to == ToolStatus::Searching;
        if self.status.is_terminal() || searching_function {
            log::warn!(
                "ignoring status change {:?} -> {:?} for tool call {}",
                self.status,
                to,
                self.id
            );
            return false;
        }
        self.status = to;
        true
    }

    /// Records the tool output. Output is set once only.
    pub fn set_output(&mut self, output: impl Into<String>) -> bool {
        if self.output.is_some() {
            log::warn!("tool call {} already has an output", self.id);
            return false;
        }
        self.output = Some(output.into());
        true
    }
}

/// Entry of the display list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Message(MessageItem),
    ToolCall(ToolCallItem),
}

impl Item {
    pub fn id(&self) -> Option<&str> {
        match self {
            Item::Message(m) => m.id.as_deref(),
            Item::ToolCall(t) => Some(&t.id),
        }
    }

    pub fn as_message(&self) -> Option<&MessageItem> {
        match self {
            Item::Message(m) => Some(m),
            Item::ToolCall(_) => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallItem> {
        match self {
            Item::ToolCall(t) => Some(t),
            Item::Message(_) => None,
        }
    }
}

/// Marker serialised as `"type": "function_call_output"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FunctionCallOutputKind {
    #[default]
    #[serde(rename = "function_call_output")]
    FunctionCallOutput,
}

/// Tool result reported back to the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCallOutput {
    #[serde(rename = "type")]
    pub kind: FunctionCallOutputKind,
    pub call_id: String,
    pub status: ToolStatus,
    pub output: String,
}

/// Role/content pair in backend input shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    /// Display item this entry was derived from. Never sent.
    #[serde(skip)]
    pub source_id: Option<String>,
}

/// Durable, backend-shaped history entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConversationItem {
    FunctionCallOutput(FunctionCallOutput),
    Message(ConversationMessage),
}

impl ConversationItem {
    pub fn message(role: Role, content: impl Into<String>) -> Self {
        ConversationItem::Message(ConversationMessage {
            role,
            content: content.into(),
            source_id: None,
        })
    }

    pub fn assistant_from(source_id: Option<String>, content: impl Into<String>) -> Self {
        ConversationItem::Message(ConversationMessage {
            role: Role::Assistant,
            content: content.into(),
            source_id,
        })
    }

    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ConversationItem::FunctionCallOutput(FunctionCallOutput {
            kind: FunctionCallOutputKind::FunctionCallOutput,
            call_id: call_id.into(),
            status: ToolStatus::Completed,
            output: output.into(),
        })
    }

    pub fn source_id(&self) -> Option<&str> {
        match self {
            ConversationItem::Message(m) => m.source_id.as_deref(),
            ConversationItem::FunctionCallOutput(_) => None,
        }
    }
}

/// Per-persona conversation container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub chat_messages: Vec<Item>,
    pub conversation_items: Vec<ConversationItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the first display item with `id`, of any kind.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.chat_messages.iter().position(|m| m.id() == Some(id))
    }

    /// First message with `id`.
    pub fn message_mut(&mut self, id: &str) -> Option<&mut MessageItem> {
        self.chat_messages.iter_mut().find_map(|m| match m {
            Item::Message(msg) if msg.id.as_deref() == Some(id) => Some(msg),
            _ => None,
        })
    }

    /// The display item first matching `id`, if it is a tool call.
    pub fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCallItem> {
        let idx = self.position(id)?;
        match &mut self.chat_messages[idx] {
            Item::ToolCall(t) => Some(t),
            Item::Message(_) => None,
        }
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCallItem> {
        let idx = self.position(id)?;
        self.chat_messages[idx].as_tool_call()
    }

    /// Last display item, if it is a message.
    pub fn last_message(&self) -> Option<&MessageItem> {
        self.chat_messages.last().and_then(Item::as_message)
    }
}

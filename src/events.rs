//! Typed turn events
//!
//! Every frame on the wire carries an envelope `{event, data}`. The envelope is
//! decoded exactly once, here, into the closed [`TurnEvent`] union; nothing past
//! this point inspects raw JSON to find out what kind of event it holds.

use crate::types::Annotation;
use serde::Deserialize;
use serde_json::Value;

/// Raw `{event, data}` envelope as sent by the turn endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Item announced by `response.output_item.added`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    FunctionCall {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        call_id: Option<String>,
    },
    WebSearchCall {
        id: String,
        #[serde(default)]
        status: Option<String>,
    },
    FileSearchCall {
        id: String,
        #[serde(default)]
        status: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

/// Content piece inside an announced message item
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OutputContent {
    #[serde(default)]
    pub text: Option<String>,
}

/// One event of a streamed turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// `response.created`
    ResponseCreated { id: Option<String> },
    /// `response.output_text.delta`
    OutputTextDelta { item_id: String, delta: String },
    /// `response.output_text.annotation.added`
    AnnotationAdded {
        item_id: String,
        annotation: Annotation,
    },
    /// `response.output_item.added`
    OutputItemAdded { item: OutputItem },
    /// `response.function_call_arguments.delta`
    FunctionCallArgumentsDelta { item_id: String, delta: String },
    /// `response.function_call_arguments.done`
    FunctionCallArgumentsDone { item_id: String, arguments: String },
    /// `response.output_text.done`
    OutputTextDone { item_id: String, text: String },
    /// `response.web_search_call.completed`
    WebSearchCallCompleted {
        item_id: String,
        output: Option<String>,
    },
    /// `response.file_search_call.completed`
    FileSearchCallCompleted {
        item_id: String,
        output: Option<String>,
    },
    /// `response.completed`
    ResponseCompleted,
    /// `error`, emitted by the endpoint when its upstream fails mid-stream
    Error { message: String },
    /// Any other event kind. Ignored by the reducer.
    Unknown(String),
}

#[derive(Deserialize)]
struct TextDelta {
    item_id: String,
    #[serde(default)]
    delta: String,
}

#[derive(Deserialize)]
struct AnnotationPayload {
    item_id: String,
    annotation: Annotation,
}

#[derive(Deserialize)]
struct ItemAddedPayload {
    item: OutputItem,
}

#[derive(Deserialize)]
struct ArgumentsDone {
    item_id: String,
    arguments: String,
}

#[derive(Deserialize)]
struct TextDone {
    item_id: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct SearchCompleted {
    item_id: String,
    #[serde(default)]
    output: Option<Value>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

impl TurnEvent {
    /// Decodes an envelope into its typed event.
    ///
    /// Fails only when a known event kind carries a payload of the wrong shape.
    pub fn from_envelope(envelope: Envelope) -> serde_json::Result<Self> {
        let Envelope { event, data } = envelope;
        let decoded = match event.as_str() {
            "response.created" => TurnEvent::ResponseCreated {
                id: response_id(&data),
            },
            "response.output_text.delta" => {
                let p: TextDelta = serde_json::from_value(data)?;
                TurnEvent::OutputTextDelta {
                    item_id: p.item_id,
                    delta: p.delta,
                }
            }
            "response.output_text.annotation.added" => {
                let p: AnnotationPayload = serde_json::from_value(data)?;
                TurnEvent::AnnotationAdded {
                    item_id: p.item_id,
                    annotation: p.annotation,
                }
            }
            "response.output_item.added" => {
                let p: ItemAddedPayload = serde_json::from_value(data)?;
                TurnEvent::OutputItemAdded { item: p.item }
            }
            "response.function_call_arguments.delta" => {
                let p: TextDelta = serde_json::from_value(data)?;
                TurnEvent::FunctionCallArgumentsDelta {
                    item_id: p.item_id,
                    delta: p.delta,
                }
            }
            "response.function_call_arguments.done" => {
                let p: ArgumentsDone = serde_json::from_value(data)?;
                TurnEvent::FunctionCallArgumentsDone {
                    item_id: p.item_id,
                    arguments: p.arguments,
                }
            }
            "response.output_text.done" => {
                let p: TextDone = serde_json::from_value(data)?;
                TurnEvent::OutputTextDone {
                    item_id: p.item_id,
                    text: p.text,
                }
            }
            "response.web_search_call.completed" => {
                let p: SearchCompleted = serde_json::from_value(data)?;
                TurnEvent::WebSearchCallCompleted {
                    item_id: p.item_id,
                    output: p.output.map(stringify_output),
                }
            }
            "response.file_search_call.completed" => {
                let p: SearchCompleted = serde_json::from_value(data)?;
                TurnEvent::FileSearchCallCompleted {
                    item_id: p.item_id,
                    output: p.output.map(stringify_output),
                }
            }
            "response.completed" => TurnEvent::ResponseCompleted,
            "error" => {
                let p: ErrorPayload = serde_json::from_value(data)?;
                TurnEvent::Error {
                    message: p
                        .message
                        .unwrap_or_else(|| "Stream error occurred".to_string()),
                }
            }
            _ => TurnEvent::Unknown(event),
        };
        Ok(decoded)
    }

    /// Wire name of the event kind
    pub fn kind(&self) -> &str {
        match self {
            TurnEvent::ResponseCreated { .. } => "response.created",
            TurnEvent::OutputTextDelta { .. } => "response.output_text.delta",
            TurnEvent::AnnotationAdded { .. } => "response.output_text.annotation.added",
            TurnEvent::OutputItemAdded { .. } => "response.output_item.added",
            TurnEvent::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
            TurnEvent::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            TurnEvent::OutputTextDone { .. } => "response.output_text.done",
            TurnEvent::WebSearchCallCompleted { .. } => "response.web_search_call.completed",
            TurnEvent::FileSearchCallCompleted { .. } => "response.file_search_call.completed",
            TurnEvent::ResponseCompleted => "response.completed",
            TurnEvent::Error { .. } => "error",
            TurnEvent::Unknown(kind) => kind,
        }
    }
}

// The endpoint forwards upstream events verbatim, so the id sits either at the
// top level or under `response`.
fn response_id(data: &Value) -> Option<String> {
    data.get("id")
        .or_else(|| data.get("response").and_then(|r| r.get("id")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn stringify_output(output: Value) -> String {
    match output {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

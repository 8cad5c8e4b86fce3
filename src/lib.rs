//! # turnstream
//!
//! Streaming chat-turn client core: decode a server-sent turn, fold its events
//! into per-persona conversation state, run the tools the model asks for, and
//! keep going until a turn ends without pending tool calls.
//!
//! ## Pipeline
//!
//! ```text
//! bytes ──► FrameDecoder ──► parse_frame ──► TurnEvent ──► TurnReducer ──► ConversationState
//!                                                              │
//!                                                   ToolInvocation ──► ToolDispatcher
//! ```
//!
//! - **Frames**: `data: {"event": ..., "data": ...}\n\n`, ended by
//!   `data: [DONE]\n\n`. Chunk boundaries may fall anywhere, even inside a
//!   delimiter or a multi-byte character.
//! - **Events**: each envelope is decoded once into the closed [`TurnEvent`]
//!   union. Malformed frames are logged and skipped.
//! - **Arguments**: function-call arguments stream as JSON fragments and are
//!   parsed incrementally by [`PartialJson`]; the final string is parsed
//!   strictly.
//! - **State**: [`TurnReducer`] keeps the display list (`chat_messages`) and
//!   the backend history (`conversation_items`) consistent.
//! - **Sessions**: [`ChatSession`] runs one chain of turns per persona at a
//!   time and feeds tool outputs back as continuation turns.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use turnstream::{tool, ChatOptions, ChatSession, Persona, ToolRegistry};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> turnstream::Result<()> {
//!     let options = ChatOptions::builder()
//!         .endpoint("http://localhost:3000/api/turn_response")
//!         .persona(Persona::new("guide", "Guide", "You are a concise travel guide."))
//!         .build()?;
//!
//!     let tools = ToolRegistry::new().with_tool(
//!         tool("get_weather", "Current weather for a city")
//!             .param("city", "string")
//!             .build(|args| async move { Ok(json!({"city": args["city"], "temp": 21})) }),
//!     );
//!
//!     let session = ChatSession::connect(options, Arc::new(tools))?;
//!     let summary = session.send_user_message("guide", "Weather in Lisbon?").await?;
//!     println!("{} turns, {} tool calls", summary.turns, summary.tool_calls);
//!
//!     let state = session.state("guide").await?;
//!     if let Some(reply) = state.last_message() {
//!         println!("{}", reply.text());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! The crate logs through the `log` facade: `trace` for every decoded event,
//! `debug` for turn and tool lifecycle, `warn` for skipped frames, refused
//! status changes and tool failures. Install any logger, e.g. `env_logger`.

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Turn requests and the HTTP backend.
mod backend;

/// Session options, personas and environment helpers.
mod config;

/// The crate error type.
mod error;

/// Typed turn events decoded from wire envelopes.
mod events;

/// Incremental lenient JSON for streamed tool arguments.
mod partial_json;

/// Event reduction into conversation state.
mod reducer;

/// Multi-turn orchestration with tool continuation.
mod session;

/// Frame decoding and encoding for the streamed wire format.
mod sse;

/// Per-persona conversation storage.
mod store;

/// Tool declarations, registry and dispatch.
mod tools;

/// Conversation data model.
mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Retry utilities with exponential backoff and jitter.
pub mod retry;

// --- Sessions ---

pub use session::{ChatSession, TurnSummary};

// --- Configuration ---

pub use config::{
    ChatOptions, ChatOptionsBuilder, DEFAULT_ENDPOINT, Persona, get_api_key, get_endpoint,
};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Wire Format ---

pub use events::{Envelope, OutputContent, OutputItem, TurnEvent};
pub use sse::{
    DATA_PREFIX, DONE_FRAME, DONE_SENTINEL, EventStream, FrameDecoder, FrameOutcome,
    decode_events, encode_event, parse_frame,
};

// --- Reduction ---

pub use partial_json::{ArgumentAccumulator, PartialJson};
pub use reducer::{ToolInvocation, TurnReducer};

// --- Backend And Storage ---

pub use backend::{HttpBackend, TurnBackend, TurnRequest};
pub use store::{ConversationStore, MemoryStore};

// --- Tool System ---

pub use tools::{Tool, ToolBuilder, ToolDeclaration, ToolDispatcher, ToolRegistry, tool};

// --- Core Types ---

pub use types::{
    Annotation, ContentItem, ContentKind, ConversationItem, ConversationMessage,
    ConversationState, FunctionCallOutput, FunctionCallOutputKind, Item, MessageItem,
    RESPONSE_ID_PREFIX, Role, ToolCallItem, ToolStatus, ToolType, is_response_id,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Commonly used types. Import with `use turnstream::prelude::*;`.
pub mod prelude {
    pub use crate::{
        ChatOptions, ChatSession, ConversationState, ConversationStore, Error, Item,
        MemoryStore, Persona, Result, Tool, ToolDispatcher, ToolRegistry, TurnEvent,
        TurnSummary, tool,
    };
}

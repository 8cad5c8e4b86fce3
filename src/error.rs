//! Error types for turnstream
//!
//! Errors fall into three groups. Transport errors (`Http`, `Stream`, `Api`,
//! `Timeout`) end a turn without a tool call being blamed. Tool errors
//! (`Tool`, `ToolArguments`) mark the offending call failed and stop the
//! continuation chain. Everything else is rejected before a turn starts.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The connection to the turn endpoint failed
    #[error("transport failure: {0}")]
    Http(#[from] reqwest::Error),

    /// A request body could not be encoded
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Rejected `ChatOptions`
    #[error("invalid options: {0}")]
    Config(String),

    /// The endpoint answered with a non-success status, or streamed an
    /// `error` event
    #[error("turn endpoint error: {0}")]
    Api(String),

    /// The event stream ended before its terminator frame
    #[error("stream ended abnormally: {0}")]
    Stream(String),

    /// A dispatched tool call failed
    #[error("tool failed: {0}")]
    Tool(String),

    /// The final argument string of a tool call was not valid JSON
    #[error("invalid arguments for tool '{name}': {reason}")]
    ToolArguments { name: String, reason: String },

    #[error("persona '{0}' already has a turn in flight")]
    TurnInProgress(String),

    #[error("turn interrupted")]
    Interrupted,

    /// The request timed out, or the stream stayed silent past the idle
    /// timeout
    #[error("turn timed out")]
    Timeout,

    /// The caller passed something unusable, such as an empty message
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn tool_arguments(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ToolArguments {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Transport-class errors abort a turn without touching tool-call state.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Stream(_) | Error::Api(_) | Error::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_stream() {
        let err = Error::stream("no terminator");
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(err.to_string(), "stream ended abnormally: no terminator");
    }

    #[test]
    fn test_error_tool_arguments() {
        let err = Error::tool_arguments("get_weather", "EOF while parsing an object");
        assert_eq!(
            err.to_string(),
            "invalid arguments for tool 'get_weather': EOF while parsing an object"
        );
    }

    #[test]
    fn test_error_turn_in_progress() {
        let err = Error::TurnInProgress("emily".to_string());
        assert_eq!(err.to_string(), "persona 'emily' already has a turn in flight");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{\"a\":").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_transport_classification() {
        assert!(Error::stream("eof").is_transport());
        assert!(Error::api("HTTP 500: upstream").is_transport());
        assert!(Error::timeout().is_transport());
        assert!(!Error::tool("boom").is_transport());
        assert!(!Error::invalid_input("empty").is_transport());
        assert!(!Error::Interrupted.is_transport());
    }
}

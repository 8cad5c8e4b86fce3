//! Configuration for chat sessions
//!
//! [`ChatOptions`] is built with [`ChatOptions::builder`]. The endpoint and API
//! key can also come from the environment:
//!
//! - `TURNSTREAM_ENDPOINT`: turn endpoint URL
//! - `TURNSTREAM_API_KEY`: bearer token sent with each turn request
//!
//! ```rust,no_run
//! use turnstream::{get_endpoint, ChatOptions, Persona};
//!
//! # fn main() -> turnstream::Result<()> {
//! let options = ChatOptions::builder()
//!     .endpoint(get_endpoint(Some("http://localhost:3000/api/turn_response")))
//!     .persona(Persona::new("guide", "Guide", "You are a concise travel guide."))
//!     .max_tool_iterations(5)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::retry::RetryConfig;
use crate::{Error, Result};
use std::env;
use std::time::Duration;

/// Default turn endpoint for a locally running proxy.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/turn_response";

/// A character the user can talk to
///
/// The prompt is sent as a leading `developer` item on every turn for this
/// persona. It is not part of the stored conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub prompt: String,
}

impl Persona {
    pub fn new(id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// Session configuration
#[derive(Clone)]
pub struct ChatOptions {
    /// Turn endpoint URL
    pub endpoint: String,

    /// Bearer token, if the endpoint wants one
    pub api_key: Option<String>,

    /// Request timeout in seconds, covering the whole streamed response
    pub timeout: u64,

    /// Longest silence between two chunks, in seconds
    pub idle_timeout: u64,

    /// Upper bound on continuation turns triggered by one user message
    pub max_tool_iterations: u32,

    /// Retry policy for opening a turn request
    pub retry: RetryConfig,

    /// Known personas, in display order
    pub personas: Vec<Persona>,
}

impl std::fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptions")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field("retry", &self.retry)
            .field("personas", &format!("{} personas", self.personas.len()))
            .finish()
    }
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            timeout: 300,
            idle_timeout: 60,
            max_tool_iterations: 10,
            retry: RetryConfig::default(),
            personas: Vec::new(),
        }
    }
}

impl ChatOptions {
    pub fn builder() -> ChatOptionsBuilder {
        ChatOptionsBuilder::default()
    }

    pub fn persona(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}

/// Builder for [`ChatOptions`]
#[derive(Debug, Default)]
pub struct ChatOptionsBuilder {
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout: Option<u64>,
    idle_timeout: Option<u64>,
    max_tool_iterations: Option<u32>,
    retry: Option<RetryConfig>,
    personas: Vec<Persona>,
}

impl ChatOptionsBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn idle_timeout(mut self, seconds: u64) -> Self {
        self.idle_timeout = Some(seconds);
        self
    }

    pub fn max_tool_iterations(mut self, iterations: u32) -> Self {
        self.max_tool_iterations = Some(iterations);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn persona(mut self, persona: Persona) -> Self {
        self.personas.push(persona);
        self
    }

    pub fn personas(mut self, personas: Vec<Persona>) -> Self {
        self.personas.extend(personas);
        self
    }

    pub fn build(self) -> Result<ChatOptions> {
        let defaults = ChatOptions::default();

        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::config("endpoint is required"))?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(Error::config(format!(
                "endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }

        let timeout = self.timeout.unwrap_or(defaults.timeout);
        let idle_timeout = self.idle_timeout.unwrap_or(defaults.idle_timeout);
        if timeout == 0 || idle_timeout == 0 {
            return Err(Error::config("timeouts must be greater than zero"));
        }

        let mut seen = std::collections::HashSet::new();
        for persona in &self.personas {
            if persona.id.is_empty() {
                return Err(Error::config("persona id must not be empty"));
            }
            if !seen.insert(persona.id.as_str()) {
                return Err(Error::config(format!("duplicate persona '{}'", persona.id)));
            }
        }

        Ok(ChatOptions {
            endpoint,
            api_key: self.api_key.filter(|k| !k.is_empty()),
            timeout,
            idle_timeout,
            max_tool_iterations: self
                .max_tool_iterations
                .unwrap_or(defaults.max_tool_iterations),
            retry: self.retry.unwrap_or(defaults.retry),
            personas: self.personas,
        })
    }
}

/// Turn endpoint from `TURNSTREAM_ENDPOINT`, else `fallback`, else
/// [`DEFAULT_ENDPOINT`].
pub fn get_endpoint(fallback: Option<&str>) -> String {
    if let Ok(url) = env::var("TURNSTREAM_ENDPOINT") {
        return url;
    }
    fallback.unwrap_or(DEFAULT_ENDPOINT).to_string()
}

/// API key from `TURNSTREAM_API_KEY`.
pub fn get_api_key() -> Option<String> {
    env::var("TURNSTREAM_API_KEY").ok().filter(|k| !k.is_empty())
}

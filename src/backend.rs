//! Turn requests
//!
//! A [`TurnBackend`] issues one streaming request per turn and hands back the
//! decoded event stream. [`HttpBackend`] talks to a turn endpoint over HTTP;
//! tests substitute scripted backends.

use crate::config::ChatOptions;
use crate::sse::{EventStream, decode_events};
use crate::tools::ToolDeclaration;
use crate::types::ConversationItem;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Serialize;

/// Body of one turn request
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Full history, led by the persona prompt
    pub messages: Vec<ConversationItem>,
    pub tools: Vec<ToolDeclaration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

impl TurnRequest {
    /// JSON body as sent on the wire.
    pub fn to_body(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Opens streamed turns.
#[async_trait]
pub trait TurnBackend: Send + Sync {
    async fn open_turn(&self, request: &TurnRequest) -> Result<EventStream>;
}

/// [`TurnBackend`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(options: &ChatOptions) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(options.request_timeout())
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: options.endpoint.clone(),
            api_key: options.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TurnBackend for HttpBackend {
    async fn open_turn(&self, request: &TurnRequest) -> Result<EventStream> {
        log::debug!(
            "POST {} ({} items, {} tools, previous: {:?})",
            self.endpoint,
            request.messages.len(),
            request.tools.len(),
            request.previous_response_id
        );

        let mut builder = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.to_body()?);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout()
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                log::warn!("failed to read error response body: {}", e);
                "Unknown error (failed to read response body)".to_string()
            });
            return Err(Error::api(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        Ok(decode_events(response.bytes_stream().map_err(Error::Http)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = TurnRequest {
            messages: vec![
                ConversationItem::message(Role::Developer, "Be brief."),
                ConversationItem::message(Role::User, "hi"),
                ConversationItem::function_call_output("call_1", "42"),
            ],
            tools: vec![ToolDeclaration::WebSearch],
            previous_response_id: Some("resp_1".into()),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "messages": [
                    {"role": "developer", "content": "Be brief."},
                    {"role": "user", "content": "hi"},
                    {"type": "function_call_output", "call_id": "call_1", "status": "completed", "output": "42"}
                ],
                "tools": [{"type": "web_search_preview"}],
                "previousResponseId": "resp_1"
            })
        );
    }

    #[test]
    fn test_previous_id_omitted_when_absent() {
        let request = TurnRequest {
            messages: vec![],
            tools: vec![],
            previous_response_id: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("previousResponseId").is_none());
    }

    #[test]
    fn test_body_matches_serialized_request() {
        let request = TurnRequest {
            messages: vec![ConversationItem::message(Role::User, "hi")],
            tools: vec![],
            previous_response_id: None,
        };
        let body = request.to_body().unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            json!({"messages": [{"role": "user", "content": "hi"}], "tools": []})
        );
    }

    #[test]
    fn test_http_backend_from_options() {
        let options = ChatOptions::builder()
            .endpoint("http://localhost:3000/api/turn_response")
            .build()
            .unwrap();
        let backend = HttpBackend::new(&options).unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:3000/api/turn_response");
    }
}

//! Chat relay pipeline.
//!
//! One request runs resolve → submit → start run → transcode, strictly in
//! sequence:
//!
//! 1. [`ChatRelay::resolve_thread`] maps the session id to a provider
//!    thread, creating and caching one on a miss.
//! 2. [`ChatRelay::submit_message`] appends the user input to that thread.
//! 3. [`ChatRelay::start_run`] opens the provider's streaming run.
//! 4. [`transcode`] re-frames the run into the browser stream.
//!
//! Steps 1–3 fail with a [`RelayError`] before any response byte is sent.
//! Step 4 never fails; stream problems become in-band frames.

pub mod frames;
pub mod transcode;

pub use frames::RelayFrame;
pub use transcode::{Transcoder, transcode};

use std::convert::Infallible;
use std::num::FpCategory;
use std::sync::Arc;

use axum::body::Bytes;
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::assistants::{AssistantApi, RunStream};
use crate::cache::ThreadCache;
use crate::config::RelaySettings;
use crate::error::{RelayError, Result};

/// Inbound chat request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// User message. Usually a string, but any JSON value is forwarded.
    #[serde(default)]
    pub input: Option<Value>,
    /// Caller-chosen conversation key.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChatRequest {
    /// Parse a raw request body. Any malformed body is a validation error.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| RelayError::Validation(format!("Invalid request body: {e}")))
    }

    /// Content for the provider message. Falsy input (missing, `null`,
    /// `false`, `0`, `""`) becomes an empty string; anything else is sent as-is.
    pub fn message_content(&self) -> Value {
        match &self.input {
            None | Some(Value::Null | Value::Bool(false)) => Value::String(String::new()),
            Some(Value::Number(n)) if n.as_f64().map(f64::classify) == Some(FpCategory::Zero) => {
                Value::String(String::new())
            }
            Some(other) => other.clone(),
        }
    }
}

/// Relay between browser sessions and provider threads.
#[derive(Debug, Clone)]
pub struct ChatRelay {
    cache: Arc<dyn ThreadCache>,
    assistants: Arc<dyn AssistantApi>,
    settings: RelaySettings,
}

impl ChatRelay {
    pub fn new(
        cache: Arc<dyn ThreadCache>,
        assistants: Arc<dyn AssistantApi>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            cache,
            assistants,
            settings,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    fn api_key(&self) -> Result<&str> {
        self.settings
            .api_key
            .as_deref()
            .ok_or_else(|| RelayError::Configuration("OPENAI_API_KEY not set".to_string()))
    }

    /// Return the thread for `session_id`, creating and caching one on a miss.
    pub async fn resolve_thread(&self, session_id: Option<&str>) -> Result<String> {
        let api_key = self.api_key()?;
        let session_id = session_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RelayError::Validation("Session ID required".to_string()))?;

        if let Some(thread_id) = self.cache.get(session_id).await? {
            tracing::debug!(session_id = %session_id, thread_id = %thread_id, "Reusing cached thread");
            return Ok(thread_id);
        }

        let thread_id = self.assistants.create_thread(api_key).await?;
        self.cache
            .set(session_id, &thread_id, self.settings.thread_ttl)
            .await?;

        info!(
            name: "relay.thread.created",
            session_id = %session_id,
            thread_id = %thread_id,
            ttl_secs = self.settings.thread_ttl.as_secs(),
            "Created thread for session"
        );
        Ok(thread_id)
    }

    /// Append the user's message to the thread.
    pub async fn submit_message(&self, thread_id: &str, input: &Value) -> Result<()> {
        let api_key = self.api_key()?;
        self.assistants.add_message(api_key, thread_id, input).await
    }

    /// Start a streaming run of the configured assistant.
    pub async fn start_run(&self, thread_id: &str) -> Result<RunStream> {
        let api_key = self.api_key()?;
        self.assistants
            .create_run_stream(api_key, thread_id, &self.settings.assistant_id)
            .await
    }

    /// Run the whole pipeline for one request and return the browser stream.
    pub async fn open_stream(
        &self,
        request: ChatRequest,
    ) -> Result<impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static> {
        // Credential check comes first so a misconfigured deployment touches nothing.
        self.api_key()?;

        let thread_id = self.resolve_thread(request.session_id.as_deref()).await?;
        self.submit_message(&thread_id, &request.message_content()).await?;

        let run = self.start_run(&thread_id).await?;
        info!(name: "relay.run.started", thread_id = %thread_id, "Run stream opened");
        Ok(transcode(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camel_case_body() {
        let req = ChatRequest::from_body(br#"{"input":"hi","sessionId":"s1"}"#).unwrap();
        assert_eq!(req.input, Some(Value::from("hi")));
        assert_eq!(req.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_parse_missing_fields() {
        let req = ChatRequest::from_body(b"{}").unwrap();
        assert!(req.input.is_none());
        assert!(req.session_id.is_none());
    }

    #[test]
    fn test_falsy_input_becomes_empty_content() {
        for body in [
            "{}",
            r#"{"input":null}"#,
            r#"{"input":false}"#,
            r#"{"input":0}"#,
            r#"{"input":-0.0}"#,
            r#"{"input":""}"#,
        ] {
            let req = ChatRequest::from_body(body.as_bytes()).unwrap();
            assert_eq!(req.message_content(), Value::from(""), "{body}");
        }
    }

    #[test]
    fn test_non_string_input_forwarded() {
        let req = ChatRequest::from_body(br#"{"input":42,"sessionId":"s1"}"#).unwrap();
        assert_eq!(req.message_content(), Value::from(42));

        let req = ChatRequest::from_body(br#"{"input":[{"type":"text","text":"hi"}]}"#).unwrap();
        assert_eq!(
            req.message_content(),
            serde_json::json!([{"type": "text", "text": "hi"}])
        );
    }

    #[test]
    fn test_parse_garbage_is_validation_error() {
        let err = ChatRequest::from_body(b"not json").unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }
}

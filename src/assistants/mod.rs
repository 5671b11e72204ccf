//! Assistant provider API.
//!
//! The relay talks to the provider through three calls: create a thread,
//! append a user message, start a streaming run. [`AssistantApi`] is the
//! seam; [`AssistantsClient`] is the reqwest implementation for the OpenAI
//! Assistants (beta v1) endpoints.

pub mod client;

pub use client::AssistantsClient;

use std::pin::Pin;

use axum::body::Bytes;
use futures::Stream;
use serde_json::Value;

use crate::error::Result;

/// Raw byte chunks of a provider run stream, in arrival order.
pub type RunStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Calls the relay makes against the assistant provider.
///
/// Every call takes the bearer credential explicitly; the relay decides per
/// request whether one is configured.
#[async_trait::async_trait]
pub trait AssistantApi: Send + Sync + std::fmt::Debug {
    /// Create an empty thread and return its id.
    async fn create_thread(&self, api_key: &str) -> Result<String>;

    /// Append a `user` message to a thread. Content is sent as-is, empty or not.
    async fn add_message(&self, api_key: &str, thread_id: &str, content: &Value) -> Result<()>;

    /// Start a run with `stream: true` and hand back its body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RelayError::Upstream`] when the provider
    /// refuses the run before any bytes are streamed.
    async fn create_run_stream(
        &self,
        api_key: &str,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<RunStream>;
}

//! Assistant Relay
//!
//! A server-side relay between a browser chat UI and a hosted assistant API.
//! The browser never sees the provider credential: it posts a session id and
//! a message, and gets back a simplified server-sent-event stream of the
//! assistant's reply.
//!
//! # Architecture
//!
//! - **Server**: Axum endpoint `POST /api/chat`, streaming `text/event-stream`
//! - **Relay**: session → thread resolution, message submission, run start
//! - **Transcoder**: provider event stream → `data: {"delta": ...}` frames
//! - **Cache**: session → thread mapping with a time-to-live
//!
//! # Modules
//!
//! - [`assistants`]: provider API trait and reqwest client
//! - [`cache`]: thread cache trait and backends
//! - [`config`]: layered configuration
//! - [`error`]: tagged error type and HTTP mapping
//! - [`relay`]: the per-request pipeline and stream transcoder

pub mod assistants;
pub mod cache;
pub mod config;
pub mod error;
pub mod relay;
pub mod server;
pub mod telemetry;

use relay::ChatRelay;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Per-request relay pipeline.
    pub relay: Arc<ChatRelay>,
}

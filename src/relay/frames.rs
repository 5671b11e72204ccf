//! Downstream event frames.
//!
//! The browser reads a plain `text/event-stream` of `data:` lines. Three
//! shapes exist:
//!
//! ```text
//! data: {"delta":<provider delta payload>}
//!
//! data: {}
//!
//! data: {"error":"Stream error"}
//!
//! data: [DONE]
//! ```

use axum::body::Bytes;
use serde_json::{Value, json};

/// Terminal marker, both upstream and downstream.
pub const DONE_TOKEN: &str = "[DONE]";

/// One downstream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    /// Incremental assistant output, payload copied verbatim from upstream.
    /// `None` when the event had a `data` object without a `delta` key; the
    /// frame is still sent, as an empty object.
    Delta(Option<Value>),
    /// The upstream stream broke after headers were sent.
    Error,
    /// End of the run.
    Done,
}

impl RelayFrame {
    /// Render as a complete SSE event including the blank-line terminator.
    pub fn to_sse(&self) -> String {
        match self {
            Self::Delta(Some(delta)) => format!("data: {}\n\n", json!({ "delta": delta })),
            Self::Delta(None) => "data: {}\n\n".to_string(),
            Self::Error => format!("data: {}\n\n", json!({ "error": "Stream error" })),
            Self::Done => format!("data: {DONE_TOKEN}\n\n"),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.to_sse())
    }
}

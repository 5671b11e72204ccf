//! Error types for the relay.
//!
//! Every pipeline stage (resolver, submitter, initiator, transcoder) returns
//! a [`RelayError`]. The HTTP mapping is a function of the variant alone:
//! anything raised before streaming starts becomes one JSON 500 response,
//! anything raised after becomes an in-band error frame.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Upstream call that produced an [`RelayError::Upstream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOperation {
    /// `POST /threads`
    CreateThread,
    /// `POST /threads/{id}/messages`
    AddMessage,
    /// `POST /threads/{id}/runs`
    CreateRun,
}

impl std::fmt::Display for UpstreamOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::CreateThread => "Thread creation",
            Self::AddMessage => "Message addition",
            Self::CreateRun => "Run creation",
        };
        f.write_str(label)
    }
}

/// Main error type for relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Missing or invalid deployment configuration (e.g. no provider credential).
    #[error("{0}")]
    Configuration(String),

    /// The inbound request is unusable (bad body, missing session id).
    #[error("{0}")]
    Validation(String),

    /// The provider answered with a non-success status.
    #[error("{operation} failed: {status} {body}")]
    Upstream {
        /// Which call failed.
        operation: UpstreamOperation,
        /// HTTP status code returned by the provider.
        status: u16,
        /// Raw response body text.
        body: String,
    },

    /// Failure while reading the provider's event stream.
    #[error("Stream error: {0}")]
    StreamTranscode(String),

    /// The session cache backend failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Transport-level HTTP failure (connect, TLS, decode).
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, RelayError>;

/// JSON body returned for failures that happen before streaming starts.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    details: String,
}

impl RelayError {
    /// Status code for the pre-stream error response.
    ///
    /// Every variant maps to 500; the body's `details` carries the distinction.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_)
            | Self::Validation(_)
            | Self::Upstream { .. }
            | Self::StreamTranscode(_)
            | Self::Cache(_)
            | Self::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        tracing::error!(name: "relay.request.failed", error = %self, "API error");
        let status = self.status_code();
        let body = ErrorBody {
            error: "Internal server error",
            details: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

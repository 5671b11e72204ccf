use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::post,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::assistants::AssistantsClient;
use crate::cache;
use crate::config::{AppConfig, RelaySettings};
use crate::error::RelayError;
use crate::relay::{ChatRelay, ChatRequest};

/// Build the router. Split out from [`start_server`] so tests can drive it in-process.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(api_chat))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, settings: RelaySettings) -> anyhow::Result<()> {
    info!(
        name: "assistant.config.loaded",
        api_base = %config.assistant.api_base,
        assistant_id = %settings.assistant_id,
        cache = ?config.cache.provider,
        "Assistant configuration loaded"
    );
    if settings.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; every chat request will fail");
    }

    let cache = cache::from_config(&config.cache)?;
    let assistants = Arc::new(AssistantsClient::from_config(&config.assistant)?);
    let relay = Arc::new(ChatRelay::new(cache, assistants, settings));

    let app = router(AppState { relay });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/chat - Relay one user turn and stream the assistant's reply.
///
/// The body is parsed by hand rather than with `Json` so that a malformed or
/// oversized body gets the same 500 JSON shape as every other pre-stream failure.
async fn api_chat(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            return RelayError::Validation(format!("Invalid request body: {}", rejection.body_text()))
                .into_response();
        }
    };
    let request = match ChatRequest::from_body(&body) {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };

    tracing::info!(
        session_id = ?request.session_id,
        input_len = request.input.as_ref().and_then(serde_json::Value::as_str).map_or(0, str::len),
        "Received chat request"
    );

    match state.relay.open_stream(request).await {
        Ok(stream) => build_sse_response(Body::from_stream(stream)),
        Err(e) => e.into_response(),
    }
}

fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("x-accel-buffering", HeaderValue::from_static("no"));
    resp
}

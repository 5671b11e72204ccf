//! End-to-end tests for `POST /api/chat`.
//!
//! The router runs in-process under `axum-test`; the assistant provider is a
//! `wiremock` server; the cache is an in-memory store wrapped to count calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assistant_relay::AppState;
use assistant_relay::assistants::AssistantsClient;
use assistant_relay::cache::{MemoryThreadCache, ThreadCache};
use assistant_relay::config::RelaySettings;
use assistant_relay::error::Result;
use assistant_relay::relay::ChatRelay;
use assistant_relay::server::router;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "sk-test";
const ASSISTANT_ID: &str = "asst_test";
const DAY: Duration = Duration::from_secs(60 * 60 * 24);

// =============================================================================
// Test Utilities
// =============================================================================

/// Memory cache that records how often it is called and with which TTL.
#[derive(Debug, Default)]
struct CountingCache {
    inner: MemoryThreadCache,
    gets: AtomicUsize,
    sets: AtomicUsize,
    last_ttl: std::sync::Mutex<Option<Duration>>,
}

#[async_trait]
impl ThreadCache for CountingCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        *self.last_ttl.lock().unwrap() = Some(ttl);
        self.inner.set(key, value, ttl).await
    }
}

fn settings(api_key: Option<&str>, ttl: Duration) -> RelaySettings {
    RelaySettings {
        api_key: api_key.map(ToString::to_string),
        assistant_id: ASSISTANT_ID.to_string(),
        thread_ttl: ttl,
    }
}

fn test_server(upstream: &MockServer, cache: Arc<CountingCache>, settings: RelaySettings) -> TestServer {
    let assistants = Arc::new(AssistantsClient::new(&upstream.uri(), "assistants=v1").unwrap());
    let relay = Arc::new(ChatRelay::new(cache, assistants, settings));
    TestServer::new(router(AppState { relay })).unwrap()
}

fn delta_line(text: &str) -> String {
    format!(
        "data: {}\n",
        json!({"event": "thread.message.delta", "data": {"delta": text}})
    )
}

fn sse(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

async fn mount_thread(server: &MockServer, thread_id: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/threads"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("openai-beta", "assistants=v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": thread_id})))
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_message(server: &MockServer, thread_id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/threads/{thread_id}/messages")))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("openai-beta", "assistants=v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .mount(server)
        .await;
}

async fn mount_run(server: &MockServer, thread_id: &str, body: String) {
    Mock::given(method("POST"))
        .and(path(format!("/threads/{thread_id}/runs")))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("openai-beta", "assistants=v1"))
        .and(body_json(json!({"assistant_id": ASSISTANT_ID, "stream": true})))
        .respond_with(sse(body))
        .mount(server)
        .await;
}

fn hello_stream() -> String {
    format!("{}{}data: [DONE]\n", delta_line("Hel"), delta_line("lo"))
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_example_conversation() {
    let upstream = MockServer::start().await;
    mount_thread(&upstream, "thread_1", 1).await;
    mount_message(&upstream, "thread_1").await;
    mount_run(&upstream, "thread_1", hello_stream()).await;

    let cache = Arc::new(CountingCache::default());
    let server = test_server(&upstream, cache.clone(), settings(Some(API_KEY), DAY));

    let response = server
        .post("/api/chat")
        .json(&json!({"input": "hi", "sessionId": "s1"}))
        .await;

    response.assert_status_ok();
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache, no-transform");
    assert_eq!(
        response.text(),
        "data: {\"delta\":\"Hel\"}\n\ndata: {\"delta\":\"lo\"}\n\ndata: [DONE]\n\n"
    );

    assert_eq!(cache.sets.load(Ordering::SeqCst), 1);
    assert_eq!(*cache.last_ttl.lock().unwrap(), Some(DAY));
    assert_eq!(cache.inner.get("s1").await.unwrap().as_deref(), Some("thread_1"));
}

#[tokio::test]
async fn test_second_call_reuses_thread() {
    let upstream = MockServer::start().await;
    mount_thread(&upstream, "thread_1", 1).await;
    mount_message(&upstream, "thread_1").await;
    mount_run(&upstream, "thread_1", hello_stream()).await;

    let cache = Arc::new(CountingCache::default());
    let server = test_server(&upstream, cache.clone(), settings(Some(API_KEY), DAY));

    for input in ["first", "second"] {
        server
            .post("/api/chat")
            .json(&json!({"input": input, "sessionId": "s1"}))
            .await
            .assert_status_ok();
    }

    assert_eq!(cache.gets.load(Ordering::SeqCst), 2);
    assert_eq!(cache.sets.load(Ordering::SeqCst), 1);
    // MockServer verifies on drop that /threads was hit exactly once.
}

#[tokio::test]
async fn test_expired_mapping_creates_new_thread() {
    let upstream = MockServer::start().await;
    mount_thread(&upstream, "thread_1", 2).await;
    mount_message(&upstream, "thread_1").await;
    mount_run(&upstream, "thread_1", hello_stream()).await;

    let cache = Arc::new(CountingCache::default());
    let ttl = Duration::from_millis(50);
    let server = test_server(&upstream, cache.clone(), settings(Some(API_KEY), ttl));

    let body = json!({"input": "hi", "sessionId": "s1"});
    server.post("/api/chat").json(&body).await.assert_status_ok();
    tokio::time::sleep(Duration::from_millis(120)).await;
    server.post("/api/chat").json(&body).await.assert_status_ok();

    assert_eq!(cache.sets.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_input_sent_as_empty_message() {
    let upstream = MockServer::start().await;
    mount_thread(&upstream, "thread_1", 1).await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/messages"))
        .and(body_json(json!({"role": "user", "content": ""})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .expect(1)
        .mount(&upstream)
        .await;
    mount_run(&upstream, "thread_1", hello_stream()).await;

    let server = test_server(
        &upstream,
        Arc::new(CountingCache::default()),
        settings(Some(API_KEY), DAY),
    );

    server
        .post("/api/chat")
        .json(&json!({"sessionId": "s1"}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_non_string_input_forwarded_as_content() {
    let upstream = MockServer::start().await;
    mount_thread(&upstream, "thread_1", 1).await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/messages"))
        .and(body_json(json!({"role": "user", "content": 42})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .expect(1)
        .mount(&upstream)
        .await;
    mount_run(&upstream, "thread_1", hello_stream()).await;

    let server = test_server(
        &upstream,
        Arc::new(CountingCache::default()),
        settings(Some(API_KEY), DAY),
    );

    server
        .post("/api/chat")
        .json(&json!({"input": 42, "sessionId": "s1"}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_delta_event_without_delta_forwarded_as_empty_object() {
    let upstream = MockServer::start().await;
    mount_thread(&upstream, "thread_1", 1).await;
    mount_message(&upstream, "thread_1").await;
    let body = format!(
        "data: {}\n{}data: [DONE]\n",
        json!({"event": "thread.message.delta", "data": {"id": "msg_1"}}),
        delta_line("hi")
    );
    mount_run(&upstream, "thread_1", body).await;

    let server = test_server(
        &upstream,
        Arc::new(CountingCache::default()),
        settings(Some(API_KEY), DAY),
    );

    let response = server
        .post("/api/chat")
        .json(&json!({"input": "hi", "sessionId": "s1"}))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.text(),
        "data: {}\n\ndata: {\"delta\":\"hi\"}\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn test_done_synthesized_and_malformed_frames_skipped() {
    let upstream = MockServer::start().await;
    mount_thread(&upstream, "thread_1", 1).await;
    mount_message(&upstream, "thread_1").await;
    let body = format!(
        "event: thread.message.delta\n{}data: {{broken\n{}",
        delta_line("a"),
        delta_line("b")
    );
    mount_run(&upstream, "thread_1", body).await;

    let server = test_server(
        &upstream,
        Arc::new(CountingCache::default()),
        settings(Some(API_KEY), DAY),
    );

    let response = server
        .post("/api/chat")
        .json(&json!({"input": "hi", "sessionId": "s1"}))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.text(),
        "data: {\"delta\":\"a\"}\n\ndata: {\"delta\":\"b\"}\n\ndata: [DONE]\n\n"
    );
}

// =============================================================================
// Failures before streaming
// =============================================================================

#[tokio::test]
async fn test_missing_credential_makes_no_calls() {
    let upstream = MockServer::start().await;
    let cache = Arc::new(CountingCache::default());
    let server = test_server(&upstream, cache.clone(), settings(None, DAY));

    let response = server
        .post("/api/chat")
        .json(&json!({"input": "hi", "sessionId": "s1"}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["error"], "Internal server error");
    assert_eq!(body["details"], "OPENAI_API_KEY not set");

    assert!(upstream.received_requests().await.unwrap().is_empty());
    assert_eq!(cache.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_session_id() {
    let upstream = MockServer::start().await;
    let server = test_server(
        &upstream,
        Arc::new(CountingCache::default()),
        settings(Some(API_KEY), DAY),
    );

    for body in [json!({"input": "hi"}), json!({"input": "hi", "sessionId": ""})] {
        let response = server.post("/api/chat").json(&body).await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["details"], "Session ID required");
    }

    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unparseable_body() {
    let upstream = MockServer::start().await;
    let server = test_server(
        &upstream,
        Arc::new(CountingCache::default()),
        settings(Some(API_KEY), DAY),
    );

    let response = server.post("/api/chat").text("not json").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["error"], "Internal server error");
}

#[tokio::test]
async fn test_oversized_body_gets_json_error() {
    let upstream = MockServer::start().await;
    let cache = Arc::new(CountingCache::default());
    let server = test_server(&upstream, cache.clone(), settings(Some(API_KEY), DAY));

    let response = server
        .post("/api/chat")
        .json(&json!({"input": "x".repeat(2 * 1024 * 1024), "sessionId": "s1"}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["error"], "Internal server error");
    assert!(
        body["details"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request body"),
        "details: {}",
        body["details"]
    );

    assert!(upstream.received_requests().await.unwrap().is_empty());
    assert_eq!(cache.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_thread_creation_failure() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .expect(1)
        .mount(&upstream)
        .await;

    let cache = Arc::new(CountingCache::default());
    let server = test_server(&upstream, cache.clone(), settings(Some(API_KEY), DAY));

    let response = server
        .post("/api/chat")
        .json(&json!({"input": "hi", "sessionId": "s1"}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["details"], "Thread creation failed: 401 invalid key");
    assert_eq!(cache.sets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_message_failure_aborts_before_run() {
    let upstream = MockServer::start().await;
    mount_thread(&upstream, "thread_1", 1).await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string("run active"))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/runs"))
        .respond_with(sse(hello_stream()))
        .expect(0)
        .mount(&upstream)
        .await;

    let server = test_server(
        &upstream,
        Arc::new(CountingCache::default()),
        settings(Some(API_KEY), DAY),
    );

    let response = server
        .post("/api/chat")
        .json(&json!({"input": "hi", "sessionId": "s1"}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["details"], "Message addition failed: 400 run active");
}

#[tokio::test]
async fn test_run_creation_failure() {
    let upstream = MockServer::start().await;
    mount_thread(&upstream, "thread_1", 1).await;
    mount_message(&upstream, "thread_1").await;
    Mock::given(method("POST"))
        .and(path("/threads/thread_1/runs"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such assistant"))
        .mount(&upstream)
        .await;

    let server = test_server(
        &upstream,
        Arc::new(CountingCache::default()),
        settings(Some(API_KEY), DAY),
    );

    let response = server
        .post("/api/chat")
        .json(&json!({"input": "hi", "sessionId": "s1"}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["details"], "Run creation failed: 404 no such assistant");
}

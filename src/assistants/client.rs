//! OpenAI Assistants API client.

use futures::StreamExt;
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{AssistantApi, RunStream};
use crate::config::AssistantConfig;
use crate::error::{RelayError, Result, UpstreamOperation};

const BETA_HEADER: &str = "OpenAI-Beta";

/// Client for `/threads`, `/threads/{id}/messages` and `/threads/{id}/runs`.
#[derive(Clone)]
pub struct AssistantsClient {
    http: reqwest::Client,
    base_url: String,
    beta: String,
}

impl std::fmt::Debug for AssistantsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantsClient")
            .field("base_url", &self.base_url)
            .field("beta", &self.beta)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    role: &'static str,
    content: &'a Value,
}

#[derive(Debug, Serialize)]
struct CreateRun<'a> {
    assistant_id: &'a str,
    stream: bool,
}

impl AssistantsClient {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(base_url: &str, beta: impl Into<String>) -> Result<Self> {
        Url::parse(base_url).map_err(|e| {
            RelayError::Configuration(format!("Invalid assistant API base {base_url}: {e}"))
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            beta: beta.into(),
        })
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        Self::new(&config.api_base, config.beta_header.clone())
    }

    fn post(&self, api_key: &str, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(api_key)
            .header(BETA_HEADER, &self.beta)
    }
}

/// Pass 2xx responses through; turn anything else into [`RelayError::Upstream`].
async fn check_status(operation: UpstreamOperation, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await?;
    tracing::warn!(
        name: "assistants.request.rejected",
        operation = %operation,
        status = status.as_u16(),
        "Provider rejected request"
    );
    Err(RelayError::Upstream {
        operation,
        status: status.as_u16(),
        body,
    })
}

#[async_trait::async_trait]
impl AssistantApi for AssistantsClient {
    async fn create_thread(&self, api_key: &str) -> Result<String> {
        let resp = self.post(api_key, "/threads").send().await?;
        let resp = check_status(UpstreamOperation::CreateThread, resp).await?;
        let thread: ThreadObject = resp.json().await?;
        Ok(thread.id)
    }

    async fn add_message(&self, api_key: &str, thread_id: &str, content: &Value) -> Result<()> {
        let body = CreateMessage {
            role: "user",
            content,
        };
        let resp = self
            .post(api_key, &format!("/threads/{thread_id}/messages"))
            .json(&body)
            .send()
            .await?;
        check_status(UpstreamOperation::AddMessage, resp).await?;
        Ok(())
    }

    async fn create_run_stream(
        &self,
        api_key: &str,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<RunStream> {
        let body = CreateRun {
            assistant_id,
            stream: true,
        };
        let resp = self
            .post(api_key, &format!("/threads/{thread_id}/runs"))
            .json(&body)
            .send()
            .await?;
        let resp = check_status(UpstreamOperation::CreateRun, resp).await?;

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| RelayError::StreamTranscode(e.to_string())));
        Ok(Box::pin(stream))
    }
}

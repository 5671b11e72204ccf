use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::ThreadCache;
use crate::error::{RelayError, Result};

/// Redis-over-REST cache (Vercel KV / Upstash).
///
/// Commands are posted as JSON arrays to the base URL. Values are stored
/// JSON-encoded, matching what the KV JavaScript SDK writes, so a deployment
/// can share keys with one.
#[derive(Clone)]
pub struct RestThreadCache {
    http: reqwest::Client,
    url: Url,
    token: String,
}

impl std::fmt::Debug for RestThreadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestThreadCache")
            .field("url", &self.url.as_str())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestThreadCache {
    pub fn new(url: &str, token: String) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| RelayError::Configuration(format!("Invalid KV REST URL {url}: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            url,
            token,
        })
    }

    async fn command(&self, command: Value) -> Result<Option<Value>> {
        let resp = self
            .http
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await?;

        let status = resp.status();
        let body: CommandResponse = if status.is_success() {
            resp.json().await?
        } else {
            let text = resp.text().await?;
            return Err(RelayError::Cache(format!("{} {text}", status.as_u16())));
        };

        match body.error {
            Some(message) => Err(RelayError::Cache(message)),
            None => Ok(body.result.filter(|v| !v.is_null())),
        }
    }
}

/// Undo the SDK's JSON encoding; plain strings written by other clients pass through.
fn decode_value(raw: Value) -> Option<String> {
    match raw {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::String(inner)) => Some(inner),
            _ => Some(s),
        },
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ThreadCache for RestThreadCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let result = self.command(json!(["GET", key])).await?;
        Ok(result.and_then(decode_value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let encoded = Value::String(value.to_string()).to_string();
        self.command(json!(["SET", key, encoded, "EX", ttl.as_secs().to_string()]))
            .await?;
        Ok(())
    }
}

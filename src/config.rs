use std::env;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Host to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Assistant provider base URL
    #[arg(long, env = "OPENAI_API_BASE")]
    pub api_base: Option<String>,

    /// Assistant that runs every turn
    #[arg(long, env = "ASSISTANT_ID")]
    pub assistant_id: Option<String>,

    /// Session cache backend: `memory` or `rest`
    #[arg(long, env = "CACHE_PROVIDER")]
    pub cache_provider: Option<String>,

    /// Log output format: `compact` or `json`
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub assistant: AssistantConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    pub api_base: String,
    pub assistant_id: String,
    pub beta_header: String,
    pub thread_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub provider: CacheProvider,
    pub rest_url: Option<String>,
    pub rest_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheProvider {
    /// In-process map, lost on restart.
    Memory,
    /// Redis-over-REST (Vercel KV / Upstash).
    Rest,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("assistant.api_base", "https://api.openai.com/v1")?
            .set_default("assistant.beta_header", "assistants=v1")?
            .set_default("assistant.thread_ttl_secs", 60 * 60 * 24)?
            .set_default("cache.provider", "memory")?
            .set_default("logging.format", "compact")?;

        // 2. Config file: explicit path must exist, ./config.yaml is optional
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Environment variables prefixed with RELAY_, e.g. RELAY_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .separator("__")
                .try_parsing(true),
        );

        // 4. Vercel KV names, so a project's existing env keeps working
        if let Ok(val) = env::var("KV_REST_API_URL") {
            builder = builder.set_override("cache.rest_url", val)?;
        }
        if let Ok(val) = env::var("KV_REST_API_TOKEN") {
            builder = builder.set_override("cache.rest_token", val)?;
        }

        // 5. CLI flags (clap already folds in their env vars)
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(base) = cli.api_base {
            builder = builder.set_override("assistant.api_base", base)?;
        }
        if let Some(id) = cli.assistant_id {
            builder = builder.set_override("assistant.assistant_id", id)?;
        }
        if let Some(provider) = cli.cache_provider {
            builder = builder.set_override("cache.provider", provider.to_lowercase())?;
        }
        if let Some(format) = cli.log_format {
            builder = builder.set_override("logging.format", format.to_lowercase())?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.assistant.assistant_id.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "assistant.assistant_id cannot be empty".to_string(),
            ));
        }
        if self.assistant.thread_ttl_secs == 0 {
            return Err(config::ConfigError::Message(
                "assistant.thread_ttl_secs must be positive".to_string(),
            ));
        }
        if self.cache.provider == CacheProvider::Rest
            && (self.cache.rest_url.is_none() || self.cache.rest_token.is_none())
        {
            return Err(config::ConfigError::Message(
                "cache.provider=rest requires KV_REST_API_URL and KV_REST_API_TOKEN".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-deployment values the relay pipeline needs on every request.
#[derive(Clone)]
pub struct RelaySettings {
    /// Provider bearer credential. `None` fails every chat request.
    pub api_key: Option<String>,
    /// Assistant that runs every turn.
    pub assistant_id: String,
    /// Lifetime of a session → thread mapping.
    pub thread_ttl: Duration,
}

impl std::fmt::Debug for RelaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("assistant_id", &self.assistant_id)
            .field("thread_ttl", &self.thread_ttl)
            .finish()
    }
}

impl RelaySettings {
    /// Build settings from loaded config plus the `OPENAI_API_KEY` environment variable.
    pub fn from_env(config: &AppConfig) -> Self {
        Self {
            api_key: load_api_key(),
            assistant_id: config.assistant.assistant_id.clone(),
            thread_ttl: Duration::from_secs(config.assistant.thread_ttl_secs),
        }
    }
}

/// Read the provider credential. Blank values count as missing.
pub fn load_api_key() -> Option<String> {
    env::var("OPENAI_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty())
}

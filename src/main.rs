//! Assistant Relay Server
//!
//! Entry point: load `.env` and configuration, initialise logging, serve.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use assistant_relay::config::{AppConfig, RelaySettings};
use assistant_relay::{server, telemetry};
use dotenvy::dotenv;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before anything reads the environment
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    telemetry::init(config.logging.format);

    let settings = RelaySettings::from_env(&config);
    server::start_server(config, settings).await
}

//! Session → thread cache.
//!
//! The relay keeps exactly one piece of state: which provider thread belongs
//! to which client session. That mapping lives behind [`ThreadCache`] so the
//! backend can be an in-process map or an external key-value service.
//!
//! # Backends
//!
//! - [`MemoryThreadCache`]: process-local map with per-entry deadlines
//! - [`RestThreadCache`]: Redis-over-REST (Vercel KV / Upstash wire format)
//!
//! Neither backend serialises concurrent writers. Two requests that miss on
//! the same key both write, and the last write wins.

mod memory;
mod rest;

pub use memory::MemoryThreadCache;
pub use rest::RestThreadCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{CacheConfig, CacheProvider};
use crate::error::{RelayError, Result};

/// Key-value store with time-to-live, keyed by session id.
#[async_trait]
pub trait ThreadCache: Send + Sync + std::fmt::Debug {
    /// Look up a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Build the backend selected by `cache.provider`.
pub fn from_config(config: &CacheConfig) -> Result<Arc<dyn ThreadCache>> {
    match config.provider {
        CacheProvider::Memory => Ok(Arc::new(MemoryThreadCache::new())),
        CacheProvider::Rest => {
            let (Some(url), Some(token)) = (&config.rest_url, &config.rest_token) else {
                return Err(RelayError::Configuration(
                    "REST cache requires KV_REST_API_URL and KV_REST_API_TOKEN".to_string(),
                ));
            };
            Ok(Arc::new(RestThreadCache::new(url, token.clone())?))
        }
    }
}

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::ThreadCache;
use crate::error::{RelayError, Result};

/// In-process cache with a deadline per entry.
///
/// Deadlines use [`tokio::time::Instant`], so paused-clock tests can step
/// past a TTL without sleeping.
#[derive(Debug, Default)]
pub struct MemoryThreadCache {
    entries: Mutex<HashMap<String, Entry>>,
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl MemoryThreadCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones past their deadline.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry past its deadline. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        match self.entries.lock() {
            Ok(mut guard) => purge_expired(&mut guard, Instant::now()),
            Err(_) => 0,
        }
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    let removed = before - entries.len();
    if removed > 0 {
        tracing::debug!(removed, "Purged expired cache entries");
    }
    removed
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> RelayError {
    RelayError::Cache("memory cache lock poisoned".to_string())
}

#[async_trait]
impl ThreadCache for MemoryThreadCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.entries.lock().map_err(poisoned)?;
        let now = Instant::now();

        match guard.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                guard.remove(key);
                tracing::debug!(key = %key, "Cache entry expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut guard = self.entries.lock().map_err(poisoned)?;
        let now = Instant::now();
        // Sessions are caller-chosen and often never read again; sweep on write.
        purge_expired(&mut guard, now);
        guard.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

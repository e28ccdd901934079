//! Key-value cache used by the credential broker.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use crate::error::EngineError;

/// Dumb key-value store with per-entry TTL.
///
/// Implementations may be process-local or backed by an external KV service;
/// the broker only ever does read-then-maybe-write.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError>;
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), EngineError>;
}

struct Entry {
    value: String,
    expires: Instant,
}

/// Bounded in-process cache.
pub struct InMemoryTokenCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl InMemoryTokenCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryTokenCache {
    fn default() -> Self {
        Self::new(64)
    }
}

fn poisoned<T>(_: T) -> EngineError {
    EngineError::InternalError("token cache lock poisoned".to_string())
}

#[async_trait]
impl TokenCache for InMemoryTokenCache {
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let expired = match entries.get(key) {
            Some(entry) if entry.expires > Instant::now() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), EngineError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.put(
            key.to_string(),
            Entry {
                value,
                expires: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

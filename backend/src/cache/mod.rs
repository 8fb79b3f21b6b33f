//! Session cache abstraction.
//!
//! The cache is a look-aside accelerator in front of the credential store.
//! Every write happens after the store transaction commits, and a failed
//! cache call is logged and ignored: the store stays the source of truth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub mod redis_cache;

pub use redis_cache::RedisSessionCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value store with per-key expiry.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key` for `ttl`.
    async fn put_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;
}

pub fn refresh_token_key(token: &str) -> String {
    format!("refresh:token:user:{token}")
}

pub fn user_key(user_id: &str) -> String {
    format!("user:id:{user_id}")
}

/// Remaining lifetime until `expired_at`, or `None` once nothing is left.
pub fn remaining_ttl(expired_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (expired_at - now)
        .to_std()
        .ok()
        .filter(|ttl| !ttl.is_zero())
}

/// Reads and decodes a cached JSON value.
///
/// Backend failures and undecodable entries are logged and reported as a
/// miss so the caller falls back to the store.
pub async fn read_json<T: DeserializeOwned>(cache: &dyn SessionCache, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding unreadable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "Cache read failed, falling back to store");
            None
        }
    }
}

/// Best-effort JSON write. A zero TTL skips the write entirely.
pub async fn write_json<T: Serialize>(
    cache: &dyn SessionCache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) {
    let Some(ttl) = ttl else {
        tracing::debug!(key, "Skipping cache write for expired entry");
        return;
    };

    let result = match serde_json::to_string(value) {
        Ok(raw) => cache.put_ex(key, &raw, ttl).await,
        Err(e) => Err(CacheError::from(e)),
    };

    if let Err(e) = result {
        tracing::warn!(key, error = %e, "Cache write failed");
    }
}

/// Best-effort eviction.
pub async fn evict(cache: &dyn SessionCache, key: &str) {
    if let Err(e) = cache.del(key).await {
        tracing::warn!(key, error = %e, "Cache eviction failed");
    }
}

/// In-process cache used when no Redis endpoint is configured.
#[derive(Debug, Default)]
pub struct InMemorySessionCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, deadline)| *deadline > now);
        before - entries.len()
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, deadline)| *deadline > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn put_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let deadline = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Cache whose every call fails, for exercising the best-effort paths.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FailingSessionCache;

#[cfg(test)]
#[async_trait]
impl SessionCache for FailingSessionCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Backend("cache unavailable".into()))
    }

    async fn put_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Backend("cache unavailable".into()))
    }

    async fn del(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Backend("cache unavailable".into()))
    }
}

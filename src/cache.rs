//! Key/value cache collaborator with per-entry TTL.
//!
//! Expiry is lazy: an entry older than its TTL reads as absent, and the
//! cleanup duty calls [`Cache::purge_expired`] to reclaim memory. Concurrent
//! writers to one key are last-write-wins.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CacheError;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_with_ttl(&self, key: &str, payload: String, ttl: Duration)
        -> Result<(), CacheError>;
    /// Remove expired entries; returns how many were dropped.
    async fn purge_expired(&self) -> Result<usize, CacheError>;
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: String,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Expired once strictly more than `ttl` has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.payload.clone()))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        payload: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            stored_at: Instant::now(),
            ttl,
        };
        self.entries.write().insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|_, e| !e.is_expired(now));
        Ok(before - map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entry_is_absent_after_ttl() {
        let c = InMemoryCache::new();
        c.set_with_ttl("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(c.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(c.get("k").await.unwrap(), None);
        // still held until purged
        assert_eq!(c.len(), 1);
        assert_eq!(c.purge_expired().await.unwrap(), 1);
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn last_write_wins() {
        let c = InMemoryCache::new();
        c.set_with_ttl("k", "a".into(), Duration::from_secs(5))
            .await
            .unwrap();
        c.set_with_ttl("k", "b".into(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(c.get("k").await.unwrap().as_deref(), Some("b"));
    }
}

//! TTL cache store and page keys
//!
//! Every write carries an expiry. Expired entries are never returned, and
//! `cleanup_expired` drops them for good; the server runs it on a timer.

use super::CacheStore;
use crate::common::{timestamp_now_millis, Result};
use crate::model::QuerySpec;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Cache key for one result page: `<namespace>:<offset>:<limit>:<fingerprint>`.
pub fn page_key(namespace: &str, spec: &QuerySpec) -> String {
    format!(
        "{}:{}:{}:{:08x}",
        namespace,
        spec.offset,
        spec.limit,
        spec.fingerprint()
    )
}

/// Prefix shared by every page key in `namespace`.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{}:", namespace)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    // ms since epoch
    expires_at: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    map: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all expired keys and return the number of keys removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = timestamp_now_millis();
        let mut map = self.map.write().await;
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now));
        before - map.len()
    }

    /// Number of stored keys, expired or not.
    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = timestamp_now_millis();
        Ok(self
            .map
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = timestamp_now_millis().saturating_add(ttl.as_millis() as u64);
        self.map
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.write().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut map = self.map.write().await;
        let before = map.len();
        map.retain(|key, _| !key.starts_with(prefix));
        Ok(before - map.len())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

//! In-memory cache implementation using moka

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache as MokaCache;

use crate::domain::{Cache, CacheItem, DomainError, KeyOutcome, StorageKey};

/// Configuration for in-memory cache
#[derive(Debug, Clone)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_capacity: u64,
    /// TTL for entries stored without one
    pub default_ttl: Duration,
    /// Entries not accessed for this duration are evicted
    pub time_to_idle: Option<Duration>,
    pub key_prefix: Option<String>,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            default_ttl: Duration::from_secs(3600),
            time_to_idle: None,
            key_prefix: None,
        }
    }
}

impl InMemoryCacheConfig {
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_time_to_idle(mut self, tti: Duration) -> Self {
        self.time_to_idle = Some(tti);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Bytes,
    expires_at: Instant,
}

/// Thread-safe in-memory cache using moka.
///
/// Entries carry their own expiry on top of moka's cache-wide TTL, so a
/// shorter per-item TTL is honoured. Eviction is LRU-like once capacity is
/// reached.
#[derive(Debug)]
pub struct InMemoryCache {
    cache: MokaCache<String, CacheEntry>,
    config: InMemoryCacheConfig,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_config(InMemoryCacheConfig::default())
    }

    pub fn with_config(config: InMemoryCacheConfig) -> Self {
        let mut builder = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.default_ttl);

        if let Some(tti) = config.time_to_idle {
            builder = builder.time_to_idle(tti);
        }

        Self {
            cache: builder.build(),
            config,
        }
    }

    fn prefix_key(&self, key: &StorageKey) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    async fn lookup(&self, key: &str) -> Option<Bytes> {
        let entry = self.cache.get(key).await?;

        if Instant::now() >= entry.expires_at {
            self.cache.remove(key).await;
            return None;
        }

        Some(entry.data)
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_multi(&self, keys: &[StorageKey]) -> Result<Vec<Option<Bytes>>, DomainError> {
        let mut values = Vec::with_capacity(keys.len());

        for key in keys {
            values.push(self.lookup(&self.prefix_key(key)).await);
        }

        Ok(values)
    }

    async fn set_multi(&self, items: Vec<CacheItem>) -> Result<Vec<KeyOutcome>, DomainError> {
        let mut outcomes = Vec::with_capacity(items.len());

        for item in items {
            let ttl = item.ttl.unwrap_or(self.config.default_ttl);
            let entry = CacheEntry {
                data: item.value,
                expires_at: Instant::now() + ttl,
            };

            self.cache.insert(self.prefix_key(&item.key), entry).await;
            outcomes.push(KeyOutcome::Done);
        }

        Ok(outcomes)
    }

    async fn delete_multi(&self, keys: &[StorageKey]) -> Result<Vec<KeyOutcome>, DomainError> {
        let mut outcomes = Vec::with_capacity(keys.len());

        for key in keys {
            let outcome = match self.cache.remove(&self.prefix_key(key)).await {
                Some(_) => KeyOutcome::Done,
                None => KeyOutcome::Miss,
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}

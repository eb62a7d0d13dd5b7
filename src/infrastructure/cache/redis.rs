//! Redis cache implementation

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::Client;

use crate::domain::{Cache, CacheItem, DomainError, KeyOutcome, StorageKey};

/// Configuration for Redis cache
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// TTL for entries stored without one
    pub default_ttl: Duration,
    /// Key prefix for namespacing
    pub key_prefix: Option<String>,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            default_ttl: Duration::from_secs(3600),
            key_prefix: None,
        }
    }
}

impl RedisCacheConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

/// Redis-backed cache shared between processes.
///
/// Batches map to one round trip each: `MGET` for reads, a pipeline of
/// `SET .. EX` for writes and a pipeline of `DEL` for deletes, so per-key
/// delete results can tell misses apart.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    config: RedisCacheConfig,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisCache {
    pub async fn new(config: RedisCacheConfig) -> Result<Self, DomainError> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            DomainError::cache_unavailable(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            DomainError::cache_unavailable(format!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self { connection, config })
    }

    fn prefix_key(&self, key: &StorageKey) -> String {
        prefixed(self.config.key_prefix.as_deref(), key)
    }

    fn ttl_secs(&self, ttl: Option<Duration>) -> u64 {
        ttl.unwrap_or(self.config.default_ttl).as_secs().max(1)
    }
}

fn prefixed(prefix: Option<&str>, key: &StorageKey) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, key),
        None => key.to_string(),
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_multi(&self, keys: &[StorageKey]) -> Result<Vec<Option<Bytes>>, DomainError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let prefixed: Vec<String> = keys.iter().map(|k| self.prefix_key(k)).collect();
        let mut conn = self.connection.clone();

        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&prefixed)
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::cache_unavailable(format!("MGET failed: {}", e)))?;

        Ok(values.into_iter().map(|v| v.map(Bytes::from)).collect())
    }

    async fn set_multi(&self, items: Vec<CacheItem>) -> Result<Vec<KeyOutcome>, DomainError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for item in &items {
            pipe.cmd("SET")
                .arg(self.prefix_key(&item.key))
                .arg(item.value.as_ref())
                .arg("EX")
                .arg(self.ttl_secs(item.ttl));
        }

        let mut conn = self.connection.clone();
        let replies: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::cache_unavailable(format!("SET pipeline failed: {}", e)))?;

        Ok(replies.iter().map(set_outcome).collect())
    }

    async fn delete_multi(&self, keys: &[StorageKey]) -> Result<Vec<KeyOutcome>, DomainError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("DEL").arg(self.prefix_key(key));
        }

        let mut conn = self.connection.clone();
        let removed: Vec<i64> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::cache_unavailable(format!("DEL pipeline failed: {}", e)))?;

        Ok(removed
            .into_iter()
            .map(|n| if n > 0 { KeyOutcome::Done } else { KeyOutcome::Miss })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

fn set_outcome(reply: &redis::Value) -> KeyOutcome {
    match reply {
        redis::Value::ServerError(e) => KeyOutcome::Failed(format!("{:?}", e)),
        _ => KeyOutcome::Done,
    }
}

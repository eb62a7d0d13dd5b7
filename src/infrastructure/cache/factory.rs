//! Cache factory for runtime selection

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::{Cache, DomainError};

use super::disabled::DisabledCache;
use super::in_memory::{InMemoryCache, InMemoryCacheConfig};
use super::redis::{RedisCache, RedisCacheConfig};

/// Supported cache backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    /// In-process cache using moka
    #[default]
    InMemory,
    /// Shared Redis cache
    Redis,
    /// Every lookup misses; the proxy reads the store directly
    Disabled,
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheType::InMemory => write!(f, "in_memory"),
            CacheType::Redis => write!(f, "redis"),
            CacheType::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for CacheType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(CacheType::InMemory),
            "redis" => Ok(CacheType::Redis),
            "disabled" | "none" => Ok(CacheType::Disabled),
            _ => Err(DomainError::configuration(format!(
                "Unknown cache type: {}. Valid types: in_memory, redis, disabled",
                s
            ))),
        }
    }
}

/// Configuration for the cache factory
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub cache_type: CacheType,
    /// Required for the Redis backend
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Namespace prepended to every cache key
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Lifetime of cached entries, in seconds
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// In-memory only
    #[serde(default = "default_max_capacity")]
    pub max_capacity: Option<u64>,
    /// In-memory only
    #[serde(default)]
    pub time_to_idle_secs: Option<u64>,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_capacity() -> Option<u64> {
    Some(10_000)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::InMemory,
            redis_url: None,
            key_prefix: None,
            default_ttl_secs: default_ttl_secs(),
            max_capacity: default_max_capacity(),
            time_to_idle_secs: None,
        }
    }
}

impl CacheConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            cache_type: CacheType::Redis,
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            cache_type: CacheType::Disabled,
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn time_to_idle(&self) -> Option<Duration> {
        self.time_to_idle_secs.map(Duration::from_secs)
    }
}

/// Factory for creating cache instances
#[derive(Debug, Default)]
pub struct CacheFactory;

impl CacheFactory {
    pub fn new() -> Self {
        Self
    }

    /// Creates the configured backend. Redis connects eagerly, so an
    /// unreachable server fails here rather than on first use.
    pub async fn create(&self, config: &CacheConfig) -> Result<Arc<dyn Cache>, DomainError> {
        tracing::info!(backend = %config.cache_type, "caching: creating cache backend");

        match config.cache_type {
            CacheType::InMemory => {
                let mut in_memory_config = InMemoryCacheConfig::default()
                    .with_default_ttl(config.default_ttl());

                if let Some(capacity) = config.max_capacity {
                    in_memory_config = in_memory_config.with_max_capacity(capacity);
                }

                if let Some(tti) = config.time_to_idle() {
                    in_memory_config = in_memory_config.with_time_to_idle(tti);
                }

                if let Some(prefix) = &config.key_prefix {
                    in_memory_config = in_memory_config.with_key_prefix(prefix.clone());
                }

                Ok(Arc::new(InMemoryCache::with_config(in_memory_config)))
            }
            CacheType::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    DomainError::configuration("Redis URL is required for Redis cache type")
                })?;

                let mut redis_config =
                    RedisCacheConfig::new(url).with_default_ttl(config.default_ttl());

                if let Some(prefix) = &config.key_prefix {
                    redis_config = redis_config.with_key_prefix(prefix.clone());
                }

                Ok(Arc::new(RedisCache::new(redis_config).await?))
            }
            CacheType::Disabled => Ok(Arc::new(DisabledCache)),
        }
    }
}

//! Cache infrastructure - Cache implementations

mod disabled;
mod factory;
mod in_memory;
mod redis;

pub use disabled::DisabledCache;
pub use factory::{CacheConfig, CacheFactory, CacheType};
pub use in_memory::{InMemoryCache, InMemoryCacheConfig};
pub use redis::{RedisCache, RedisCacheConfig};

//! Cache domain - second-level byte cache contract

mod repository;

pub use repository::{ignore_misses, Cache, CacheItem, KeyOutcome};

#[cfg(test)]
pub use repository::mock;
#[cfg(test)]
pub use repository::MockCache;

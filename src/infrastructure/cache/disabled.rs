//! Cache backend that stores nothing

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{Cache, CacheItem, DomainError, KeyOutcome, StorageKey};

/// Always misses; writes are accepted and dropped
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

#[async_trait]
impl Cache for DisabledCache {
    async fn get_multi(&self, keys: &[StorageKey]) -> Result<Vec<Option<Bytes>>, DomainError> {
        Ok(vec![None; keys.len()])
    }

    async fn set_multi(&self, items: Vec<CacheItem>) -> Result<Vec<KeyOutcome>, DomainError> {
        Ok(vec![KeyOutcome::Done; items.len()])
    }

    async fn delete_multi(&self, keys: &[StorageKey]) -> Result<Vec<KeyOutcome>, DomainError> {
        Ok(vec![KeyOutcome::Miss; keys.len()])
    }

    fn backend_name(&self) -> &'static str {
        "disabled"
    }
}

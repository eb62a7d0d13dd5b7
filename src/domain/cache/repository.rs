//! Second-level cache trait definition

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

#[cfg(test)]
use mockall::automock;

use crate::domain::storage::StorageKey;
use crate::domain::DomainError;

/// Encoded entry destined for the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    pub key: StorageKey,
    pub value: Bytes,
    /// Entry lifetime; `None` uses the backend default
    pub ttl: Option<Duration>,
}

impl CacheItem {
    pub fn new(key: StorageKey, value: impl Into<Bytes>) -> Self {
        Self {
            key,
            value: value.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Per-key result of a batched cache write or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Done,
    /// The key was not present (only reported by deletes)
    Miss,
    Failed(String),
}

impl KeyOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Best-effort byte cache with batched operations.
///
/// Whole-call failures are reported as `Err`; per-key failures come back as
/// [`KeyOutcome::Failed`] slots aligned with the request.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Cache: Send + Sync + Debug {
    /// Reads a batch of keys; `None` marks a miss. One slot per key.
    async fn get_multi(&self, keys: &[StorageKey]) -> Result<Vec<Option<Bytes>>, DomainError>;

    /// Stores a batch of entries
    async fn set_multi(&self, items: Vec<CacheItem>) -> Result<Vec<KeyOutcome>, DomainError>;

    /// Removes a batch of keys. Removing an absent key reports `Miss`.
    async fn delete_multi(&self, keys: &[StorageKey]) -> Result<Vec<KeyOutcome>, DomainError>;

    /// Short backend name for logs and metrics
    fn backend_name(&self) -> &'static str;
}

/// Collapses per-key outcomes into a single result, treating misses as
/// success so that deletes stay idempotent.
pub fn ignore_misses(keys: &[StorageKey], outcomes: &[KeyOutcome]) -> Result<(), DomainError> {
    let failures: Vec<String> = keys
        .iter()
        .zip(outcomes)
        .filter_map(|(key, outcome)| match outcome {
            KeyOutcome::Failed(reason) => Some(format!("{}: {}", key, reason)),
            _ => None,
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(DomainError::cache_unavailable(format!(
            "{} of {} keys failed ({})",
            failures.len(),
            keys.len(),
            failures.join("; ")
        )))
    }
}

//! Applies a committed transaction's buffered effects to the cache

use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{ignore_misses, Cache, DomainError, StorageKey, TxHandle};
use crate::infrastructure::metrics;

use super::codec::EntityCodec;
use super::reducer::encode_items;
use super::registry::TransactionBuffer;

/// What a flush did; failures are informational only
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub tombstones: usize,
    pub fills: usize,
    pub delete_error: Option<DomainError>,
    pub set_error: Option<DomainError>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.delete_error.is_none() && self.set_error.is_none()
    }
}

/// Best-effort writer of committed transaction buffers
pub struct CommitFlusher<'a, V> {
    cache: &'a dyn Cache,
    codec: &'a dyn EntityCodec<V>,
    entry_ttl: Option<Duration>,
}

impl<'a, V> CommitFlusher<'a, V> {
    pub fn new(cache: &'a dyn Cache, codec: &'a dyn EntityCodec<V>) -> Self {
        Self {
            cache,
            codec,
            entry_ttl: None,
        }
    }

    pub fn with_entry_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Evicts tombstoned keys and stores observed values in one batch each.
    ///
    /// Never fails, since the transaction is already committed. Fills lost
    /// to a failed flush are restored by the next read-through.
    pub async fn flush(&self, tx: &TxHandle, buffer: TransactionBuffer<V>) -> FlushReport {
        let (tombstones, fills) = buffer.partition();
        let mut report = FlushReport {
            tombstones: tombstones.len(),
            fills: fills.len(),
            ..Default::default()
        };

        if !tombstones.is_empty() {
            report.delete_error = self.delete(&tombstones).await.err();
            if let Some(e) = &report.delete_error {
                warn!(tx = %tx, error = %e, "caching: delete_multi failed during commit");
                metrics::record_cache_error("delete_multi");
            } else {
                metrics::record_invalidations(tombstones.len());
            }
        }

        let items = encode_items(self.codec, fills, self.entry_ttl);
        if !items.is_empty() {
            let keys: Vec<StorageKey> = items.iter().map(|item| item.key.clone()).collect();
            report.set_error = self
                .cache
                .set_multi(items)
                .await
                .and_then(|outcomes| ignore_misses(&keys, &outcomes))
                .err();

            if let Some(e) = &report.set_error {
                warn!(tx = %tx, error = %e, "caching: set_multi failed during commit");
                metrics::record_cache_error("set_multi");
            } else {
                metrics::record_fills(keys.len());
            }
        }

        metrics::record_flush(report.is_clean());
        debug!(
            tx = %tx,
            tombstones = report.tombstones,
            fills = report.fills,
            clean = report.is_clean(),
            "caching: flushed transaction buffer"
        );

        report
    }

    async fn delete(&self, keys: &[StorageKey]) -> Result<(), DomainError> {
        let outcomes = self.cache.delete_multi(keys).await?;
        ignore_misses(keys, &outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::mock::{CacheCall, FakeCache};
    use crate::proxy::codec::JsonCodec;

    fn key(name: &str) -> StorageKey {
        StorageKey::from(name)
    }

    fn encoded(value: &str) -> bytes::Bytes {
        JsonCodec::<String>::new().encode(&value.to_string()).unwrap()
    }

    fn buffer(fills: &[(&str, &str)], tombstones: &[&str]) -> TransactionBuffer<String> {
        let mut buffer = TransactionBuffer::new();
        for (k, v) in fills {
            buffer.record_read(key(k), Some(v.to_string()));
        }
        for k in tombstones {
            buffer.record_tombstone(key(k));
        }
        buffer
    }

    #[tokio::test]
    async fn test_flush_applies_fills_and_tombstones() {
        let cache = FakeCache::new().with_raw("old", encoded("stale"));
        let codec = JsonCodec::<String>::new();
        let flusher = CommitFlusher::<String>::new(&cache, &codec);

        let report = flusher
            .flush(&TxHandle::new(1), buffer(&[("a", "va")], &["old"]))
            .await;

        assert!(report.is_clean());
        assert_eq!(report.tombstones, 1);
        assert_eq!(report.fills, 1);
        assert_eq!(cache.raw("a"), Some(encoded("va")));
        assert!(!cache.contains("old"));
    }

    #[tokio::test]
    async fn test_flush_deleting_absent_keys_is_clean() {
        let cache = FakeCache::new();
        let codec = JsonCodec::<String>::new();
        let flusher = CommitFlusher::<String>::new(&cache, &codec);

        let report = flusher
            .flush(&TxHandle::new(1), buffer(&[], &["never-cached", "also-absent"]))
            .await;

        assert!(report.is_clean());
        assert!(report.delete_error.is_none());
    }

    #[tokio::test]
    async fn test_flush_issues_one_batch_per_kind() {
        let cache = FakeCache::new();
        let codec = JsonCodec::<String>::new();
        let flusher = CommitFlusher::<String>::new(&cache, &codec);

        flusher
            .flush(
                &TxHandle::new(1),
                buffer(&[("a", "1"), ("b", "2")], &["c", "d"]),
            )
            .await;

        let calls = cache.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], CacheCall::DeleteMulti(keys) if keys.len() == 2));
        assert!(matches!(&calls[1], CacheCall::SetMulti(keys) if keys.len() == 2));
    }

    #[tokio::test]
    async fn test_empty_buffer_makes_no_calls() {
        let cache = FakeCache::new();
        let codec = JsonCodec::<String>::new();
        let flusher = CommitFlusher::<String>::new(&cache, &codec);

        let report = flusher.flush(&TxHandle::new(1), TransactionBuffer::new()).await;

        assert!(report.is_clean());
        assert!(cache.calls().is_empty());
    }

    #[tokio::test]
    async fn test_flush_failures_are_reported_not_raised() {
        let cache = FakeCache::new().with_error("cache down");
        let codec = JsonCodec::<String>::new();
        let flusher = CommitFlusher::<String>::new(&cache, &codec);

        let report = flusher
            .flush(&TxHandle::new(3), buffer(&[("a", "va")], &["b"]))
            .await;

        assert!(!report.is_clean());
        assert!(matches!(
            report.delete_error,
            Some(DomainError::CacheUnavailable { .. })
        ));
        assert!(matches!(
            report.set_error,
            Some(DomainError::CacheUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_partial_delete_failure_still_applies_fills() {
        let cache = FakeCache::new()
            .with_raw("b", encoded("old-b"))
            .with_failing_key("b");
        let codec = JsonCodec::<String>::new();
        let flusher = CommitFlusher::<String>::new(&cache, &codec);

        let report = flusher
            .flush(&TxHandle::new(4), buffer(&[("a", "va")], &["b"]))
            .await;

        assert!(report.delete_error.is_some());
        assert!(report.set_error.is_none());
        assert_eq!(cache.raw("a"), Some(encoded("va")));
    }
}

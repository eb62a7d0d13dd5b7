//! Batched read that merges cache hits with a narrowed store read

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::domain::{
    ignore_misses, BatchGet, Cache, CacheItem, Record, RecordKey, StorageKey, TransactionalStore,
};
use crate::infrastructure::metrics;

use super::codec::EntityCodec;

/// Compacts the unresolved key/index pairs to the front, preserving their
/// relative order, and truncates the resolved ones away.
///
/// `indexes[x]` is the slot in `results` that `keys[x]` resolves into.
pub fn reduce<V>(keys: &mut Vec<StorageKey>, indexes: &mut Vec<usize>, results: &[Option<V>]) {
    let mut count = 0;

    for x in 0..indexes.len() {
        if results[indexes[x]].is_none() {
            keys.swap(count, x);
            indexes.swap(count, x);
            count += 1;
        }
    }

    keys.truncate(count);
    indexes.truncate(count);
}

/// Read-through lookup for non-transactional batch reads
pub struct CacheGetReducer<'a, K, V> {
    store: &'a dyn TransactionalStore<K, V>,
    cache: &'a dyn Cache,
    codec: &'a dyn EntityCodec<V>,
    entry_ttl: Option<Duration>,
}

impl<'a, K, V> CacheGetReducer<'a, K, V>
where
    K: RecordKey,
    V: Record,
{
    pub fn new(
        store: &'a dyn TransactionalStore<K, V>,
        cache: &'a dyn Cache,
        codec: &'a dyn EntityCodec<V>,
    ) -> Self {
        Self {
            store,
            cache,
            codec,
            entry_ttl: None,
        }
    }

    /// Sets the lifetime of entries written by read-through fills
    pub fn with_entry_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Resolves `keys` from the cache where possible and from one store read
    /// for the rest. Results follow the order of `keys`; a store error is
    /// returned alongside whatever was resolved.
    pub async fn get(&self, keys: &[K]) -> BatchGet<V> {
        let mut results: Vec<Option<V>> =
            std::iter::repeat_with(|| None).take(keys.len()).collect();
        let mut storage_keys: Vec<StorageKey> =
            keys.iter().map(RecordKey::storage_key).collect();
        let mut indexes: Vec<usize> = (0..keys.len()).collect();

        if storage_keys.is_empty() {
            return BatchGet::ok(results);
        }

        match self.cache.get_multi(&storage_keys).await {
            Ok(items) => {
                let corrupt = self.resolve_hits(&storage_keys, items, &mut results);
                reduce(&mut storage_keys, &mut indexes, &results);
                metrics::record_cache_lookup(keys.len() - indexes.len(), indexes.len());
                self.evict(corrupt).await;
            }
            Err(e) => {
                warn!(
                    backend = self.cache.backend_name(),
                    error = %e,
                    "caching: get_multi failed, reading from store"
                );
                metrics::record_cache_error("get_multi");
            }
        }

        if indexes.is_empty() {
            debug!(keys = keys.len(), "caching: all keys served from cache");
            return BatchGet::ok(results);
        }

        // Only the unresolved keys go to the store
        let pending: Cow<'_, [K]> = if indexes.len() == keys.len() {
            Cow::Borrowed(keys)
        } else {
            Cow::Owned(indexes.iter().map(|&i| keys[i].clone()).collect())
        };
        metrics::record_store_get(pending.len());

        let fetched = self.store.get(None, &pending).await;
        if fetched.values.len() != pending.len() && fetched.error.is_none() {
            error!(
                requested = pending.len(),
                returned = fetched.values.len(),
                "caching: store returned a mismatched batch"
            );
        }

        let mut fills = Vec::with_capacity(fetched.values.len());
        for ((value, key), &index) in fetched.values.into_iter().zip(storage_keys).zip(&indexes) {
            if let Some(value) = value {
                fills.push((key, value.clone()));
                results[index] = Some(value);
            }
        }
        self.fill(fills).await;

        BatchGet {
            values: results,
            error: fetched.error,
        }
    }

    /// Decodes cache hits into `results`, returning keys whose payload was
    /// corrupt
    fn resolve_hits(
        &self,
        keys: &[StorageKey],
        items: Vec<Option<Bytes>>,
        results: &mut [Option<V>],
    ) -> Vec<StorageKey> {
        let mut corrupt = Vec::new();

        for (index, (key, item)) in keys.iter().zip(items).enumerate() {
            let Some(payload) = item else {
                continue;
            };

            match self.codec.decode(&payload) {
                Ok(value) => results[index] = Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "caching: bad value in cache");
                    corrupt.push(key.clone());
                }
            }
        }

        corrupt
    }

    async fn evict(&self, keys: Vec<StorageKey>) {
        if keys.is_empty() {
            return;
        }

        let result = self
            .cache
            .delete_multi(&keys)
            .await
            .and_then(|outcomes| ignore_misses(&keys, &outcomes));

        match result {
            Ok(()) => metrics::record_evictions(keys.len()),
            Err(e) => {
                warn!(error = %e, "caching: failed to evict corrupt entries");
                metrics::record_cache_error("delete_multi");
            }
        }
    }

    async fn fill(&self, values: Vec<(StorageKey, V)>) {
        let items = encode_items(self.codec, values, self.entry_ttl);
        if items.is_empty() {
            return;
        }

        let keys: Vec<StorageKey> = items.iter().map(|item| item.key.clone()).collect();
        let result = self
            .cache
            .set_multi(items)
            .await
            .and_then(|outcomes| ignore_misses(&keys, &outcomes));

        match result {
            Ok(()) => metrics::record_fills(keys.len()),
            Err(e) => {
                warn!(error = %e, "caching: set_multi failed");
                metrics::record_cache_error("set_multi");
            }
        }
    }
}

/// Encodes values into cache items, dropping any the codec rejects
pub(crate) fn encode_items<V>(
    codec: &dyn EntityCodec<V>,
    values: Vec<(StorageKey, V)>,
    ttl: Option<Duration>,
) -> Vec<CacheItem> {
    let mut items = Vec::with_capacity(values.len());

    for (key, value) in values {
        match codec.encode(&value) {
            Ok(bytes) => items.push(CacheItem::new(key, bytes).with_ttl(ttl)),
            // shouldn't happen
            Err(e) => error!(key = %key, error = %e, "caching: marshalling error"),
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::mock::{CacheCall, FakeCache};
    use crate::domain::cache::MockCache;
    use crate::domain::{DomainError, KeyOutcome};
    use crate::infrastructure::store::{InMemoryStore, StoreOperation};
    use crate::proxy::codec::JsonCodec;

    fn skeys(names: &[&str]) -> Vec<StorageKey> {
        names.iter().map(|name| StorageKey::from(*name)).collect()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn encoded(value: &str) -> bytes::Bytes {
        JsonCodec::<String>::new().encode(&value.to_string()).unwrap()
    }

    async fn seeded_store(entries: &[(&str, &str)]) -> InMemoryStore<String, String> {
        let store = InMemoryStore::new();
        let records = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        store.put(None, records).await.unwrap();
        store.reset_stats();
        store
    }

    #[test]
    fn test_reduce_is_stable_partition() {
        let mut keys = skeys(&["a", "b", "c", "d", "e"]);
        let mut indexes = vec![0, 1, 2, 3, 4];
        let results = vec![Some(1), None, Some(3), None, None];

        reduce(&mut keys, &mut indexes, &results);

        assert_eq!(keys, skeys(&["b", "d", "e"]));
        assert_eq!(indexes, vec![1, 3, 4]);
    }

    #[test]
    fn test_reduce_all_resolved() {
        let mut keys = skeys(&["a", "b"]);
        let mut indexes = vec![0, 1];

        reduce(&mut keys, &mut indexes, &[Some(1), Some(2)]);

        assert!(keys.is_empty());
        assert!(indexes.is_empty());
    }

    #[test]
    fn test_reduce_on_already_narrowed_lists() {
        let mut keys = skeys(&["b", "d"]);
        let mut indexes = vec![1, 3];
        let results = vec![Some(1), None, Some(3), Some(4)];

        reduce(&mut keys, &mut indexes, &results);

        assert_eq!(keys, skeys(&["b"]));
        assert_eq!(indexes, vec![1]);
    }

    #[tokio::test]
    async fn test_partial_hit_reads_only_misses_from_store() {
        let store = seeded_store(&[("a", "store-a"), ("b", "store-b"), ("c", "store-c")]).await;
        let cache = FakeCache::new().with_raw("b", encoded("cached-b"));
        let codec = JsonCodec::<String>::new();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&keys(&["a", "b", "c"])).await;

        assert!(batch.is_ok());
        assert_eq!(
            batch.values,
            vec![
                Some("store-a".to_string()),
                Some("cached-b".to_string()),
                Some("store-c".to_string()),
            ]
        );
        assert_eq!(store.requested_keys(), vec![keys(&["a", "c"])]);
    }

    #[tokio::test]
    async fn test_misses_are_filled() {
        let store = seeded_store(&[("a", "va")]).await;
        let cache = FakeCache::new();
        let codec = JsonCodec::<String>::new();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&keys(&["a", "missing"])).await;

        assert_eq!(batch.values, vec![Some("va".to_string()), None]);
        assert_eq!(cache.raw("a"), Some(encoded("va")));
        assert!(!cache.contains("missing"));
        assert_eq!(
            cache.calls(),
            vec![
                CacheCall::GetMulti(skeys(&["a", "missing"])),
                CacheCall::SetMulti(skeys(&["a"])),
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_keys_keep_caller_order() {
        let store = seeded_store(&[("a", "va"), ("b", "vb")]).await;
        let cache = FakeCache::new().with_raw("b", encoded("vb"));
        let codec = JsonCodec::<String>::new();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&keys(&["a", "b", "a", "b"])).await;

        assert_eq!(
            batch.values,
            vec![
                Some("va".to_string()),
                Some("vb".to_string()),
                Some("va".to_string()),
                Some("vb".to_string()),
            ]
        );
        assert_eq!(store.requested_keys(), vec![keys(&["a", "a"])]);
    }

    #[tokio::test]
    async fn test_all_hits_skip_store() {
        let store = seeded_store(&[("a", "va")]).await;
        let cache = FakeCache::new().with_raw("a", encoded("va"));
        let codec = JsonCodec::<String>::new();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&keys(&["a"])).await;

        assert_eq!(batch.values, vec![Some("va".to_string())]);
        assert!(store.requested_keys().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        let store = seeded_store(&[]).await;
        let cache = FakeCache::new();
        let codec = JsonCodec::<String>::new();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&[]).await;

        assert!(batch.is_empty());
        assert!(cache.calls().is_empty());
        assert!(store.requested_keys().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss_and_evicted() {
        let store = seeded_store(&[("a", "va")]).await;
        let cache = FakeCache::new()
            .with_raw("a", &b"\x01{not json"[..])
            .with_raw("gone", &b"\xff"[..]);
        let codec = JsonCodec::<String>::new();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&keys(&["a", "gone"])).await;

        assert!(batch.is_ok());
        assert_eq!(batch.values, vec![Some("va".to_string()), None]);
        assert!(cache
            .calls()
            .contains(&CacheCall::DeleteMulti(skeys(&["a", "gone"]))));
        assert_eq!(cache.raw("a"), Some(encoded("va")));
        assert!(!cache.contains("gone"));
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_store() {
        let store = seeded_store(&[("a", "va"), ("b", "vb")]).await;
        let cache = FakeCache::new().with_error("connection refused");
        let codec = JsonCodec::<String>::new();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&keys(&["a", "b", "c"])).await;

        assert!(batch.is_ok());
        assert_eq!(
            batch.values,
            vec![Some("va".to_string()), Some("vb".to_string()), None]
        );
        assert_eq!(store.requested_keys(), vec![keys(&["a", "b", "c"])]);
    }

    #[tokio::test]
    async fn test_per_key_cache_failure_degrades_that_key_only() {
        let store = seeded_store(&[("a", "va"), ("b", "vb")]).await;
        let cache = FakeCache::new()
            .with_raw("a", encoded("va"))
            .with_raw("b", encoded("vb"))
            .with_failing_key("b");
        let codec = JsonCodec::<String>::new();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&keys(&["a", "b"])).await;

        assert_eq!(
            batch.values,
            vec![Some("va".to_string()), Some("vb".to_string())]
        );
        assert_eq!(store.requested_keys(), vec![keys(&["b"])]);
    }

    #[tokio::test]
    async fn test_store_error_is_surfaced_with_cache_hits() {
        let store = seeded_store(&[("a", "va")]).await;
        store.fail_next(StoreOperation::Get, DomainError::store("datastore timeout"));
        let cache = FakeCache::new().with_raw("a", encoded("va"));
        let codec = JsonCodec::<String>::new();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&keys(&["a", "b"])).await;

        assert_eq!(batch.values, vec![Some("va".to_string()), None]);
        assert_eq!(batch.error, Some(DomainError::store("datastore timeout")));
    }

    #[tokio::test]
    async fn test_fill_uses_entry_ttl() {
        let store = seeded_store(&[("a", "va")]).await;
        let codec = JsonCodec::<String>::new();
        let ttl = Duration::from_secs(90);

        let mut cache = MockCache::new();
        cache.expect_backend_name().return_const("mock");
        cache
            .expect_get_multi()
            .times(1)
            .returning(|keys| Ok(vec![None; keys.len()]));
        cache
            .expect_set_multi()
            .times(1)
            .withf(move |items| {
                items.len() == 1
                    && items[0].key == StorageKey::from("a")
                    && items[0].ttl == Some(Duration::from_secs(90))
            })
            .returning(|items| Ok(vec![KeyOutcome::Done; items.len()]));
        cache.expect_delete_multi().never();

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec).with_entry_ttl(Some(ttl));
        let batch = reducer.get(&keys(&["a"])).await;

        assert_eq!(batch.values, vec![Some("va".to_string())]);
    }

    #[tokio::test]
    async fn test_fill_failure_is_absorbed() {
        let store = seeded_store(&[("a", "va")]).await;
        let codec = JsonCodec::<String>::new();

        let mut cache = MockCache::new();
        cache.expect_backend_name().return_const("mock");
        cache
            .expect_get_multi()
            .returning(|keys| Ok(vec![None; keys.len()]));
        cache
            .expect_set_multi()
            .returning(|_| Err(DomainError::cache_unavailable("write timeout")));

        let reducer = CacheGetReducer::<String, String>::new(&store, &cache, &codec);
        let batch = reducer.get(&keys(&["a"])).await;

        assert!(batch.is_ok());
        assert_eq!(batch.values, vec![Some("va".to_string())]);
    }
}

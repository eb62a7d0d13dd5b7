//! Caching proxy in front of a transactional store

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::ProxyConfig;
use crate::domain::{
    ignore_misses, BatchGet, Cache, DomainError, PassthroughRequest, Record, RecordKey,
    StorageKey, TransactionalStore, TxHandle,
};
use crate::infrastructure::cache::CacheFactory;
use crate::infrastructure::metrics;

use super::codec::{EntityCodec, JsonCodec};
use super::flusher::CommitFlusher;
use super::operation::{Operation, Reply};
use super::reducer::CacheGetReducer;
use super::registry::TransactionRegistry;

/// Tuning knobs for [`ProxyContext`]
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyOptions {
    /// Lifetime of entries the proxy writes; `None` uses the cache default
    pub entry_ttl: Option<Duration>,
    /// Attempts made by `run_in_transaction` when commit conflicts
    pub max_attempts: u32,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            entry_ttl: None,
            max_attempts: 3,
        }
    }
}

impl ProxyOptions {
    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = Some(ttl);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

impl From<&ProxyConfig> for ProxyOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            entry_ttl: Some(config.cache.default_ttl()),
            max_attempts: config.transactions.max_attempts,
        }
    }
}

/// Drop-in replacement for a [`TransactionalStore`] that serves
/// non-transactional reads through a second-level cache.
///
/// Reads inside a transaction always go to the store; their results and the
/// transaction's writes are staged per transaction and applied to the cache
/// only after a successful commit. Writes invalidate, never update, cached
/// entries.
pub struct ProxyContext<K, V> {
    store: Arc<dyn TransactionalStore<K, V>>,
    cache: Arc<dyn Cache>,
    codec: Arc<dyn EntityCodec<V>>,
    registry: TransactionRegistry<V>,
    options: ProxyOptions,
}

impl<K, V> fmt::Debug for ProxyContext<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyContext")
            .field("cache", &self.cache)
            .field("codec", &self.codec)
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish()
    }
}

impl<K, V> ProxyContext<K, V>
where
    K: RecordKey,
    V: Record,
{
    pub fn new(store: Arc<dyn TransactionalStore<K, V>>, cache: Arc<dyn Cache>) -> Self {
        Self {
            store,
            cache,
            codec: Arc::new(JsonCodec::new()),
            registry: TransactionRegistry::new(),
            options: ProxyOptions::default(),
        }
    }

    /// Builds a proxy whose cache backend is chosen by configuration
    pub async fn from_config(
        store: Arc<dyn TransactionalStore<K, V>>,
        config: &ProxyConfig,
    ) -> Result<Self, DomainError> {
        let cache = CacheFactory::new().create(&config.cache).await?;
        Ok(Self::new(store, cache).with_options(ProxyOptions::from(config)))
    }

    pub fn with_codec(mut self, codec: Arc<dyn EntityCodec<V>>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_options(mut self, options: ProxyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn TransactionalStore<K, V>> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Whether `tx` is a live transaction begun through this proxy
    pub fn is_in_transaction(&self, tx: &TxHandle) -> bool {
        self.registry.is_active(tx)
    }

    pub fn active_transactions(&self) -> usize {
        self.registry.active_count()
    }

    /// Routes one operation to its handler
    pub async fn call(&self, operation: Operation<K, V>) -> Result<Reply<K, V>, DomainError> {
        match operation {
            Operation::Get { tx, keys } => Ok(Reply::Get(self.get(tx.as_ref(), &keys).await)),
            Operation::Put { tx, records } => {
                self.put(tx.as_ref(), records).await.map(Reply::Put)
            }
            Operation::Delete { tx, keys } => {
                self.delete(tx.as_ref(), &keys).await.map(|()| Reply::Delete)
            }
            Operation::BeginTransaction => {
                self.begin_transaction().await.map(Reply::BeginTransaction)
            }
            Operation::Commit(tx) => self.commit(&tx).await.map(|()| Reply::Commit),
            Operation::Rollback(tx) => self.rollback(&tx).await.map(|()| Reply::Rollback),
            Operation::Other { tx, request } => {
                self.passthrough(tx.as_ref(), request).await.map(Reply::Other)
            }
        }
    }

    /// Reads a batch of keys. Outside a transaction the cache is consulted
    /// first; inside one the store is read directly and the results are
    /// staged as pending cache fills.
    pub async fn get(&self, tx: Option<&TxHandle>, keys: &[K]) -> BatchGet<V> {
        match tx {
            None => self.reducer().get(keys).await,
            Some(tx) => self.get_in_transaction(tx, keys).await,
        }
    }

    async fn get_in_transaction(&self, tx: &TxHandle, keys: &[K]) -> BatchGet<V> {
        if let Err(e) = self.registry.ensure_active(tx) {
            self.violation(&e);
            return BatchGet::failed(keys.len(), e);
        }

        let mut batch = self.store.get(Some(tx), keys).await;

        // A failed batch cannot tell absence apart from an unread slot, so
        // only values actually returned are staged
        let complete = batch.is_ok();
        let reads = keys
            .iter()
            .zip(&batch.values)
            .filter(|(_, value)| complete || value.is_some())
            .map(|(key, value)| (key.storage_key(), value.clone()))
            .collect();

        if let Err(e) = self.registry.record_reads(tx, reads) {
            self.violation(&e);
            batch.error.get_or_insert(e);
        }

        batch
    }

    /// Writes records to the store, then invalidates their cache entries
    /// (immediately, or at commit when inside a transaction)
    pub async fn put(
        &self,
        tx: Option<&TxHandle>,
        records: Vec<(K, V)>,
    ) -> Result<Vec<K>, DomainError> {
        self.check_transaction(tx)?;

        let requested: Vec<StorageKey> = records
            .iter()
            .filter(|(key, _)| !key.is_incomplete())
            .map(|(key, _)| key.storage_key())
            .collect();

        match self.store.put(tx, records).await {
            Ok(written) => {
                let keys = written.iter().map(RecordKey::storage_key).collect();
                self.invalidate(tx, keys).await?;
                Ok(written)
            }
            Err(e) => {
                // The store may have applied part of the batch
                if let Err(violation) = self.invalidate(tx, requested).await {
                    debug!(error = %violation, "caching: invalidation after failed put skipped");
                }
                Err(e)
            }
        }
    }

    /// Deletes keys from the store, then invalidates their cache entries
    pub async fn delete(&self, tx: Option<&TxHandle>, keys: &[K]) -> Result<(), DomainError> {
        self.check_transaction(tx)?;

        let result = self.store.delete(tx, keys).await;
        let storage_keys = keys.iter().map(RecordKey::storage_key).collect();

        match result {
            Ok(()) => self.invalidate(tx, storage_keys).await,
            Err(e) => {
                if let Err(violation) = self.invalidate(tx, storage_keys).await {
                    debug!(error = %violation, "caching: invalidation after failed delete skipped");
                }
                Err(e)
            }
        }
    }

    /// Starts a store transaction and registers an empty buffer for it
    pub async fn begin_transaction(&self) -> Result<TxHandle, DomainError> {
        let tx = self.store.begin_transaction().await?;

        if let Err(e) = self.registry.begin(&tx) {
            self.violation(&e);
            return Err(e);
        }

        debug!(tx = %tx, "caching: transaction started");
        Ok(tx)
    }

    /// Commits `tx` and, only if the store accepts it, applies the staged
    /// cache effects. The buffer is discarded either way.
    pub async fn commit(&self, tx: &TxHandle) -> Result<(), DomainError> {
        let buffer = self.registry.take(tx).inspect_err(|e| self.violation(e))?;

        if let Err(e) = self.store.commit(tx).await {
            debug!(tx = %tx, error = %e, "caching: commit failed, discarding buffer");
            return Err(e);
        }

        self.flusher().flush(tx, buffer).await;
        Ok(())
    }

    /// Rolls back `tx`; its buffer is discarded whatever the store answers
    pub async fn rollback(&self, tx: &TxHandle) -> Result<(), DomainError> {
        let taken = self.registry.take(tx);
        let result = self.store.rollback(tx).await;

        match taken {
            Ok(buffer) => {
                debug!(tx = %tx, discarded = buffer.len(), "caching: transaction rolled back");
                result
            }
            Err(e) => {
                self.violation(&e);
                result.and(Err(e))
            }
        }
    }

    /// Forwards an operation the cache does not interpret
    pub async fn passthrough(
        &self,
        tx: Option<&TxHandle>,
        request: PassthroughRequest,
    ) -> Result<serde_json::Value, DomainError> {
        self.store.passthrough(tx, request).await
    }

    fn reducer(&self) -> CacheGetReducer<'_, K, V> {
        CacheGetReducer::new(self.store.as_ref(), self.cache.as_ref(), self.codec.as_ref())
            .with_entry_ttl(self.options.entry_ttl)
    }

    fn flusher(&self) -> CommitFlusher<'_, V> {
        CommitFlusher::new(self.cache.as_ref(), self.codec.as_ref())
            .with_entry_ttl(self.options.entry_ttl)
    }

    fn check_transaction(&self, tx: Option<&TxHandle>) -> Result<(), DomainError> {
        match tx {
            Some(tx) => self.registry.ensure_active(tx).inspect_err(|e| self.violation(e)),
            None => Ok(()),
        }
    }

    async fn invalidate(
        &self,
        tx: Option<&TxHandle>,
        keys: Vec<StorageKey>,
    ) -> Result<(), DomainError> {
        if keys.is_empty() {
            return Ok(());
        }

        if let Some(tx) = tx {
            return self
                .registry
                .record_tombstones(tx, keys)
                .inspect_err(|e| self.violation(e));
        }

        let result = self
            .cache
            .delete_multi(&keys)
            .await
            .and_then(|outcomes| ignore_misses(&keys, &outcomes));

        match result {
            Ok(()) => metrics::record_invalidations(keys.len()),
            Err(e) => {
                warn!(
                    backend = self.cache.backend_name(),
                    error = %e,
                    "caching: delete_multi failed"
                );
                metrics::record_cache_error("delete_multi");
            }
        }

        Ok(())
    }

    fn violation(&self, e: &DomainError) {
        error!(error = %e, "caching: protocol violation");
        metrics::record_protocol_violation();
    }
}

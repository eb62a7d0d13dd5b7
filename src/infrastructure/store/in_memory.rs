//! In-memory transactional store

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::{
    BatchGet, DomainError, PassthroughRequest, Record, RecordKey, StorageKey, TransactionalStore,
    TxHandle,
};

/// Store operations that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    Put,
    Delete,
    Begin,
    Commit,
    Rollback,
}

struct Transaction<V> {
    start: u64,
    snapshot: HashMap<StorageKey, V>,
    reads: HashSet<StorageKey>,
    writes: HashMap<StorageKey, Option<V>>,
}

struct State<K, V> {
    committed: HashMap<StorageKey, V>,
    /// Commit clock value of the last write to each key
    versions: HashMap<StorageKey, u64>,
    clock: u64,
    next_tx: u64,
    next_id: i64,
    transactions: HashMap<TxHandle, Transaction<V>>,
    failures: HashMap<StoreOperation, DomainError>,
    requested: Vec<Vec<K>>,
}

impl<K, V> Default for State<K, V> {
    fn default() -> Self {
        Self {
            committed: HashMap::new(),
            versions: HashMap::new(),
            clock: 0,
            next_tx: 1,
            next_id: 1,
            transactions: HashMap::new(),
            failures: HashMap::new(),
            requested: Vec::new(),
        }
    }
}

impl<K, V> State<K, V> {
    fn take_failure(&mut self, operation: StoreOperation) -> Result<(), DomainError> {
        match self.failures.remove(&operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn transaction(&mut self, tx: &TxHandle) -> Result<&mut Transaction<V>, DomainError> {
        self.transactions
            .get_mut(tx)
            .ok_or_else(|| DomainError::store(format!("unknown transaction {}", tx)))
    }

    fn apply(&mut self, writes: HashMap<StorageKey, Option<V>>) {
        self.clock += 1;
        for (key, value) in writes {
            self.versions.insert(key.clone(), self.clock);
            match value {
                Some(value) => self.committed.insert(key, value),
                None => self.committed.remove(&key),
            };
        }
    }
}

/// Thread-safe transactional store kept in memory.
///
/// Transactions read from a snapshot taken when they begin (plus their own
/// writes) and are validated at commit: if any key they read or wrote was
/// committed by someone else in the meantime, the commit fails with
/// [`DomainError::Conflict`]. Data is lost when the process terminates.
pub struct InMemoryStore<K, V> {
    state: Mutex<State<K, V>>,
    _key: PhantomData<fn() -> K>,
}

impl<K, V> Default for InMemoryStore<K, V> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            _key: PhantomData,
        }
    }
}

impl<K, V> Debug for InMemoryStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (entries, transactions) = self
            .state
            .lock()
            .map(|s| (s.committed.len(), s.transactions.len()))
            .unwrap_or_default();
        f.debug_struct("InMemoryStore")
            .field("entries", &entries)
            .field("transactions", &transactions)
            .finish()
    }
}

impl<K, V> InMemoryStore<K, V>
where
    K: RecordKey,
    V: Record,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State<K, V>>, DomainError> {
        self.state
            .lock()
            .map_err(|e| DomainError::store(format!("Failed to acquire store lock: {}", e)))
    }

    /// Makes the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: StoreOperation, error: DomainError) {
        if let Ok(mut state) = self.lock() {
            state.failures.insert(operation, error);
        }
    }

    /// Committed value of `key`, bypassing any transaction
    pub fn committed(&self, key: &K) -> Option<V> {
        self.lock()
            .ok()
            .and_then(|state| state.committed.get(&key.storage_key()).cloned())
    }

    /// Key batches received by `get`, oldest first
    pub fn requested_keys(&self) -> Vec<Vec<K>> {
        self.lock().map(|s| s.requested.clone()).unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        if let Ok(mut state) = self.lock() {
            state.requested.clear();
        }
    }

    pub fn open_transactions(&self) -> usize {
        self.lock().map(|s| s.transactions.len()).unwrap_or(0)
    }

    fn complete_keys(state: &mut State<K, V>, records: Vec<(K, V)>) -> Vec<(K, V)> {
        records
            .into_iter()
            .map(|(key, value)| {
                if key.is_incomplete() {
                    let id = state.next_id;
                    state.next_id += 1;
                    (key.with_allocated_id(id), value)
                } else {
                    (key, value)
                }
            })
            .collect()
    }
}

#[async_trait]
impl<K, V> TransactionalStore<K, V> for InMemoryStore<K, V>
where
    K: RecordKey,
    V: Record,
{
    async fn get(&self, tx: Option<&TxHandle>, keys: &[K]) -> BatchGet<V> {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => return BatchGet::failed(keys.len(), e),
        };

        state.requested.push(keys.to_vec());
        if let Err(e) = state.take_failure(StoreOperation::Get) {
            return BatchGet::failed(keys.len(), e);
        }

        let storage_keys: Vec<StorageKey> = keys.iter().map(RecordKey::storage_key).collect();

        match tx {
            None => BatchGet::ok(
                storage_keys
                    .iter()
                    .map(|key| state.committed.get(key).cloned())
                    .collect(),
            ),
            Some(tx) => {
                let transaction = match state.transaction(tx) {
                    Ok(transaction) => transaction,
                    Err(e) => return BatchGet::failed(keys.len(), e),
                };

                let values = storage_keys
                    .into_iter()
                    .map(|key| {
                        let value = match transaction.writes.get(&key) {
                            Some(written) => written.clone(),
                            None => transaction.snapshot.get(&key).cloned(),
                        };
                        transaction.reads.insert(key);
                        value
                    })
                    .collect();

                BatchGet::ok(values)
            }
        }
    }

    async fn put(
        &self,
        tx: Option<&TxHandle>,
        records: Vec<(K, V)>,
    ) -> Result<Vec<K>, DomainError> {
        let mut state = self.lock()?;
        state.take_failure(StoreOperation::Put)?;

        let records = Self::complete_keys(&mut state, records);
        let keys: Vec<K> = records.iter().map(|(key, _)| key.clone()).collect();
        let writes = records
            .into_iter()
            .map(|(key, value)| (key.storage_key(), Some(value)));

        match tx {
            None => state.apply(writes.collect()),
            Some(tx) => state.transaction(tx)?.writes.extend(writes),
        }

        Ok(keys)
    }

    async fn delete(&self, tx: Option<&TxHandle>, keys: &[K]) -> Result<(), DomainError> {
        let mut state = self.lock()?;
        state.take_failure(StoreOperation::Delete)?;

        let writes = keys.iter().map(|key| (key.storage_key(), None));

        match tx {
            None => state.apply(writes.collect()),
            Some(tx) => state.transaction(tx)?.writes.extend(writes),
        }

        Ok(())
    }

    async fn begin_transaction(&self) -> Result<TxHandle, DomainError> {
        let mut state = self.lock()?;
        state.take_failure(StoreOperation::Begin)?;

        let tx = TxHandle::new(state.next_tx);
        state.next_tx += 1;

        let transaction = Transaction {
            start: state.clock,
            snapshot: state.committed.clone(),
            reads: HashSet::new(),
            writes: HashMap::new(),
        };
        state.transactions.insert(tx, transaction);

        Ok(tx)
    }

    async fn commit(&self, tx: &TxHandle) -> Result<(), DomainError> {
        let mut state = self.lock()?;

        let transaction = state
            .transactions
            .remove(tx)
            .ok_or_else(|| DomainError::store(format!("unknown transaction {}", tx)))?;
        state.take_failure(StoreOperation::Commit)?;

        let conflict = transaction
            .reads
            .iter()
            .chain(transaction.writes.keys())
            .find(|key| state.versions.get(*key).is_some_and(|v| *v > transaction.start));

        if let Some(key) = conflict {
            return Err(DomainError::conflict(format!(
                "key '{}' was modified concurrently ({})",
                key, tx
            )));
        }

        if !transaction.writes.is_empty() {
            state.apply(transaction.writes);
        }

        Ok(())
    }

    async fn rollback(&self, tx: &TxHandle) -> Result<(), DomainError> {
        let mut state = self.lock()?;

        let removed = state.transactions.remove(tx);
        state.take_failure(StoreOperation::Rollback)?;

        match removed {
            Some(_) => Ok(()),
            None => Err(DomainError::store(format!("unknown transaction {}", tx))),
        }
    }

    async fn passthrough(
        &self,
        tx: Option<&TxHandle>,
        request: PassthroughRequest,
    ) -> Result<serde_json::Value, DomainError> {
        let mut state = self.lock()?;

        match request.method.as_str() {
            "count" => {
                let count = match tx {
                    None => state.committed.len(),
                    Some(tx) => {
                        let transaction = state.transaction(tx)?;
                        let mut keys: HashSet<&StorageKey> = transaction.snapshot.keys().collect();
                        for (key, value) in &transaction.writes {
                            if value.is_some() {
                                keys.insert(key);
                            } else {
                                keys.remove(key);
                            }
                        }
                        keys.len()
                    }
                };
                Ok(serde_json::json!(count))
            }
            other => Err(DomainError::store(format!(
                "unsupported operation '{}'",
                other
            ))),
        }
    }
}

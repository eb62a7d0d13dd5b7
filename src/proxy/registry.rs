//! Per-transaction staging of pending cache effects

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::{Mutex, MutexGuard};

use crate::domain::{DomainError, StorageKey, TxHandle};

/// Cache effect applied when the owning transaction commits
#[derive(Debug, Clone, PartialEq)]
pub enum PendingEffect<V> {
    /// Value observed inside the transaction, written to the cache on commit
    Fill(V),
    /// Entry written or deleted inside the transaction, evicted on commit
    Tombstone,
}

/// Staging area for one transaction; the latest effect per key wins
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionBuffer<V> {
    entries: HashMap<StorageKey, PendingEffect<V>>,
}

impl<V> Default for TransactionBuffer<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> TransactionBuffer<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a read result; an absent record becomes a tombstone
    pub fn record_read(&mut self, key: StorageKey, value: Option<V>) {
        let effect = match value {
            Some(value) => PendingEffect::Fill(value),
            None => PendingEffect::Tombstone,
        };
        self.entries.insert(key, effect);
    }

    pub fn record_tombstone(&mut self, key: StorageKey) {
        self.entries.insert(key, PendingEffect::Tombstone);
    }

    pub fn get(&self, key: &StorageKey) -> Option<&PendingEffect<V>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Splits the buffer into keys to evict and values to store
    pub fn partition(self) -> (Vec<StorageKey>, Vec<(StorageKey, V)>) {
        let mut tombstones = Vec::new();
        let mut fills = Vec::with_capacity(self.entries.len());

        for (key, effect) in self.entries {
            match effect {
                PendingEffect::Tombstone => tombstones.push(key),
                PendingEffect::Fill(value) => fills.push((key, value)),
            }
        }

        (tombstones, fills)
    }
}

/// Maps live transaction handles to their buffers.
///
/// The lock is only held while a buffer is inserted, mutated or removed,
/// never across a store or cache call.
pub struct TransactionRegistry<V> {
    buffers: Mutex<HashMap<TxHandle, TransactionBuffer<V>>>,
}

impl<V> Default for TransactionRegistry<V> {
    fn default() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Debug for TransactionRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.buffers.lock().map(|b| b.len()).unwrap_or_default();
        f.debug_struct("TransactionRegistry")
            .field("active", &active)
            .finish()
    }
}

impl<V> TransactionRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TxHandle, TransactionBuffer<V>>>, DomainError> {
        self.buffers.lock().map_err(|e| {
            DomainError::internal(format!("Failed to acquire transaction registry lock: {}", e))
        })
    }

    /// Allocates an empty buffer for a freshly started transaction
    pub fn begin(&self, tx: &TxHandle) -> Result<(), DomainError> {
        let mut buffers = self.lock()?;

        if buffers.contains_key(tx) {
            return Err(DomainError::protocol_violation(format!(
                "transaction already started ({})",
                tx
            )));
        }

        buffers.insert(*tx, TransactionBuffer::new());
        Ok(())
    }

    /// Records the results of a read issued inside `tx`
    pub fn record_reads(
        &self,
        tx: &TxHandle,
        reads: Vec<(StorageKey, Option<V>)>,
    ) -> Result<(), DomainError> {
        self.with_buffer(tx, |buffer| {
            for (key, value) in reads {
                buffer.record_read(key, value);
            }
        })
    }

    /// Records writes or deletes issued inside `tx`
    pub fn record_tombstones(&self, tx: &TxHandle, keys: Vec<StorageKey>) -> Result<(), DomainError> {
        self.with_buffer(tx, |buffer| {
            for key in keys {
                buffer.record_tombstone(key);
            }
        })
    }

    /// Fails with a protocol violation unless `tx` is active
    pub fn ensure_active(&self, tx: &TxHandle) -> Result<(), DomainError> {
        if self.lock()?.contains_key(tx) {
            Ok(())
        } else {
            Err(unknown_transaction(tx))
        }
    }

    /// Removes and returns the buffer for `tx`, ending its registration
    pub fn take(&self, tx: &TxHandle) -> Result<TransactionBuffer<V>, DomainError> {
        self.lock()?.remove(tx).ok_or_else(|| unknown_transaction(tx))
    }

    pub fn is_active(&self, tx: &TxHandle) -> bool {
        self.lock().map(|b| b.contains_key(tx)).unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn with_buffer<F>(&self, tx: &TxHandle, apply: F) -> Result<(), DomainError>
    where
        F: FnOnce(&mut TransactionBuffer<V>),
    {
        let mut buffers = self.lock()?;
        let buffer = buffers.get_mut(tx).ok_or_else(|| unknown_transaction(tx))?;
        apply(buffer);
        Ok(())
    }
}

fn unknown_transaction(tx: &TxHandle) -> DomainError {
    DomainError::protocol_violation(format!("no transaction for {}", tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(name: &str) -> StorageKey {
        StorageKey::from(name)
    }

    #[test]
    fn test_latest_effect_wins() {
        let mut buffer = TransactionBuffer::new();
        buffer.record_read(key("k"), Some(1));
        buffer.record_tombstone(key("k"));
        assert_eq!(buffer.get(&key("k")), Some(&PendingEffect::Tombstone));

        buffer.record_read(key("k"), Some(3));
        assert_eq!(buffer.get(&key("k")), Some(&PendingEffect::Fill(3)));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_absent_read_becomes_tombstone() {
        let mut buffer: TransactionBuffer<i32> = TransactionBuffer::new();
        buffer.record_read(key("gone"), None);

        assert_eq!(buffer.get(&key("gone")), Some(&PendingEffect::Tombstone));
    }

    #[test]
    fn test_partition() {
        let mut buffer = TransactionBuffer::new();
        buffer.record_read(key("a"), Some("va"));
        buffer.record_tombstone(key("b"));
        buffer.record_read(key("c"), Some("vc"));

        let (tombstones, mut fills) = buffer.partition();
        fills.sort_by(|x, y| x.0.cmp(&y.0));

        assert_eq!(tombstones, vec![key("b")]);
        assert_eq!(fills, vec![(key("a"), "va"), (key("c"), "vc")]);
    }

    #[test]
    fn test_begin_twice_is_protocol_violation() {
        let registry: TransactionRegistry<i32> = TransactionRegistry::new();
        let tx = TxHandle::new(1);

        registry.begin(&tx).unwrap();
        registry.record_tombstones(&tx, vec![key("a")]).unwrap();

        let error = registry.begin(&tx).unwrap_err();
        assert!(matches!(error, DomainError::ProtocolViolation { .. }));

        // The live buffer is left untouched
        assert_eq!(registry.take(&tx).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_handle_is_protocol_violation() {
        let registry: TransactionRegistry<i32> = TransactionRegistry::new();
        let tx = TxHandle::new(9);

        assert!(registry.ensure_active(&tx).is_err());
        assert!(registry.record_reads(&tx, vec![(key("a"), Some(1))]).is_err());
        assert!(registry.record_tombstones(&tx, vec![key("a")]).is_err());
        assert!(registry.take(&tx).is_err());
    }

    #[test]
    fn test_take_ends_registration() {
        let registry: TransactionRegistry<i32> = TransactionRegistry::new();
        let tx = TxHandle::new(2);

        registry.begin(&tx).unwrap();
        assert!(registry.is_active(&tx));

        registry.take(&tx).unwrap();
        assert!(!registry.is_active(&tx));
        assert!(registry.take(&tx).is_err());
    }

    #[test]
    fn test_buffers_are_isolated() {
        let registry: TransactionRegistry<&str> = TransactionRegistry::new();
        let t1 = TxHandle::new(1);
        let t2 = TxHandle::new(2);
        registry.begin(&t1).unwrap();
        registry.begin(&t2).unwrap();

        registry.record_reads(&t1, vec![(key("k"), Some("one"))]).unwrap();
        registry.record_tombstones(&t2, vec![key("k")]).unwrap();

        let b1 = registry.take(&t1).unwrap();
        assert_eq!(b1.get(&key("k")), Some(&PendingEffect::Fill("one")));
        assert!(registry.is_active(&t2));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_concurrent_transactions() {
        let registry: Arc<TransactionRegistry<usize>> = Arc::new(TransactionRegistry::new());

        let handles: Vec<_> = (0..8u64)
            .map(|n| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let tx = TxHandle::new(n);
                    registry.begin(&tx).unwrap();
                    for i in 0..100 {
                        registry
                            .record_reads(&tx, vec![(key(&format!("k{}", i % 10)), Some(i))])
                            .unwrap();
                    }
                    registry.take(&tx).unwrap()
                })
            })
            .collect();

        for handle in handles {
            let buffer = handle.join().unwrap();
            assert_eq!(buffer.len(), 10);
            assert_eq!(buffer.get(&key("k9")), Some(&PendingEffect::Fill(99)));
        }
        assert_eq!(registry.active_count(), 0);
    }
}

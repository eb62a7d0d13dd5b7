//! Primary store contract

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

use super::entity::Record;
use super::key::RecordKey;

/// Opaque token scoped to one Begin..Commit-or-Rollback cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle(u64);

impl TxHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Result of a batched read: one slot per requested key plus an optional
/// batch-level error.
///
/// A batch may be partially successful, so slots can hold values even when
/// `error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGet<V> {
    pub values: Vec<Option<V>>,
    pub error: Option<DomainError>,
}

impl<V> BatchGet<V> {
    pub fn ok(values: Vec<Option<V>>) -> Self {
        Self {
            values,
            error: None,
        }
    }

    /// A batch in which every slot is unresolved
    pub fn failed(len: usize, error: DomainError) -> Self {
        Self {
            values: std::iter::repeat_with(|| None).take(len).collect(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Discards partial results when the batch carries an error
    pub fn into_result(self) -> Result<Vec<Option<V>>, DomainError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.values),
        }
    }
}

/// A store operation the proxy does not interpret (queries, iteration, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassthroughRequest {
    pub method: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PassthroughRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Authoritative transactional key-value store.
///
/// `tx` selects the transaction an operation runs in; `None` runs it outside
/// any transaction.
#[async_trait]
pub trait TransactionalStore<K, V>: Send + Sync
where
    K: RecordKey,
    V: Record,
{
    /// Reads a batch of keys, one result slot per key in request order
    async fn get(&self, tx: Option<&TxHandle>, keys: &[K]) -> BatchGet<V>;

    /// Writes a batch of records, returning the keys actually written
    /// (incomplete keys come back with their allocated identifiers)
    async fn put(&self, tx: Option<&TxHandle>, records: Vec<(K, V)>)
        -> Result<Vec<K>, DomainError>;

    /// Deletes a batch of keys
    async fn delete(&self, tx: Option<&TxHandle>, keys: &[K]) -> Result<(), DomainError>;

    /// Starts a new transaction
    async fn begin_transaction(&self) -> Result<TxHandle, DomainError>;

    /// Commits a transaction
    async fn commit(&self, tx: &TxHandle) -> Result<(), DomainError>;

    /// Rolls back a transaction
    async fn rollback(&self, tx: &TxHandle) -> Result<(), DomainError>;

    /// Executes an operation the caching layer does not intercept
    async fn passthrough(
        &self,
        tx: Option<&TxHandle>,
        request: PassthroughRequest,
    ) -> Result<serde_json::Value, DomainError>;
}

//! Closed set of storage operations routed by the proxy

use crate::domain::{BatchGet, PassthroughRequest, TxHandle};

/// Operation kind, decided once from a method name at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Get,
    Put,
    Delete,
    BeginTransaction,
    Commit,
    Rollback,
    Other,
}

impl OperationKind {
    /// Maps a store method name to its kind; anything unrecognised passes
    /// through untouched
    pub fn from_method(method: &str) -> Self {
        match method {
            "Get" => Self::Get,
            "Put" => Self::Put,
            "Delete" => Self::Delete,
            "BeginTransaction" => Self::BeginTransaction,
            "Commit" => Self::Commit,
            "Rollback" => Self::Rollback,
            _ => Self::Other,
        }
    }

    /// Whether the caching layer handles this kind itself
    pub fn is_intercepted(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::BeginTransaction => "begin_transaction",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A storage call addressed to the proxy
#[derive(Debug, Clone, PartialEq)]
pub enum Operation<K, V> {
    Get {
        tx: Option<TxHandle>,
        keys: Vec<K>,
    },
    Put {
        tx: Option<TxHandle>,
        records: Vec<(K, V)>,
    },
    Delete {
        tx: Option<TxHandle>,
        keys: Vec<K>,
    },
    BeginTransaction,
    Commit(TxHandle),
    Rollback(TxHandle),
    /// Queries, iteration and anything else the cache does not touch
    Other {
        tx: Option<TxHandle>,
        request: PassthroughRequest,
    },
}

impl<K, V> Operation<K, V> {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Get { .. } => OperationKind::Get,
            Self::Put { .. } => OperationKind::Put,
            Self::Delete { .. } => OperationKind::Delete,
            Self::BeginTransaction => OperationKind::BeginTransaction,
            Self::Commit(_) => OperationKind::Commit,
            Self::Rollback(_) => OperationKind::Rollback,
            Self::Other { .. } => OperationKind::Other,
        }
    }

    /// The transaction the operation runs in, if any
    pub fn transaction(&self) -> Option<&TxHandle> {
        match self {
            Self::Get { tx, .. }
            | Self::Put { tx, .. }
            | Self::Delete { tx, .. }
            | Self::Other { tx, .. } => tx.as_ref(),
            Self::Commit(tx) | Self::Rollback(tx) => Some(tx),
            Self::BeginTransaction => None,
        }
    }
}

/// Response to an [`Operation`], mirroring the store's results
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<K, V> {
    Get(BatchGet<V>),
    /// Keys acknowledged by the store
    Put(Vec<K>),
    Delete,
    BeginTransaction(TxHandle),
    Commit,
    Rollback,
    Other(serde_json::Value),
}

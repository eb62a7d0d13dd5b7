//! Domain layer - store and cache contracts, keys, records and errors

pub mod cache;
pub mod error;
pub mod storage;

pub use cache::{ignore_misses, Cache, CacheItem, KeyOutcome};
pub use error::DomainError;
pub use storage::{
    BatchGet, EntityKey, KeyId, PassthroughRequest, Record, RecordKey, StorageKey,
    TransactionalStore, TxHandle,
};

//! Transactional caching proxy
//!
//! A drop-in layer in front of a transactional key-value store that:
//! - serves non-transactional batch reads through a second-level cache
//! - invalidates cached entries on every write
//! - stages cache effects of a transaction until it commits
//! - forwards everything else to the store untouched

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod proxy;

pub use config::ProxyConfig;
pub use domain::{
    BatchGet, Cache, DomainError, EntityKey, PassthroughRequest, Record, RecordKey, StorageKey,
    TransactionalStore, TxHandle,
};
pub use proxy::{Operation, ProxyContext, ProxyOptions, Reply};

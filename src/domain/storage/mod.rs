//! Storage domain - primary store contract, keys and records

mod entity;
mod key;
mod repository;

pub use entity::Record;
pub use key::{EntityKey, KeyId, RecordKey, StorageKey};
pub use repository::{BatchGet, PassthroughRequest, TransactionalStore, TxHandle};

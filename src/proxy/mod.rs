//! Caching proxy - read-through, write-invalidate layer over a
//! transactional store

pub mod codec;
pub mod context;
pub mod flusher;
pub mod operation;
pub mod reducer;
pub mod registry;
mod transaction;


pub use codec::{EntityCodec, JsonCodec, CODEC_VERSION};
pub use context::{ProxyContext, ProxyOptions};
pub use flusher::{CommitFlusher, FlushReport};
pub use operation::{Operation, OperationKind, Reply};
pub use reducer::{reduce, CacheGetReducer};
pub use registry::{PendingEffect, TransactionBuffer, TransactionRegistry};

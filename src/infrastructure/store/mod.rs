//! Store infrastructure - primary store implementations

mod in_memory;

pub use in_memory::{InMemoryStore, StoreOperation};

//! Infrastructure: the connection pool, the pooled task repository, storage
//! backends, and default notification wiring.

pub mod in_memory;
pub mod notify;
pub mod pool;
pub mod repository;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;

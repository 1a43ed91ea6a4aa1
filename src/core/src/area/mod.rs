//! The key-value surface everything persists through.
//!
//! One flat namespace of string keys to JSON documents. There is no atomic
//! append, so every mutation above this layer is a read-modify-write.

mod memory;
mod sqlite;

pub use memory::MemoryArea;
pub use sqlite::SqliteArea;

use thiserror::Error;

/// Failure from a storage backend.
#[derive(Debug, Clone, Error)]
pub enum AreaError {
    /// The backend is out of space. Not transient; retrying cannot help.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("{0}")]
    Backend(String),
}

/// Whole-value key-value storage.
pub trait StorageArea: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AreaError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AreaError>;
    fn remove(&self, key: &str) -> Result<(), AreaError>;

    /// All keys starting with `prefix`, in no particular order.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, AreaError>;

    /// Total footprint: the summed byte lengths of every key and value.
    fn usage_bytes(&self) -> Result<u64, AreaError>;
}

//! Sidenote core: the storage layer behind the chat sidebar.
//!
//! Sessions, backups, per-tab sidebar state, settings, and the error log
//! all live in one flat key-value namespace owned by [`StorageManager`],
//! which answers the sidebar's request/response actions, keeps every record
//! class bounded, and recovers corrupted data instead of surfacing it.

pub mod area;
pub mod config;
pub mod error;
pub mod keys;
pub mod manager;
pub mod paths;
pub mod retry;

pub use area::{AreaError, MemoryArea, SqliteArea, StorageArea};
pub use config::{CoreConfig, StoragePolicy};
pub use error::StoreError;
pub use manager::{
    validate_message, ErrorEntry, Severity, StorageManager, TabProbe, MAX_MESSAGE_CHARS,
};
pub use retry::StorageIo;

//! Wire types for the Sidenote sidebar storage protocol.
//!
//! The presentation layer talks to the storage manager through a closed set
//! of actions carried in a JSON envelope. This crate defines that envelope
//! (`Request`, `Response`, `Sender`) and the record types that travel inside
//! it. It holds no behavior beyond serialization.

pub mod envelope;
pub mod types;

pub use envelope::{decode_request, DecodeError, Request, Response, Sender};
pub use types::{
    CleanupReport, ErrorReport, ImportReceipt, Message, MessageKind, MessageMeta, MessagePage,
    NewMessage, QuotaStatus, SaveReceipt, SessionBackup, SessionData, Settings, SidebarState,
    SidebarStateAck, SlimMessage, Snapshot, StorageCounts, StorageInfo, TabState, Theme,
    DATA_VERSION,
};

use thiserror::Error;

/// Errors surfaced to callers of the storage manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The payload failed validation; nothing was persisted.
    #[error("invalid data: {0}")]
    Validation(String),

    /// A write was rejected for space even after cleanup ran.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// A transient backend failure exhausted its retries.
    #[error("storage failed after {attempts} attempts: {last}")]
    Storage { attempts: u32, last: String },

    /// A record could not be encoded or decoded.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Stable tag for the error log.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Validation(_) => "validation_error",
            StoreError::QuotaExceeded => "quota_exceeded",
            StoreError::Storage { .. } => "storage_error",
            StoreError::Serialization(_) => "serialization_error",
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::StoreError;
use crate::keys;

use super::StorageManager;

/// Weight of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// An expected restriction, recorded as a notice.
    Info,
    Error,
}

impl Severity {
    /// Kinds prefixed `restricted` describe pages that refuse injection;
    /// those are expected, not faults.
    pub fn classify(kind: &str) -> Self {
        if kind.starts_with("restricted") {
            Severity::Info
        } else {
            Severity::Error
        }
    }
}

/// One persisted error-log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub severity: Severity,
}

impl StorageManager {
    /// Append to the error log, then prune it to the retention cap.
    ///
    /// Never fails upward; an entry that cannot be written is traced and
    /// dropped so logging cannot break the operation that produced it.
    pub(super) async fn log_error(
        &self,
        kind: &str,
        message: &str,
        stack: Option<String>,
        context: Map<String, Value>,
    ) {
        let entry = ErrorEntry {
            kind: kind.to_string(),
            message: message.to_string(),
            stack,
            timestamp: keys::now_ms(),
            context,
            severity: Severity::classify(kind),
        };
        if let Err(err) = self.try_log(&entry).await {
            warn!(kind, error = %err, "error log write failed");
        }
    }

    async fn try_log(&self, entry: &ErrorEntry) -> Result<(), StoreError> {
        let raw = serde_json::to_string(entry)?;
        self.io.set(&keys::error_key(entry.timestamp), &raw).await?;
        self.prune_error_log().await
    }

    /// Error-log keys oldest first; ties on the timestamp break on the
    /// random suffix, so the order is total.
    async fn error_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut stamped: Vec<(i64, String)> = self
            .io
            .keys(keys::ERROR_PREFIX)
            .await?
            .into_iter()
            .filter_map(|key| {
                let (ts, _) = keys::error_parts(&key)?;
                Some((ts, key))
            })
            .collect();
        stamped.sort();
        Ok(stamped.into_iter().map(|(_, key)| key).collect())
    }

    pub(super) async fn prune_error_log(&self) -> Result<(), StoreError> {
        let error_keys = self.error_keys().await?;
        let cap = self.policy.max_error_entries;
        if error_keys.len() <= cap {
            return Ok(());
        }
        for key in &error_keys[..error_keys.len() - cap] {
            self.io.remove(key).await?;
        }
        Ok(())
    }

    pub(super) async fn error_count(&self) -> Result<usize, StoreError> {
        Ok(self.io.keys(keys::ERROR_PREFIX).await?.len())
    }

    pub(super) async fn clear_error_log(&self) -> Result<(), StoreError> {
        for key in self.io.keys(keys::ERROR_PREFIX).await? {
            self.io.remove(&key).await?;
        }
        Ok(())
    }
}

//! The storage manager: owner of every persisted record.
//!
//! Serves the sidebar's request/response actions over one flat key-value
//! namespace of sessions, backups, tab states, settings, and the error log,
//! and runs the periodic maintenance that keeps all of them bounded.

mod backup;
mod dispatch;
mod errlog;
mod quota;
mod sessions;
mod settings;
mod tabs;
mod transfer;

pub use errlog::{ErrorEntry, Severity};
pub use sessions::{validate_message, MAX_MESSAGE_CHARS};
pub use tabs::TabProbe;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::area::{SqliteArea, StorageArea};
use crate::config::{CoreConfig, StoragePolicy};
use crate::retry::StorageIo;

/// Single owner of the storage namespace.
///
/// Every mutating flow is serialized behind one state lock taken at the
/// request boundary. Internal helpers never take the lock themselves, so
/// cleanup re-entered from a failing save cannot deadlock.
///
/// # Example interaction
///
/// ```json
/// -> { "action": "saveMessage", "data": { "content": "hello", "type": "user" } }
/// <- { "success": true, "data": { "messageId": "1718..-ab12cd34", "sessionId": "1718..-99ffee00" } }
/// ```
pub struct StorageManager {
    io: StorageIo,
    policy: StoragePolicy,
    probe: Option<Arc<dyn TabProbe>>,
    state: Mutex<()>,
}

impl StorageManager {
    pub fn new(area: Arc<dyn StorageArea>, policy: StoragePolicy) -> Self {
        let io = StorageIo::new(area, policy.retry_attempts, policy.retry_base_delay);
        Self {
            io,
            policy,
            probe: None,
            state: Mutex::new(()),
        }
    }

    /// Attach the host's live-tab query, enabling the tab-state sweep.
    pub fn with_probe(mut self, probe: Arc<dyn TabProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Open the configured database and build a manager over it.
    pub fn from_config(config: &CoreConfig) -> Result<Self, String> {
        let path = config.db_path()?;
        let area = SqliteArea::open(&path).map_err(|e| format!("failed to open storage: {e}"))?;
        Ok(Self::new(Arc::new(area), config.policy()))
    }

    pub fn policy(&self) -> &StoragePolicy {
        &self.policy
    }

    /// Start periodic maintenance: a tab-state sweep plus a retention pass
    /// over the error log and backups. Both are idempotent, so an early or
    /// repeated tick is harmless.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(manager.policy.sweep_interval);
            let mut retention = tokio::time::interval(manager.policy.retention_interval);
            // the first tick of an interval fires immediately
            sweep.tick().await;
            retention.tick().await;

            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        let _state = manager.state.lock().await;
                        if let Err(err) = manager.sweep_tab_states().await {
                            warn!(error = %err, "tab state sweep failed");
                        }
                    }
                    _ = retention.tick() => {
                        let _state = manager.state.lock().await;
                        if let Err(err) = manager.retention_pass().await {
                            warn!(error = %err, "retention pass failed");
                        }
                    }
                }
            }
        })
    }
}

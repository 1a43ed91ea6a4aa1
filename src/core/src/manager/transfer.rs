use sidenote_protocol::{ImportReceipt, Snapshot, DATA_VERSION};
use tracing::info;

use crate::error::StoreError;
use crate::keys;

use super::sessions::{trim_to, validate_message};
use super::StorageManager;

impl StorageManager {
    /// Bundle the settings and every session into one snapshot, most
    /// recently active session first. Corrupt records are recovered rather
    /// than skipped, so an export is always complete.
    pub(super) async fn export_data(&self) -> Result<Snapshot, StoreError> {
        let settings = self.load_settings().await?;
        let mut sessions = self.load_all_sessions().await?;
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(Snapshot {
            version: DATA_VERSION,
            exported_at: keys::now_ms(),
            settings,
            sessions,
        })
    }

    /// Merge a snapshot back in. Sessions keep their ids and replace any
    /// stored record with the same id; invalid messages are dropped and
    /// oversized sessions trimmed on the way in. The current-session
    /// pointer is left alone.
    pub(super) async fn import_data(&self, snapshot: Snapshot) -> Result<ImportReceipt, StoreError> {
        if snapshot.version > DATA_VERSION {
            return Err(StoreError::Validation(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        self.save_settings(&snapshot.settings).await?;

        let mut imported = 0usize;
        for mut session in snapshot.sessions {
            if session.id.is_empty() {
                continue;
            }
            session.messages.retain(validate_message);
            if session.messages.len() > self.policy.max_messages_per_session {
                trim_to(&mut session, self.policy.trim_target);
            }
            self.persist_session_reclaiming(&session).await?;
            imported += 1;
        }

        info!(imported, "imported sessions from snapshot");
        Ok(ImportReceipt {
            imported_sessions: imported,
        })
    }
}

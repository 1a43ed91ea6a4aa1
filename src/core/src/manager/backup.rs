use serde_json::{json, Map, Value};
use sidenote_protocol::{Message, SessionBackup, SessionData, SlimMessage, DATA_VERSION};
use tracing::warn;

use crate::error::StoreError;
use crate::keys;

use super::sessions::validate_message;
use super::StorageManager;

impl StorageManager {
    /// Write a compressed copy of the session, then prune that session's
    /// backups to the retention bound.
    pub(super) async fn create_backup(&self, session: &SessionData) -> Result<(), StoreError> {
        let now = keys::now_ms();
        let backup = SessionBackup {
            id: session.id.clone(),
            messages: session.messages.iter().map(SlimMessage::from).collect(),
            created_at: session.created_at,
            last_activity: session.last_activity,
            backup_created_at: now,
            version: DATA_VERSION,
        };
        let raw = serde_json::to_string(&backup)?;
        self.io.set(&keys::backup_key(&session.id, now), &raw).await?;
        self.prune_backups(&session.id).await
    }

    /// Keys of every backup for one session, oldest first. Ties on the
    /// embedded timestamp break lexicographically, so the order is total.
    pub(super) async fn backup_keys_for(
        &self,
        session_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut stamped: Vec<(i64, String)> = self
            .io
            .keys(&keys::backup_prefix(session_id))
            .await?
            .into_iter()
            .filter_map(|key| {
                let (sid, ts) = keys::backup_parts(&key)?;
                if sid != session_id {
                    return None;
                }
                Some((ts, key))
            })
            .collect();
        stamped.sort();
        Ok(stamped.into_iter().map(|(_, key)| key).collect())
    }

    pub(super) async fn prune_backups(&self, session_id: &str) -> Result<(), StoreError> {
        let backup_keys = self.backup_keys_for(session_id).await?;
        let bound = self.policy.max_backups_per_session;
        if backup_keys.len() <= bound {
            return Ok(());
        }
        for key in &backup_keys[..backup_keys.len() - bound] {
            self.io.remove(key).await?;
        }
        Ok(())
    }

    /// The newest readable backup rebuilt as a serving session, or `None`
    /// when the session has no usable backup.
    pub(super) async fn restore_from_backup(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionData>, StoreError> {
        let backup_keys = self.backup_keys_for(session_id).await?;
        for key in backup_keys.iter().rev() {
            let Some(raw) = self.io.get(key).await? else {
                continue;
            };
            let Ok(backup) = serde_json::from_str::<SessionBackup>(&raw) else {
                warn!(key = %key, "skipping unreadable backup");
                continue;
            };
            let messages: Vec<Message> = backup
                .messages
                .into_iter()
                .map(SlimMessage::into_message)
                .filter(validate_message)
                .collect();
            return Ok(Some(SessionData {
                id: backup.id,
                messages,
                created_at: backup.created_at,
                last_activity: backup.last_activity,
            }));
        }
        Ok(None)
    }

    /// Rebuild a session whose stored record is structurally broken.
    ///
    /// Tries the newest backup first, then salvages the individually valid
    /// messages out of the broken record. Worst case the result is an empty
    /// shell. This never fails upward; storage errors along the way are
    /// traced and absorbed.
    pub(super) async fn recover_corrupted_session(
        &self,
        session_id: &str,
        corrupted: Value,
    ) -> SessionData {
        let original_count = corrupted
            .get("messages")
            .and_then(Value::as_array)
            .map(|m| m.len())
            .unwrap_or(0);

        let restored = match self.restore_from_backup(session_id).await {
            Ok(restored) => restored,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "backup restore failed during recovery");
                None
            }
        };

        let session = match restored {
            Some(session) if !session.messages.is_empty() => session,
            _ => {
                let now = keys::now_ms();
                SessionData {
                    id: session_id.to_string(),
                    messages: salvage_messages(&corrupted),
                    created_at: corrupted
                        .get("createdAt")
                        .and_then(Value::as_i64)
                        .unwrap_or(now),
                    last_activity: corrupted
                        .get("lastActivity")
                        .and_then(Value::as_i64)
                        .unwrap_or(now),
                }
            }
        };

        if let Err(err) = self.persist_session(&session).await {
            warn!(session_id = %session_id, error = %err, "failed to persist recovered session");
        }

        let mut context = Map::new();
        context.insert("sessionId".to_string(), json!(session_id));
        context.insert("originalMessages".to_string(), json!(original_count));
        context.insert("recoveredMessages".to_string(), json!(session.messages.len()));
        self.log_error(
            "session_recovered",
            "session failed structural validation and was rebuilt",
            None,
            context,
        )
        .await;

        session
    }
}

fn salvage_messages(corrupted: &Value) -> Vec<Message> {
    corrupted
        .get("messages")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| serde_json::from_value::<Message>(entry.clone()).ok())
                .filter(validate_message)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sidenote_protocol::{MessageKind, MessageMeta};

    use crate::area::{MemoryArea, StorageArea};
    use crate::config::StoragePolicy;

    use super::*;

    fn make_manager(area: Arc<MemoryArea>) -> StorageManager {
        StorageManager::new(area, StoragePolicy::default())
    }

    fn session_with(id: &str, n: usize) -> SessionData {
        SessionData {
            id: id.to_string(),
            messages: (0..n)
                .map(|i| Message {
                    id: format!("m{i}"),
                    content: format!("msg {i}"),
                    timestamp: i as i64 + 1,
                    kind: MessageKind::User,
                    metadata: MessageMeta::default(),
                })
                .collect(),
            created_at: 1,
            last_activity: n as i64,
        }
    }

    fn seed_backup(area: &MemoryArea, session_id: &str, ts: i64, messages: usize) {
        let backup = SessionBackup {
            id: session_id.to_string(),
            messages: (0..messages)
                .map(|i| SlimMessage {
                    id: format!("m{i}"),
                    content: format!("msg {i}"),
                    timestamp: i as i64 + 1,
                    kind: MessageKind::User,
                })
                .collect(),
            created_at: 1,
            last_activity: ts,
            backup_created_at: ts,
            version: DATA_VERSION,
        };
        area.set(
            &keys::backup_key(session_id, ts),
            &serde_json::to_string(&backup).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn backups_round_trip() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        let session = session_with("s1", 5);
        manager.create_backup(&session).await.unwrap();

        let restored = manager.restore_from_backup("s1").await.unwrap().unwrap();
        assert_eq!(restored.id, "s1");
        assert_eq!(restored.messages.len(), 5);
        assert_eq!(restored.messages[0].content, "msg 0");
        assert_eq!(restored.created_at, session.created_at);
    }

    #[tokio::test]
    async fn backups_are_pruned_to_the_bound() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        for ts in [100, 200, 300, 400, 500] {
            seed_backup(&area, "s1", ts, 1);
        }
        manager.prune_backups("s1").await.unwrap();
        let mut remaining = area.keys("backup_").unwrap();
        remaining.sort();
        assert_eq!(
            remaining,
            vec!["backup_s1_300", "backup_s1_400", "backup_s1_500"]
        );
    }

    #[tokio::test]
    async fn create_backup_prunes_older_ones() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        for ts in [100, 200, 300] {
            seed_backup(&area, "s1", ts, 1);
        }
        manager.create_backup(&session_with("s1", 2)).await.unwrap();
        let remaining = area.keys("backup_").unwrap();
        assert_eq!(remaining.len(), 3);
        // the oldest seeded backup went first
        assert!(!remaining.contains(&"backup_s1_100".to_string()));
    }

    #[tokio::test]
    async fn prune_only_touches_the_given_session() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        for ts in [10, 20, 30, 40] {
            seed_backup(&area, "s1", ts, 1);
        }
        seed_backup(&area, "other", 10, 1);
        manager.prune_backups("s1").await.unwrap();
        assert_eq!(manager.backup_keys_for("s1").await.unwrap().len(), 3);
        assert_eq!(manager.backup_keys_for("other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restore_uses_the_newest_backup() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        seed_backup(&area, "s1", 100, 2);
        seed_backup(&area, "s1", 200, 4);
        let restored = manager.restore_from_backup("s1").await.unwrap().unwrap();
        assert_eq!(restored.messages.len(), 4);
        assert_eq!(restored.last_activity, 200);
    }

    #[tokio::test]
    async fn restore_skips_invalid_backup_messages() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        area.set(
            "backup_s1_100",
            r#"{"id":"s1","messages":[
                {"id":"good","content":"kept","timestamp":5,"type":"user"},
                {"id":"","content":"dropped","timestamp":5,"type":"user"}
            ],"createdAt":1,"lastActivity":9,"backupCreatedAt":100,"version":1}"#,
        )
        .unwrap();

        let restored = manager.restore_from_backup("s1").await.unwrap().unwrap();
        assert_eq!(restored.messages.len(), 1);
        assert_eq!(restored.messages[0].content, "kept");
    }

    #[tokio::test]
    async fn recovery_salvages_valid_messages_without_a_backup() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        let corrupted: Value = serde_json::from_str(
            r#"{"id":"s1","messages":[
                {"id":"good","content":"kept","timestamp":5,"type":"user"},
                {"bogus":true},
                {"id":"bad","content":"","timestamp":5,"type":"user"}
            ],"createdAt":3,"lastActivity":9}"#,
        )
        .unwrap();

        let recovered = manager.recover_corrupted_session("s1", corrupted).await;
        assert_eq!(recovered.messages.len(), 1);
        assert_eq!(recovered.messages[0].content, "kept");
        assert_eq!(recovered.created_at, 3);

        // the rebuilt session was persisted and the event logged
        assert!(area.get("session_s1").unwrap().is_some());
        assert_eq!(area.keys("error_").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recovery_prefers_the_backup() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        manager.create_backup(&session_with("s1", 4)).await.unwrap();

        let recovered = manager
            .recover_corrupted_session("s1", Value::Null)
            .await;
        assert_eq!(recovered.messages.len(), 4);
    }
}

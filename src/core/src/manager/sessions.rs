use serde_json::{json, Map, Value};
use sidenote_protocol::{
    Message, MessageMeta, MessagePage, NewMessage, SaveReceipt, Sender, SessionData,
};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::keys;

use super::StorageManager;

/// Upper bound on message content length, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

pub(super) const DEFAULT_PAGE_LIMIT: usize = 50;

/// A message is storable iff id and content are non-empty, the timestamp is
/// positive, and the content is within the length bound.
pub fn validate_message(message: &Message) -> bool {
    !message.id.is_empty()
        && !message.content.is_empty()
        && message.timestamp > 0
        && message.content.chars().count() <= MAX_MESSAGE_CHARS
}

fn describe_invalid(message: &Message) -> String {
    if message.content.is_empty() {
        "message content is empty".to_string()
    } else if message.content.chars().count() > MAX_MESSAGE_CHARS {
        format!("message content exceeds {MAX_MESSAGE_CHARS} characters")
    } else if message.timestamp <= 0 {
        "message timestamp must be positive".to_string()
    } else {
        "message id is empty".to_string()
    }
}

fn session_is_sound(session: &SessionData) -> bool {
    !session.id.is_empty() && session.messages.iter().all(validate_message)
}

fn session_shell(session_id: &str, now: i64) -> SessionData {
    SessionData {
        id: session_id.to_string(),
        messages: Vec::new(),
        created_at: now,
        last_activity: now,
    }
}

/// Outcome of loading a session record.
pub(super) enum Loaded {
    Missing,
    Valid(SessionData),
    /// Structurally broken; carries whatever parsed, for salvage.
    Corrupt(Value),
}

/// Drop all but the newest `keep` messages. Returns how many were removed.
pub(super) fn trim_to(session: &mut SessionData, keep: usize) -> usize {
    let len = session.messages.len();
    if len <= keep {
        return 0;
    }
    session.messages.drain(..len - keep);
    len - keep
}

/// Select `limit` messages counting `offset` back from the newest, returned
/// in chronological order.
pub(super) fn page(session: &SessionData, offset: usize, limit: usize) -> MessagePage {
    let total = session.messages.len();
    let end = total.saturating_sub(offset);
    let start = end.saturating_sub(limit);
    MessagePage {
        messages: session.messages[start..end].to_vec(),
        session_id: session.id.clone(),
        total,
        has_more: start > 0,
    }
}

fn empty_page(session_id: String) -> MessagePage {
    MessagePage {
        messages: Vec::new(),
        session_id,
        total: 0,
        has_more: false,
    }
}

impl StorageManager {
    pub(super) async fn load_session(&self, session_id: &str) -> Result<Loaded, StoreError> {
        let raw = match self.io.get(&keys::session_key(session_id)).await? {
            Some(raw) => raw,
            None => return Ok(Loaded::Missing),
        };
        match serde_json::from_str::<SessionData>(&raw) {
            Ok(session) if session_is_sound(&session) => Ok(Loaded::Valid(session)),
            _ => Ok(Loaded::Corrupt(
                serde_json::from_str(&raw).unwrap_or(Value::Null),
            )),
        }
    }

    pub(super) async fn persist_session(&self, session: &SessionData) -> Result<(), StoreError> {
        let raw = serde_json::to_string(session)?;
        self.io.set(&keys::session_key(&session.id), &raw).await
    }

    /// The current session id, minting one if none is recorded. The session
    /// record itself is created lazily by the first save.
    pub(super) async fn ensure_current_session(&self) -> Result<String, StoreError> {
        if let Some(id) = self.current_session().await? {
            if !id.is_empty() {
                return Ok(id);
            }
        }
        let id = keys::new_session_id();
        self.set_current_session(&id).await?;
        Ok(id)
    }

    /// Load the session for serving, recovering a corrupt record and falling
    /// back to the newest backup when the record is gone entirely.
    async fn load_for_serving(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionData>, StoreError> {
        match self.load_session(session_id).await? {
            Loaded::Valid(session) => Ok(Some(session)),
            Loaded::Corrupt(raw) => Ok(Some(self.recover_corrupted_session(session_id, raw).await)),
            Loaded::Missing => self.restore_from_backup(session_id).await,
        }
    }

    pub(super) async fn save_message(
        &self,
        data: NewMessage,
        sender: &Sender,
    ) -> Result<SaveReceipt, StoreError> {
        let now = keys::now_ms();
        let message = Message {
            id: keys::new_message_id(now),
            content: data.content,
            timestamp: now,
            kind: data.kind,
            metadata: MessageMeta {
                url: data.url.or_else(|| sender.url.clone()),
                tab_id: data.tab_id.or(sender.tab_id),
            },
        };
        if !validate_message(&message) {
            return Err(StoreError::Validation(describe_invalid(&message)));
        }

        let session_id = self.ensure_current_session().await?;
        let mut session = match self.load_session(&session_id).await? {
            Loaded::Valid(session) => session,
            Loaded::Missing => session_shell(&session_id, now),
            Loaded::Corrupt(raw) => self.recover_corrupted_session(&session_id, raw).await,
        };

        session.messages.push(message.clone());
        session.last_activity = now;

        self.check_limits_and_cleanup(&mut session).await?;

        match self.persist_session(&session).await {
            Ok(()) => {}
            Err(StoreError::QuotaExceeded) => {
                warn!(session_id = %session_id, "quota hit during save, running emergency cleanup");
                self.perform_emergency_cleanup().await?;
                // Emergency cleanup may have truncated or evicted the stored
                // session; rebuild from whatever survived and append again.
                session = match self.load_session(&session_id).await? {
                    Loaded::Valid(session) => session,
                    Loaded::Missing => session_shell(&session_id, now),
                    Loaded::Corrupt(raw) => self.recover_corrupted_session(&session_id, raw).await,
                };
                session.messages.push(message.clone());
                session.last_activity = now;
                self.persist_session(&session).await?;
            }
            Err(err) => return Err(err),
        }

        if self.policy.backup_every > 0 && session.messages.len() % self.policy.backup_every == 0 {
            if let Err(err) = self.create_backup(&session).await {
                warn!(session_id = %session_id, error = %err, "periodic backup failed");
                let mut context = Map::new();
                context.insert("sessionId".to_string(), json!(session_id));
                self.log_error("backup_failed", &err.to_string(), None, context)
                    .await;
            }
        }

        Ok(SaveReceipt {
            message_id: message.id,
            session_id,
        })
    }

    pub(super) async fn get_messages(
        &self,
        session_id: Option<String>,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<MessagePage, StoreError> {
        let session_id = match session_id {
            Some(id) if !id.is_empty() => id,
            _ => match self.current_session().await? {
                Some(id) if !id.is_empty() => id,
                _ => return Ok(empty_page(String::new())),
            },
        };

        match self.load_for_serving(&session_id).await? {
            Some(session) => Ok(page(
                &session,
                offset.unwrap_or(0),
                limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            )),
            None => Ok(empty_page(session_id)),
        }
    }

    /// Mint a fresh session, persist its shell, and make it current.
    pub(super) async fn create_session(&self) -> Result<String, StoreError> {
        let now = keys::now_ms();
        let id = keys::new_session_id();
        self.persist_session_reclaiming(&session_shell(&id, now))
            .await?;
        self.set_current_session(&id).await?;
        info!(session_id = %id, "created session");
        Ok(id)
    }
}

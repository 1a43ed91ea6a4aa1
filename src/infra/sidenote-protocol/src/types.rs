use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Format version stamped on backups and export snapshots.
pub const DATA_VERSION: u16 = 1;

/// A single chat message as persisted inside a session.
///
/// Immutable once stored: cleanup removes whole messages, never edits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id, `"<epoch-ms>-<random>"`.
    pub id: String,
    pub content: String,
    /// Epoch milliseconds; positive for every valid message.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub metadata: MessageMeta,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    System,
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::User
    }
}

/// Origin details attached to a message at save time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
}

/// Payload of a `saveMessage` request: the not-yet-persisted message.
///
/// The input layer caps content at 2 000 chars before it gets here; the
/// storage layer re-validates against its own 10 000 char bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tab_id: Option<i64>,
}

/// A session: a bounded append log of messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub id: String,
    /// Insertion order is chronological.
    pub messages: Vec<Message>,
    pub created_at: i64,
    /// Bumped on every message append; drives LRU eviction.
    pub last_activity: i64,
}

/// Message as stored in a backup: metadata dropped to save space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlimMessage {
    pub id: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

impl From<&Message> for SlimMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            content: msg.content.clone(),
            timestamp: msg.timestamp,
            kind: msg.kind,
        }
    }
}

impl SlimMessage {
    /// Rehydrate into a full message with empty metadata.
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            content: self.content,
            timestamp: self.timestamp,
            kind: self.kind,
            metadata: MessageMeta::default(),
        }
    }
}

/// Compressed copy of a session written before destructive operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBackup {
    /// The backed-up session's id.
    pub id: String,
    pub messages: Vec<SlimMessage>,
    pub created_at: i64,
    pub last_activity: i64,
    pub backup_created_at: i64,
    pub version: u16,
}

/// Per-tab sidebar visibility record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabState {
    pub tab_id: i64,
    pub visible: bool,
    pub url: String,
    pub last_update: i64,
}

/// Global sidebar settings (singleton).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub sidebar_width: u32,
    pub theme: Theme,
    pub auto_scroll: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sidebar_width: 320,
            theme: Theme::Light,
            auto_scroll: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

/// Result of a quota measurement against the storage budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub has_space: bool,
    pub usage_percentage: f64,
}

/// Record counts reported by `getStorageInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCounts {
    pub sessions: usize,
    pub messages: usize,
    pub backups: usize,
    pub errors: usize,
}

/// `getStorageInfo` response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub quota: QuotaStatus,
    pub counts: StorageCounts,
}

/// One page of messages, chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub session_id: String,
    /// Total messages in the session, not just this page.
    pub total: usize,
    pub has_more: bool,
}

/// `saveMessage` response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub message_id: String,
    pub session_id: String,
}

/// `getSidebarState` response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarState {
    pub visible: bool,
    pub settings: Settings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<i64>,
}

/// `setSidebarState` response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarStateAck {
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    pub timestamp: i64,
}

/// `cleanupStorage` response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub before: QuotaStatus,
    pub after: QuotaStatus,
    pub freed_bytes: u64,
}

/// Payload of a `reportError` request from the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Full data snapshot exchanged by `exportData` / `importData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u16,
    pub exported_at: i64,
    pub settings: Settings,
    pub sessions: Vec<SessionData>,
}

/// `importData` response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReceipt {
    pub imported_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_kind_serializes_as_type() {
        let msg = Message {
            id: "1-abc".into(),
            content: "hello".into(),
            timestamp: 1,
            kind: MessageKind::User,
            metadata: MessageMeta::default(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], json!("user"));
        assert!(v.get("kind").is_none());
    }

    #[test]
    fn message_metadata_defaults_when_absent() {
        let msg: Message = serde_json::from_value(json!({
            "id": "1-abc",
            "content": "hi",
            "timestamp": 5,
            "type": "system"
        }))
        .unwrap();
        assert_eq!(msg.kind, MessageKind::System);
        assert_eq!(msg.metadata, MessageMeta::default());
    }

    #[test]
    fn slim_message_drops_metadata() {
        let msg = Message {
            id: "9-x".into(),
            content: "note".into(),
            timestamp: 9,
            kind: MessageKind::User,
            metadata: MessageMeta {
                url: Some("https://example.com".into()),
                tab_id: Some(7),
            },
        };
        let slim = SlimMessage::from(&msg);
        let v = serde_json::to_value(&slim).unwrap();
        assert!(v.get("metadata").is_none());
        let back = slim.into_message();
        assert_eq!(back.content, msg.content);
        assert_eq!(back.timestamp, msg.timestamp);
        assert_eq!(back.kind, msg.kind);
        assert_eq!(back.metadata, MessageMeta::default());
    }

    #[test]
    fn settings_defaults() {
        let s: Settings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(s.sidebar_width, 320);
        assert_eq!(s.theme, Theme::Light);
        assert!(s.auto_scroll);
    }

    #[test]
    fn session_fields_use_camel_case() {
        let session = SessionData {
            id: "s1".into(),
            messages: vec![],
            created_at: 1,
            last_activity: 2,
        };
        let v = serde_json::to_value(&session).unwrap();
        assert!(v.get("createdAt").is_some());
        assert!(v.get("lastActivity").is_some());
    }

    #[test]
    fn new_message_kind_defaults_to_user() {
        let m: NewMessage = serde_json::from_value(json!({"content": "hey"})).unwrap();
        assert_eq!(m.kind, MessageKind::User);
        assert!(m.url.is_none());
        assert!(m.tab_id.is_none());
    }
}

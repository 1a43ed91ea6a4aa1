//! Key layout for the flat storage namespace.
//!
//! Every subsystem owns one prefix. Building and parsing keys lives here so
//! the convention cannot drift between call sites.

use uuid::Uuid;

pub const SESSION_PREFIX: &str = "session_";
pub const BACKUP_PREFIX: &str = "backup_";
pub const TAB_STATE_PREFIX: &str = "tabState_";
pub const ERROR_PREFIX: &str = "error_";

pub const SETTINGS_KEY: &str = "settings";
pub const CURRENT_SESSION_KEY: &str = "currentSession";
pub const SIDEBAR_VISIBLE_KEY: &str = "sidebarVisible";

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn short_rand() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Mint a message id: the message timestamp plus a random suffix.
pub fn new_message_id(timestamp_ms: i64) -> String {
    format!("{timestamp_ms}-{}", short_rand())
}

pub fn new_session_id() -> String {
    format!("{}-{}", now_ms(), short_rand())
}

pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

pub fn backup_key(session_id: &str, created_at_ms: i64) -> String {
    format!("{BACKUP_PREFIX}{session_id}_{created_at_ms}")
}

/// Prefix matching every backup of one session.
pub fn backup_prefix(session_id: &str) -> String {
    format!("{BACKUP_PREFIX}{session_id}_")
}

pub fn tab_state_key(tab_id: i64) -> String {
    format!("{TAB_STATE_PREFIX}{tab_id}")
}

/// Mint an error-log key; insertion order is encoded in the timestamp.
pub fn error_key(timestamp_ms: i64) -> String {
    format!("{ERROR_PREFIX}{timestamp_ms}_{}", short_rand())
}

pub fn session_id_of(key: &str) -> Option<&str> {
    key.strip_prefix(SESSION_PREFIX).filter(|id| !id.is_empty())
}

/// Split a backup key into session id and creation timestamp.
///
/// Session ids may contain underscores, so the timestamp is taken from the
/// right.
pub fn backup_parts(key: &str) -> Option<(&str, i64)> {
    let rest = key.strip_prefix(BACKUP_PREFIX)?;
    let (session_id, ts) = rest.rsplit_once('_')?;
    if session_id.is_empty() {
        return None;
    }
    Some((session_id, ts.parse().ok()?))
}

pub fn tab_id_of(key: &str) -> Option<i64> {
    key.strip_prefix(TAB_STATE_PREFIX)?.parse().ok()
}

/// Split an error key into timestamp and random suffix.
pub fn error_parts(key: &str) -> Option<(i64, &str)> {
    let rest = key.strip_prefix(ERROR_PREFIX)?;
    let (ts, rand) = rest.split_once('_')?;
    Some((ts.parse().ok()?, rand))
}

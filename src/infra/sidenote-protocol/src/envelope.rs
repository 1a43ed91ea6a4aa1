use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{ErrorReport, NewMessage, Snapshot};

/// A request from the presentation layer, discriminated by `action`.
///
/// The set of actions is closed: anything else decodes to
/// [`DecodeError::UnknownAction`] and is answered with the uniform failure
/// envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    /// Persist one message into the current (or given) session.
    SaveMessage { data: NewMessage },
    /// Fetch one page of messages, chronological order.
    #[serde(rename_all = "camelCase")]
    GetMessages {
        #[serde(default)]
        session_id: Option<String>,
        /// Offset counted back from the newest message.
        #[serde(default)]
        offset: Option<usize>,
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Sidebar visibility and settings for the sender's tab.
    GetSidebarState,
    /// Record sidebar visibility for the sender's tab.
    SetSidebarState {
        visible: bool,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Mint a fresh session and make it current.
    CreateSession,
    /// Log an error observed by the presentation layer.
    ReportError {
        #[serde(rename = "type")]
        kind: String,
        message: String,
        #[serde(default)]
        stack: Option<String>,
        #[serde(default)]
        context: Map<String, Value>,
    },
    /// Quota status plus record counts.
    GetStorageInfo,
    /// Export every session and the settings as one snapshot.
    ExportData,
    /// Merge a previously exported snapshot back in.
    ImportData { snapshot: Snapshot },
    /// Run the standard cleanup ladder and report the space freed.
    CleanupStorage,
    /// Liveness check.
    Ping,
}

impl Request {
    /// The wire tag of this request, for logging.
    pub fn action(&self) -> &'static str {
        match self {
            Request::SaveMessage { .. } => "saveMessage",
            Request::GetMessages { .. } => "getMessages",
            Request::GetSidebarState => "getSidebarState",
            Request::SetSidebarState { .. } => "setSidebarState",
            Request::CreateSession => "createSession",
            Request::ReportError { .. } => "reportError",
            Request::GetStorageInfo => "getStorageInfo",
            Request::ExportData => "exportData",
            Request::ImportData { .. } => "importData",
            Request::CleanupStorage => "cleanupStorage",
            Request::Ping => "ping",
        }
    }

    pub fn report_error(report: ErrorReport) -> Self {
        Request::ReportError {
            kind: report.kind,
            message: report.message,
            stack: report.stack,
            context: report.context,
        }
    }
}

/// Every action tag the storage manager answers.
pub const KNOWN_ACTIONS: &[&str] = &[
    "saveMessage",
    "getMessages",
    "getSidebarState",
    "setSidebarState",
    "createSession",
    "reportError",
    "getStorageInfo",
    "exportData",
    "importData",
    "cleanupStorage",
    "ping",
];

/// Identity of the requesting page, supplied by the host per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    #[serde(default)]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Sender {
    pub fn from_tab(tab_id: i64, url: impl Into<String>) -> Self {
        Self {
            tab_id: Some(tab_id),
            url: Some(url.into()),
        }
    }
}

/// Uniform response envelope: `{ success, data?, error? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Why a raw envelope could not be decoded into a [`Request`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// `action` missing, not a string, or not a known action.
    #[error("Unknown action")]
    UnknownAction,
    /// Known action carrying a malformed payload.
    #[error("invalid {action} request: {source}")]
    InvalidPayload {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode a raw JSON envelope into a typed [`Request`].
///
/// Distinguishes an unrecognized `action` (answered with the fixed
/// "Unknown action" message) from a recognized action whose payload does not
/// parse.
pub fn decode_request(raw: &Value) -> Result<Request, DecodeError> {
    let action = raw
        .get("action")
        .and_then(Value::as_str)
        .ok_or(DecodeError::UnknownAction)?;
    if !KNOWN_ACTIONS.contains(&action) {
        return Err(DecodeError::UnknownAction);
    }
    serde_json::from_value(raw.clone()).map_err(|source| DecodeError::InvalidPayload {
        action: action.to_string(),
        source,
    })
}

/// Encode a request back into its raw JSON envelope.
pub fn encode_request(req: &Request) -> Result<Value, serde_json::Error> {
    serde_json::to_value(req)
}

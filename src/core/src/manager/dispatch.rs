use serde::Serialize;
use serde_json::{json, Map, Value};
use sidenote_protocol::{decode_request, Request, Response, Sender};
use tracing::debug;

use crate::error::StoreError;
use crate::keys;

use super::StorageManager;

fn payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl StorageManager {
    /// Decode and answer a raw JSON envelope. Undecodable envelopes get an
    /// error response; every request gets exactly one response.
    pub async fn handle_value(&self, raw: &Value, sender: &Sender) -> Response {
        match decode_request(raw) {
            Ok(request) => self.handle(request, sender).await,
            Err(err) => Response::error(err.to_string()),
        }
    }

    /// Answer one typed request.
    pub async fn handle(&self, request: Request, sender: &Sender) -> Response {
        debug!(action = request.action(), "handling request");

        // liveness must not queue behind storage work
        if matches!(request, Request::Ping) {
            return Response::success(json!({ "timestamp": keys::now_ms() }));
        }

        let _state = self.state.lock().await;
        match request {
            Request::SaveMessage { data } => match self.save_message(data, sender).await {
                Ok(receipt) => Response::success(payload(&receipt)),
                Err(err) => self.fail("saveMessage", err).await,
            },
            Request::GetMessages {
                session_id,
                offset,
                limit,
            } => match self.get_messages(session_id, offset, limit).await {
                Ok(page) => Response::success(payload(&page)),
                Err(err) => self.fail("getMessages", err).await,
            },
            Request::GetSidebarState => match self.sidebar_state(sender).await {
                Ok(state) => Response::success(payload(&state)),
                Err(err) => self.fail("getSidebarState", err).await,
            },
            Request::SetSidebarState {
                visible,
                url,
                timestamp,
            } => match self.set_sidebar_state(visible, url, timestamp, sender).await {
                Ok(ack) => Response::success(payload(&ack)),
                Err(err) => self.fail("setSidebarState", err).await,
            },
            Request::CreateSession => match self.create_session().await {
                Ok(session_id) => Response::success(json!({ "sessionId": session_id })),
                Err(err) => self.fail("createSession", err).await,
            },
            Request::ReportError {
                kind,
                message,
                stack,
                context,
            } => {
                self.log_error(&kind, &message, stack, context).await;
                Response::success(json!({}))
            }
            Request::GetStorageInfo => match self.storage_info().await {
                Ok(info) => Response::success(payload(&info)),
                Err(err) => self.fail("getStorageInfo", err).await,
            },
            Request::ExportData => match self.export_data().await {
                Ok(snapshot) => Response::success(payload(&snapshot)),
                Err(err) => self.fail("exportData", err).await,
            },
            Request::ImportData { snapshot } => match self.import_data(snapshot).await {
                Ok(receipt) => Response::success(payload(&receipt)),
                Err(err) => self.fail("importData", err).await,
            },
            Request::CleanupStorage => match self.cleanup_storage().await {
                Ok(report) => Response::success(payload(&report)),
                Err(err) => self.fail("cleanupStorage", err).await,
            },
            Request::Ping => Response::success(json!({ "timestamp": keys::now_ms() })),
        }
    }

    /// Record a surfaced failure in the error log, then wrap it for the
    /// wire.
    async fn fail(&self, action: &str, err: StoreError) -> Response {
        let mut context = Map::new();
        context.insert("action".to_string(), json!(action));
        self.log_error(err.kind(), &err.to_string(), None, context)
            .await;
        Response::error(err.to_string())
    }
}

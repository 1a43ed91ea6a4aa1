use std::future::Future;
use std::pin::Pin;

use sidenote_protocol::{Sender, SidebarState, SidebarStateAck, TabState};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::keys;

use super::StorageManager;

/// Host-side query for the set of currently live tab ids.
///
/// Injected by the embedding host. Absent in headless use, which disables
/// the periodic sweep.
pub trait TabProbe: Send + Sync {
    fn live_tabs(&self) -> Pin<Box<dyn Future<Output = Vec<i64>> + Send + '_>>;
}

impl StorageManager {
    pub(super) async fn tab_state(&self, tab_id: i64) -> Result<Option<TabState>, StoreError> {
        match self.io.get(&keys::tab_state_key(tab_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    pub(super) async fn set_tab_state(&self, state: &TabState) -> Result<(), StoreError> {
        let raw = serde_json::to_string(state)?;
        self.set_reclaiming(&keys::tab_state_key(state.tab_id), &raw)
            .await
    }

    /// Host hook: a tab closed, drop its state immediately.
    pub async fn note_tab_closed(&self, tab_id: i64) {
        let _state = self.state.lock().await;
        if let Err(err) = self.io.remove(&keys::tab_state_key(tab_id)).await {
            warn!(tab_id, error = %err, "failed to drop closed tab state");
        } else {
            debug!(tab_id, "dropped state for closed tab");
        }
    }

    /// Remove tab states whose tab is no longer live. No-op without a
    /// probe. Returns how many were removed.
    pub(super) async fn sweep_tab_states(&self) -> Result<usize, StoreError> {
        let Some(probe) = &self.probe else {
            return Ok(0);
        };
        let live = probe.live_tabs().await;
        let mut removed = 0;
        for key in self.io.keys(keys::TAB_STATE_PREFIX).await? {
            let Some(tab_id) = keys::tab_id_of(&key) else {
                continue;
            };
            if !live.contains(&tab_id) {
                self.io.remove(&key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "swept stale tab states");
        }
        Ok(removed)
    }

    /// Emergency form of the sweep: with no probe to consult, every tab
    /// state is considered stale.
    pub(super) async fn drop_stale_tab_states(&self) -> Result<usize, StoreError> {
        if self.probe.is_some() {
            return self.sweep_tab_states().await;
        }
        let mut removed = 0;
        for key in self.io.keys(keys::TAB_STATE_PREFIX).await? {
            self.io.remove(&key).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Sidebar state for the requesting tab, falling back to the global
    /// visibility flag when the tab has no record of its own.
    pub(super) async fn sidebar_state(&self, sender: &Sender) -> Result<SidebarState, StoreError> {
        let settings = self.load_settings().await?;
        let session_id = self.current_session().await?;

        if let Some(tab_id) = sender.tab_id {
            if let Some(state) = self.tab_state(tab_id).await? {
                return Ok(SidebarState {
                    visible: state.visible,
                    settings,
                    session_id,
                    tab_id: Some(tab_id),
                    last_update: Some(state.last_update),
                });
            }
        }

        let visible = self.global_visible().await?;
        Ok(SidebarState {
            visible,
            settings,
            session_id,
            tab_id: sender.tab_id,
            last_update: None,
        })
    }

    /// Record visibility for the requesting tab and mirror it into the
    /// global flag older clients read.
    pub(super) async fn set_sidebar_state(
        &self,
        visible: bool,
        url: Option<String>,
        timestamp: Option<i64>,
        sender: &Sender,
    ) -> Result<SidebarStateAck, StoreError> {
        let timestamp = timestamp.unwrap_or_else(keys::now_ms);
        if let Some(tab_id) = sender.tab_id {
            let state = TabState {
                tab_id,
                visible,
                url: url.or_else(|| sender.url.clone()).unwrap_or_default(),
                last_update: timestamp,
            };
            self.set_tab_state(&state).await?;
        }
        self.set_global_visible(visible).await?;
        Ok(SidebarStateAck {
            visible,
            tab_id: sender.tab_id,
            timestamp,
        })
    }
}

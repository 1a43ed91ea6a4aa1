use sidenote_protocol::Settings;

use crate::error::StoreError;
use crate::keys;

use super::StorageManager;

impl StorageManager {
    /// Global settings. A missing or unreadable record yields the defaults,
    /// which are persisted so the next read is clean.
    pub(super) async fn load_settings(&self) -> Result<Settings, StoreError> {
        if let Some(raw) = self.io.get(keys::SETTINGS_KEY).await? {
            if let Ok(settings) = serde_json::from_str(&raw) {
                return Ok(settings);
            }
        }
        let settings = Settings::default();
        self.save_settings(&settings).await?;
        Ok(settings)
    }

    pub(super) async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        let raw = serde_json::to_string(settings)?;
        self.set_reclaiming(keys::SETTINGS_KEY, &raw).await
    }

    pub(super) async fn current_session(&self) -> Result<Option<String>, StoreError> {
        match self.io.get(keys::CURRENT_SESSION_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    pub(super) async fn set_current_session(&self, session_id: &str) -> Result<(), StoreError> {
        let raw = serde_json::to_string(session_id)?;
        self.set_reclaiming(keys::CURRENT_SESSION_KEY, &raw).await
    }

    /// The tab-independent visibility flag older clients read.
    pub(super) async fn global_visible(&self) -> Result<bool, StoreError> {
        match self.io.get(keys::SIDEBAR_VISIBLE_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or(false)),
            None => Ok(false),
        }
    }

    pub(super) async fn set_global_visible(&self, visible: bool) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&visible)?;
        self.set_reclaiming(keys::SIDEBAR_VISIBLE_KEY, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sidenote_protocol::Theme;

    use crate::area::{MemoryArea, StorageArea};
    use crate::config::StoragePolicy;

    use super::*;

    fn make_manager(area: Arc<MemoryArea>) -> StorageManager {
        StorageManager::new(area, StoragePolicy::default())
    }

    #[tokio::test]
    async fn defaults_are_created_on_first_read() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        let settings = manager.load_settings().await.unwrap();
        assert_eq!(settings, Settings::default());
        // the defaults were persisted
        assert!(area.get("settings").unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_settings_fall_back_to_defaults() {
        let area = Arc::new(MemoryArea::new());
        area.set("settings", "{not json").unwrap();
        let manager = make_manager(area.clone());
        let settings = manager.load_settings().await.unwrap();
        assert_eq!(settings, Settings::default());
        // and the stored record was repaired
        let raw = area.get("settings").unwrap().unwrap();
        assert!(serde_json::from_str::<Settings>(&raw).is_ok());
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        let custom = Settings {
            sidebar_width: 400,
            theme: Theme::Dark,
            auto_scroll: false,
        };
        manager.save_settings(&custom).await.unwrap();
        assert_eq!(manager.load_settings().await.unwrap(), custom);
    }

    #[tokio::test]
    async fn current_session_round_trips_as_json() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        assert_eq!(manager.current_session().await.unwrap(), None);
        manager.set_current_session("s-42").await.unwrap();
        assert_eq!(
            manager.current_session().await.unwrap(),
            Some("s-42".to_string())
        );
        assert_eq!(area.get("currentSession").unwrap().unwrap(), r#""s-42""#);
    }

    #[tokio::test]
    async fn global_visibility_defaults_to_hidden() {
        let area = Arc::new(MemoryArea::new());
        let manager = make_manager(area.clone());
        assert!(!manager.global_visible().await.unwrap());
        manager.set_global_visible(true).await.unwrap();
        assert!(manager.global_visible().await.unwrap());
        assert_eq!(area.get("sidebarVisible").unwrap().unwrap(), "true");
    }
}

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::paths::{sidenote_config_path, sidenote_home_dir};

/// Storage policy: every threshold the manager enforces.
#[derive(Debug, Clone)]
pub struct StoragePolicy {
    /// Byte budget enforced below the platform's ~5 MB ceiling
    /// (default: 4.5 MB).
    pub quota_bytes: u64,
    /// Messages a session may hold before it is trimmed.
    pub max_messages_per_session: usize,
    /// Messages kept after an overflow trim.
    pub trim_target: usize,
    /// A backup is written every this-many appended messages.
    pub backup_every: usize,
    /// Backups retained per session, newest kept.
    pub max_backups_per_session: usize,
    /// Sessions kept by standard cleanup, most recently active first.
    pub max_sessions: usize,
    /// Sessions kept by emergency cleanup.
    pub emergency_max_sessions: usize,
    /// Messages kept per surviving session by emergency cleanup.
    pub emergency_max_messages: usize,
    /// Error-log entries retained, newest kept.
    pub max_error_entries: usize,
    /// Storage attempts per operation before giving up.
    pub retry_attempts: u32,
    /// First retry delay; doubles per subsequent attempt.
    pub retry_base_delay: Duration,
    /// Interval between tab-state sweeps.
    pub sweep_interval: Duration,
    /// Interval between retention passes over the error log and backups.
    pub retention_interval: Duration,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            quota_bytes: 4_718_592,
            max_messages_per_session: 1000,
            trim_target: 800,
            backup_every: 50,
            max_backups_per_session: 3,
            max_sessions: 10,
            emergency_max_sessions: 3,
            emergency_max_messages: 100,
            max_error_entries: 50,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(50),
            sweep_interval: Duration::from_secs(60),
            retention_interval: Duration::from_secs(3600),
        }
    }
}

/// On-disk configuration, read from `config.toml` under the data dir.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub version: u32,
    pub storage: StorageSection,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            storage: StorageSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Database file name inside the data dir.
    pub db_file: String,
    pub quota_bytes: u64,
    pub max_sessions: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        let policy = StoragePolicy::default();
        Self {
            db_file: "sidenote.db".to_string(),
            quota_bytes: policy.quota_bytes,
            max_sessions: policy.max_sessions,
        }
    }
}

impl CoreConfig {
    /// Load `config.toml` from the data dir; a missing file yields defaults.
    pub fn load() -> Result<Self, String> {
        let path = sidenote_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }

    pub fn db_path(&self) -> Result<PathBuf, String> {
        Ok(sidenote_home_dir()?.join(&self.storage.db_file))
    }

    /// Policy built from the defaults plus this file's overrides.
    pub fn policy(&self) -> StoragePolicy {
        StoragePolicy {
            quota_bytes: self.storage.quota_bytes,
            max_sessions: self.storage.max_sessions,
            ..StoragePolicy::default()
        }
    }
}

use std::collections::HashMap;
use std::sync::Mutex;

use super::{AreaError, StorageArea};

/// In-memory area with an optional hard byte capacity.
///
/// The capacity reproduces the platform's quota wall: a `set` that would
/// push the footprint past it fails the same way a full backend does.
#[derive(Default)]
pub struct MemoryArea {
    entries: Mutex<HashMap<String, String>>,
    capacity: Option<u64>,
}

impl MemoryArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: Some(capacity_bytes),
        }
    }

    fn footprint(entries: &HashMap<String, String>) -> u64 {
        entries.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AreaError> {
        self.entries
            .lock()
            .map_err(|e| AreaError::Backend(format!("lock: {e}")))
    }
}

impl StorageArea for MemoryArea {
    fn get(&self, key: &str) -> Result<Option<String>, AreaError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AreaError> {
        let mut entries = self.lock()?;
        if let Some(capacity) = self.capacity {
            let replaced = entries
                .get(key)
                .map(|v| (key.len() + v.len()) as u64)
                .unwrap_or(0);
            let projected =
                Self::footprint(&entries) - replaced + (key.len() + value.len()) as u64;
            if projected > capacity {
                return Err(AreaError::QuotaExceeded);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AreaError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, AreaError> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn usage_bytes(&self) -> Result<u64, AreaError> {
        let entries = self.lock()?;
        Ok(Self::footprint(&entries))
    }
}

//! Retrying executor wrapped around a storage area.
//!
//! Every read and write above the area layer goes through here: up to a
//! configured number of attempts with exponential backoff. Quota failures
//! are not transient and short-circuit so the caller can reclaim space
//! instead of hammering a full backend.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::area::{AreaError, StorageArea};
use crate::error::StoreError;

#[derive(Clone)]
pub struct StorageIo {
    area: Arc<dyn StorageArea>,
    attempts: u32,
    base_delay: Duration,
}

impl StorageIo {
    pub fn new(area: Arc<dyn StorageArea>, attempts: u32, base_delay: Duration) -> Self {
        Self {
            area,
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.run("get", || self.area.get(key)).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.run("set", || self.area.set(key, value)).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.run("remove", || self.area.remove(key)).await
    }

    pub async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.run("keys", || self.area.keys(prefix)).await
    }

    pub async fn usage_bytes(&self) -> Result<u64, StoreError> {
        self.run("usage", || self.area.usage_bytes()).await
    }

    async fn run<T>(
        &self,
        op: &str,
        call: impl Fn() -> Result<T, AreaError>,
    ) -> Result<T, StoreError> {
        let mut last = String::new();
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                // 1x, 2x, 4x the base delay, capped at 16x
                let shift = (attempt - 2).min(4);
                tokio::time::sleep(self.base_delay * (1u32 << shift)).await;
            }
            match call() {
                Ok(value) => return Ok(value),
                Err(AreaError::QuotaExceeded) => return Err(StoreError::QuotaExceeded),
                Err(AreaError::Backend(message)) => {
                    warn!(op, attempt, error = %message, "storage attempt failed");
                    last = message;
                }
            }
        }
        Err(StoreError::Storage {
            attempts: self.attempts,
            last,
        })
    }
}

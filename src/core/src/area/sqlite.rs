use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, ErrorCode};

use super::{AreaError, StorageArea};

/// SQLite-backed area: one `kv` table behind a mutex-guarded connection.
pub struct SqliteArea {
    conn: Mutex<Connection>,
}

impl SqliteArea {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, AreaError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AreaError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(|e| backend("open", e))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, AreaError> {
        let conn = Connection::open_in_memory().map_err(|e| backend("open", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, AreaError> {
        let area = Self {
            conn: Mutex::new(conn),
        };
        area.migrate()?;
        Ok(area)
    }

    fn migrate(&self) -> Result<(), AreaError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(|e| backend("migrate", e))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AreaError> {
        self.conn
            .lock()
            .map_err(|e| AreaError::Backend(format!("lock: {e}")))
    }
}

fn backend(ctx: &str, e: rusqlite::Error) -> AreaError {
    if let rusqlite::Error::SqliteFailure(code, _) = &e {
        // SQLITE_FULL surfaces as DiskFull
        if code.code == ErrorCode::DiskFull {
            return AreaError::QuotaExceeded;
        }
    }
    AreaError::Backend(format!("{ctx}: {e}"))
}

impl StorageArea for SqliteArea {
    fn get(&self, key: &str) -> Result<Option<String>, AreaError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT value FROM kv WHERE key = ?1")
            .map_err(|e| backend("get", e))?;
        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(|e| backend("get", e))?;
        rows.next().transpose().map_err(|e| backend("get", e))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AreaError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| backend("set", e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AreaError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| backend("remove", e))?;
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, AreaError> {
        let conn = self.lock()?;
        // substr comparison instead of LIKE: keys contain `_`, which LIKE
        // treats as a wildcard.
        let mut stmt = conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1")
            .map_err(|e| backend("keys", e))?;
        let rows = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))
            .map_err(|e| backend("keys", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| backend("keys", e))
    }

    fn usage_bytes(&self) -> Result<u64, AreaError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(|e| backend("usage", e))
    }
}

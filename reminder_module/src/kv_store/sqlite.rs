use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use super::{KvStore, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS kv_entries_expires_at ON kv_entries (expires_at);
CREATE TABLE IF NOT EXISTS kv_set_members (
    key TEXT NOT NULL,
    member TEXT NOT NULL,
    PRIMARY KEY (key, member)
);
"#;

/// Sqlite-backed store. Expired rows are treated as absent; they are swept on
/// open and on every write, since most per-day keys are never read again.
#[derive(Debug, Clone)]
pub struct SqliteKvStore {
    path: PathBuf,
}

impl SqliteKvStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        let conn = store.open()?;
        sweep_expired(&conn)?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(KV_SCHEMA)?;
        Ok(conn)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now_millis() + i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2))
}

fn purge_if_expired(conn: &Connection, key: &str) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM kv_entries WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
        params![key, now_millis()],
    )?;
    Ok(())
}

fn sweep_expired(conn: &Connection) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        params![now_millis()],
    )?)
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.open()?;
        purge_if_expired(&conn, key)?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expiry_millis(ttl)],
        )?;
        sweep_expired(&conn)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        conn.execute("DELETE FROM kv_set_members WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO kv_set_members (key, member) VALUES (?1, ?2)",
            params![key, member],
        )?;
        Ok(inserted > 0)
    }

    fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "DELETE FROM kv_set_members WHERE key = ?1 AND member = ?2",
            params![key, member],
        )?;
        Ok(())
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT member FROM kv_set_members WHERE key = ?1 ORDER BY member")?;
        let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        purge_if_expired(&tx, key)?;
        let current = tx
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        let next = match current {
            Some(raw) => {
                raw.trim()
                    .parse::<i64>()
                    .map_err(|_| StoreError::NotAnInteger(key.to_string()))?
                    + 1
            }
            None => 1,
        };
        tx.execute(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, NULL)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, next.to_string()],
        )?;
        tx.commit()?;
        Ok(next)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE kv_entries SET expires_at = ?2 WHERE key = ?1",
            params![key, expiry_millis(Some(ttl))],
        )?;
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let conn = self.open()?;
        sweep_expired(&conn)
    }
}

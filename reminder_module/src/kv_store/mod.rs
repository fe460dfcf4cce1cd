//! Generic key-value persistence with TTLs and string sets.
//!
//! Every piece of coordination state lives behind this trait. There are no
//! cross-key transactions, so callers must tolerate half-applied multi-key
//! updates (an index entry whose record is gone, and so on).

mod memory;
mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("value at {0} is not an integer")]
    NotAnInteger(String),
    #[error("store lock poisoned")]
    LockPoisoned,
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Returns true when the member was not already present.
    fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError>;
    fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
    /// Increments an integer value (missing counts as 0) and returns the new value.
    fn incr(&self, key: &str) -> Result<i64, StoreError>;
    /// Applies a TTL to an existing scalar key; no-op for missing keys.
    fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
    /// Drops every expired scalar and returns how many went.
    fn purge_expired(&self) -> Result<usize, StoreError>;
}

pub fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl)
}

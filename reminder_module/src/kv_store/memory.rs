use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{KvStore, StoreError};

#[derive(Debug, Clone)]
struct ScalarEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ScalarEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// In-process store for tests and throwaway local runs.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    scalars: Mutex<HashMap<String, ScalarEntry>>,
    sets: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut scalars = self.scalars.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        match scalars.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                scalars.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut scalars = self.scalars.lock().map_err(|_| StoreError::LockPoisoned)?;
        scalars.insert(
            key.to_string(),
            ScalarEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.scalars
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(key);
        self.sets
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(key);
        Ok(())
    }

    fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut sets = self.sets.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut sets = self.sets.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(set) = sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let sets = self.sets.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut scalars = self.scalars.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        let (current, expires_at) = match scalars.get(key) {
            Some(entry) if entry.is_live(now) => (
                entry
                    .value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| StoreError::NotAnInteger(key.to_string()))?,
                entry.expires_at,
            ),
            _ => (0, None),
        };
        let next = current + 1;
        scalars.insert(
            key.to_string(),
            ScalarEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut scalars = self.scalars.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(entry) = scalars.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut scalars = self.scalars.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        let before = scalars.len();
        scalars.retain(|_, entry| entry.is_live(now));
        Ok(before - scalars.len())
    }
}

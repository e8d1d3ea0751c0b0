//! In-process [`SharedStore`] implementation.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{SharedStore, WindowCount};
use crate::{CellgateError, Result};

enum StoredValue {
    Bytes(Vec<u8>),
    Counter(i64),
    Sorted(BTreeSet<(u64, String)>),
}

struct StoreEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Thread-safe in-memory store with per-key expiry.
///
/// Expired keys are removed lazily on access.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoreEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the live entry for `key`, dropping it first if expired.
    fn with_entry<T>(&self, key: &str, f: impl FnOnce(Option<&mut StoreEntry>) -> T) -> T {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }

    fn sorted_mut<'a>(
        entries: &'a mut HashMap<String, StoreEntry>,
        key: &str,
    ) -> Result<&'a mut BTreeSet<(u64, String)>> {
        let entry = entries.entry(key.to_string()).or_insert_with(|| StoreEntry {
            value: StoredValue::Sorted(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            StoredValue::Sorted(set) => Ok(set),
            _ => Err(wrong_type(key)),
        }
    }

    fn purge_expired(entries: &mut HashMap<String, StoreEntry>, key: &str) {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
    }
}

fn wrong_type(key: &str) -> CellgateError {
    CellgateError::Store(format!("wrong value type for key {key}"))
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_entry(key, |entry| match entry {
            None => Ok(None),
            Some(StoreEntry {
                value: StoredValue::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(StoreEntry {
                value: StoredValue::Counter(n),
                ..
            }) => Ok(Some(n.to_string().into_bytes())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            StoreEntry {
                value: StoredValue::Bytes(value),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| StoreEntry {
            value: StoredValue::Counter(0),
            expires_at: None,
        });
        match &mut entry.value {
            StoredValue::Counter(n) => {
                *n += delta;
                Ok(*n)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.with_entry(key, |entry| {
            if let Some(entry) = entry {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        });
        Ok(())
    }

    async fn zadd(&self, key: &str, score: u64, member: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        let set = Self::sorted_mut(&mut entries, key)?;
        set.retain(|(_, m)| m != member);
        set.insert((score, member.to_string()));
        Ok(())
    }

    async fn zrem_range_by_score(&self, key: &str, min: u64, max: u64) -> Result<u64> {
        self.with_entry(key, |entry| match entry {
            None => Ok(0),
            Some(StoreEntry {
                value: StoredValue::Sorted(set),
                ..
            }) => {
                let before = set.len();
                set.retain(|(score, _)| *score < min || *score > max);
                Ok((before - set.len()) as u64)
            }
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.with_entry(key, |entry| match entry {
            None => Ok(0),
            Some(StoreEntry {
                value: StoredValue::Sorted(set),
                ..
            }) => Ok(set.len() as u64),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn zmin_score(&self, key: &str) -> Result<Option<u64>> {
        self.with_entry(key, |entry| match entry {
            None => Ok(None),
            Some(StoreEntry {
                value: StoredValue::Sorted(set),
                ..
            }) => Ok(set.first().map(|(score, _)| *score)),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn sliding_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        member: &str,
    ) -> Result<WindowCount> {
        // One lock for the whole update, so concurrent checks cannot interleave.
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, key);
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);
        let set = Self::sorted_mut(&mut entries, key)?;
        set.retain(|(score, m)| *score > cutoff && m != member);
        set.insert((now_ms, member.to_string()));
        let result = WindowCount {
            count: set.len() as u64,
            oldest_ms: set.first().map(|(score, _)| *score),
        };
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + window);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_keys() {
        let store = MemoryStore::new();
        store
            .set("k", b"v".to_vec(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn incr_by_accumulates() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("c", 2).await.unwrap(), 2);
        assert_eq!(store.incr_by("c", 3).await.unwrap(), 5);
        assert_eq!(store.get("c").await.unwrap(), Some(b"5".to_vec()));
    }

    #[tokio::test]
    async fn wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert!(store.incr_by("k", 1).await.is_err());
        assert!(store.zadd("k", 1, "m").await.is_err());
    }

    #[tokio::test]
    async fn sorted_set_primitives() {
        let store = MemoryStore::new();
        store.zadd("z", 10, "a").await.unwrap();
        store.zadd("z", 20, "b").await.unwrap();
        store.zadd("z", 30, "c").await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 3);
        assert_eq!(store.zrem_range_by_score("z", 0, 20).await.unwrap(), 2);
        assert_eq!(store.zmin_score("z").await.unwrap(), Some(30));
    }

    #[tokio::test]
    async fn sliding_window_prunes_old_entries() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(100);
        store.sliding_window("w", 1_000, window, "1").await.unwrap();
        store.sliding_window("w", 1_050, window, "2").await.unwrap();
        let result = store.sliding_window("w", 1_120, window, "3").await.unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(result.oldest_ms, Some(1_050));
    }
}

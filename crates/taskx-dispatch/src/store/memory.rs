//! In-process store for tests, demos and single-node deployments.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Store, StoreError};

enum Value {
    Text(String),
    List(VecDeque<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// [`Store`] backed by a mutex-guarded map.
///
/// Expired keys are purged lazily when touched. Expiry follows
/// `tokio::time`, so tests running on a paused clock can advance it.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Drop `key` if it has expired, then return it.
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

/// Resolve a Redis-style inclusive range against a list of `len` elements.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let existed = live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let matches = match live(&mut entries, key) {
            None => false,
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => text == expected,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().await;
        if live(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::List(VecDeque::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::List(list)) => {
                list.push_back(value.to_string());
                Ok(list.len())
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        let list = match live(&mut entries, key) {
            None => return Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        let Some((from, to)) = resolve_range(list.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(list.range(from..=to).cloned().collect())
    }

    async fn remove(&self, key: &str, count: isize, value: &str) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().await;
        let list = match live(&mut entries, key) {
            None => return Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };

        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs()
        };
        let mut removed = 0;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }

        if list.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_nx_only_sets_absent_keys() {
        let store = MemoryStore::new();
        assert!(store.set_nx("lock", "a", TTL).await.unwrap());
        assert!(!store.set_nx("lock", "b", TTL).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire() {
        let store = MemoryStore::new();
        store.set_ex("hb", "1", Duration::from_secs(5)).await.unwrap();
        assert!(store.set_nx("lock", "a", Duration::from_secs(5)).await.is_ok());

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.get("hb").await.unwrap(), None);
        assert!(store.set_nx("lock", "b", TTL).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = MemoryStore::new();
        store.set_ex("lock", "token-1", TTL).await.unwrap();

        assert!(!store.compare_and_delete("lock", "token-2").await.unwrap());
        assert!(store.compare_and_delete("lock", "token-1").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
        assert!(!store.compare_and_delete("lock", "token-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_range_uses_inclusive_indexes() {
        let store = MemoryStore::new();
        for id in ["t1", "t2", "t3", "t4"] {
            store.push_back("queue", id).await.unwrap();
        }

        assert_eq!(store.range("queue", 0, 1).await.unwrap(), vec!["t1", "t2"]);
        assert_eq!(store.range("queue", 0, -1).await.unwrap().len(), 4);
        assert_eq!(store.range("queue", -2, -1).await.unwrap(), vec!["t3", "t4"]);
        assert_eq!(store.range("queue", 2, 100).await.unwrap(), vec!["t3", "t4"]);
        assert!(store.range("queue", 5, 10).await.unwrap().is_empty());
        assert!(store.range("queue", 0, -1 - 4).await.unwrap().is_empty());
        assert!(store.range("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_counts() {
        let store = MemoryStore::new();
        for id in ["a", "b", "a", "c", "a"] {
            store.push_back("queue", id).await.unwrap();
        }

        assert_eq!(store.remove("queue", 1, "a").await.unwrap(), 1);
        assert_eq!(
            store.range("queue", 0, -1).await.unwrap(),
            vec!["b", "a", "c", "a"]
        );

        assert_eq!(store.remove("queue", -1, "a").await.unwrap(), 1);
        assert_eq!(store.range("queue", 0, -1).await.unwrap(), vec!["b", "a", "c"]);

        assert_eq!(store.remove("queue", 0, "zzz").await.unwrap(), 0);
        store.remove("queue", 0, "a").await.unwrap();
        store.remove("queue", 0, "b").await.unwrap();
        store.remove("queue", 0, "c").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.push_back("queue", "t1").await.unwrap();
        store.set_ex("text", "v", TTL).await.unwrap();

        assert!(matches!(
            store.get("queue").await,
            Err(StoreError::WrongType(_))
        ));
        assert!(matches!(
            store.push_back("text", "t1").await,
            Err(StoreError::WrongType(_))
        ));
    }
}

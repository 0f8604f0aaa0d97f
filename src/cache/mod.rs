//! TTL-bounded response caches owned by the catalog clients.

pub mod persistent;

use std::hash::Hash;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use persistent::PersistentCache;

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

/// A cached value and the time it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub fetched_at_unix_ms: i64,
    pub value: V,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh_at(&self, now_unix_ms: i64, ttl: Duration) -> bool {
        now_unix_ms.saturating_sub(self.fetched_at_unix_ms) < ttl.as_millis() as i64
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord<K, V> {
    key: K,
    #[serde(flatten)]
    entry: CacheEntry<V>,
}

/// One named section of the durable snapshot.
pub trait SnapshotSection: Send + Sync {
    fn section_name(&self) -> &'static str;
    /// Live entries no older than `max_age`, as a JSON array.
    fn export(&self, now_unix_ms: i64, max_age: Duration) -> Value;
    /// Loads entries from a previously exported array, skipping stale ones.
    /// Returns the number of restored entries.
    fn restore(&self, snapshot: &Value, now_unix_ms: i64, max_age: Duration) -> usize;
}

/// Concurrent key/value cache with one TTL for its whole class of entries.
pub struct ResponseCache<K, V> {
    name: &'static str,
    ttl: Duration,
    entries: DashMap<K, CacheEntry<V>>,
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, now_unix_ms())
    }

    /// Returns the value only while it is younger than the TTL; expired
    /// entries are evicted on sight.
    pub fn get_at(&self, key: &K, now_unix_ms: i64) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh_at(now_unix_ms, self.ttl) {
                return Some(entry.value.clone());
            }
        }
        self.entries
            .remove_if(key, |_, entry| !entry.is_fresh_at(now_unix_ms, self.ttl));
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, now_unix_ms());
    }

    pub fn insert_at(&self, key: K, value: V, fetched_at_unix_ms: i64) {
        self.entries.insert(
            key,
            CacheEntry {
                fetched_at_unix_ms,
                value,
            },
        );
    }

    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, V> SnapshotSection for ResponseCache<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned + Send + Sync,
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    fn section_name(&self) -> &'static str {
        self.name
    }

    fn export(&self, now_unix_ms: i64, max_age: Duration) -> Value {
        let keep_for = self.ttl.min(max_age);
        let records: Vec<Value> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_fresh_at(now_unix_ms, keep_for))
            .filter_map(|entry| {
                let record = SnapshotRecord {
                    key: entry.key().clone(),
                    entry: entry.value().clone(),
                };
                match serde_json::to_value(&record) {
                    Ok(value) => Some(value),
                    Err(error) => {
                        warn!("Cache[{}]: skipping unserializable entry: {error}", self.name);
                        None
                    }
                }
            })
            .collect();
        Value::Array(records)
    }

    fn restore(&self, snapshot: &Value, now_unix_ms: i64, max_age: Duration) -> usize {
        let Some(records) = snapshot.as_array() else {
            warn!("Cache[{}]: snapshot section is not an array", self.name);
            return 0;
        };
        let keep_for = self.ttl.min(max_age);
        let mut restored = 0usize;
        for raw in records {
            let record = match serde_json::from_value::<SnapshotRecord<K, V>>(raw.clone()) {
                Ok(record) => record,
                Err(error) => {
                    warn!("Cache[{}]: dropping unreadable snapshot entry: {error}", self.name);
                    continue;
                }
            };
            if !record.entry.is_fresh_at(now_unix_ms, keep_for) {
                continue;
            }
            // Entries fetched during this process win over the snapshot.
            self.entries.entry(record.key).or_insert(record.entry);
            restored += 1;
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ResponseCache, SnapshotSection};

    const HOUR_MS: i64 = 60 * 60 * 1000;

    #[test]
    fn test_get_at_returns_entries_younger_than_ttl() {
        let cache: ResponseCache<i64, String> =
            ResponseCache::new("episodes", Duration::from_secs(6 * 60 * 60));
        cache.insert_at(1, "listing".to_string(), 0);
        assert_eq!(cache.get_at(&1, 5 * HOUR_MS), Some("listing".to_string()));
        assert_eq!(cache.get_at(&1, 6 * HOUR_MS), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_export_and_restore_skip_entries_older_than_max_age() {
        let ttl = Duration::from_secs(5 * 24 * 60 * 60);
        let source: ResponseCache<i64, Vec<String>> = ResponseCache::new("tags", ttl);
        source.insert_at(1, vec!["Mecha".to_string()], 0);
        source.insert_at(2, vec!["Space".to_string()], 100 * HOUR_MS);

        let exported = source.export(110 * HOUR_MS, Duration::from_secs(4 * 24 * 60 * 60));
        assert_eq!(exported.as_array().map(Vec::len), Some(1));

        let target: ResponseCache<i64, Vec<String>> = ResponseCache::new("tags", ttl);
        let restored = target.restore(&exported, 110 * HOUR_MS, ttl);
        assert_eq!(restored, 1);
        assert_eq!(
            target.get_at(&2, 110 * HOUR_MS),
            Some(vec!["Space".to_string()])
        );
        assert_eq!(target.get_at(&1, 110 * HOUR_MS), None);
    }

    #[test]
    fn test_restore_keeps_entries_written_in_process() {
        let ttl = Duration::from_secs(60);
        let cache: ResponseCache<String, u32> = ResponseCache::new("graph", ttl);
        cache.insert_at("a".to_string(), 2, 1_000);
        let snapshot = serde_json::json!([
            {"key": "a", "fetched_at_unix_ms": 500, "value": 1},
            {"key": "b", "fetched_at_unix_ms": 500, "value": 3},
        ]);
        assert_eq!(cache.restore(&snapshot, 1_000, ttl), 2);
        assert_eq!(cache.get_at(&"a".to_string(), 1_000), Some(2));
        assert_eq!(cache.get_at(&"b".to_string(), 1_000), Some(3));
    }
}

//! Durable snapshot of every registered response cache.
//!
//! The snapshot is one JSON file per data directory. It is read lazily on
//! first use and rewritten in full after each cache write. Disk problems are
//! logged and never reach the caller; the in-memory caches stay authoritative.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::{now_unix_ms, SnapshotSection};

pub const SNAPSHOT_FILE_NAME: &str = "provider-cache.json";
const SNAPSHOT_VERSION: u64 = 1;

#[derive(Default)]
struct LoadState {
    loaded: bool,
    /// Sections read from disk whose cache has not been registered yet.
    unclaimed: Map<String, Value>,
}

pub struct PersistentCache {
    path: PathBuf,
    max_age: Duration,
    sections: Mutex<Vec<Arc<dyn SnapshotSection>>>,
    load_state: Mutex<LoadState>,
    write_lock: Mutex<()>,
}

impl PersistentCache {
    pub fn new(data_dir: &Path, max_age: Duration) -> Self {
        Self {
            path: data_dir.join(SNAPSHOT_FILE_NAME),
            max_age,
            sections: Mutex::new(Vec::new()),
            load_state: Mutex::new(LoadState::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn register(&self, section: Arc<dyn SnapshotSection>) {
        if let Ok(mut state) = self.load_state.lock() {
            if state.loaded {
                if let Some(snapshot) = state.unclaimed.remove(section.section_name()) {
                    section.restore(&snapshot, now_unix_ms(), self.max_age);
                }
            }
        }
        if let Ok(mut sections) = self.sections.lock() {
            sections.push(section);
        }
    }

    /// Reads the snapshot into the registered caches once per process.
    pub fn ensure_loaded(&self) {
        let Ok(mut state) = self.load_state.lock() else {
            return;
        };
        if state.loaded {
            return;
        }
        state.loaded = true;

        let Some(mut sections_on_disk) = self.read_snapshot() else {
            return;
        };
        let now = now_unix_ms();
        let registered = match self.sections.lock() {
            Ok(sections) => sections.clone(),
            Err(_) => Vec::new(),
        };
        let mut restored_total = 0usize;
        for section in registered {
            if let Some(snapshot) = sections_on_disk.remove(section.section_name()) {
                restored_total += section.restore(&snapshot, now, self.max_age);
            }
        }
        state.unclaimed = sections_on_disk;
        info!(
            "Restored {} cached responses from {}",
            restored_total,
            self.path.display()
        );
    }

    fn read_snapshot(&self) -> Option<Map<String, Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache snapshot at {}", self.path.display());
                return None;
            }
            Err(error) => {
                warn!(
                    "Failed to read cache snapshot {}: {}",
                    self.path.display(),
                    error
                );
                return None;
            }
        };
        let parsed: Value = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(
                    "Ignoring unreadable cache snapshot {}: {}",
                    self.path.display(),
                    error
                );
                return None;
            }
        };
        match parsed.get("sections") {
            Some(Value::Object(sections)) => Some(sections.clone()),
            _ => {
                warn!(
                    "Cache snapshot {} has no sections table",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Re-serializes every live entry of every registered cache.
    pub fn flush(&self) {
        let Ok(_guard) = self.write_lock.lock() else {
            return;
        };
        let now = now_unix_ms();
        let mut sections = Map::new();
        if let Ok(registered) = self.sections.lock() {
            for section in registered.iter() {
                sections.insert(
                    section.section_name().to_string(),
                    section.export(now, self.max_age),
                );
            }
        }
        // Keep sections from disk that no live cache has claimed yet.
        if let Ok(state) = self.load_state.lock() {
            for (name, snapshot) in &state.unclaimed {
                sections
                    .entry(name.clone())
                    .or_insert_with(|| snapshot.clone());
            }
        }
        let document = serde_json::json!({
            "version": SNAPSHOT_VERSION,
            "saved_at_unix_ms": now,
            "sections": Value::Object(sections),
        });
        if let Err(error) = self.write_document(&document) {
            warn!(
                "Failed to persist cache snapshot {}: {}",
                self.path.display(),
                error
            );
        }
    }

    fn write_document(&self, document: &Value) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| format!("create {}: {error}", parent.display()))?;
        }
        let text = serde_json::to_string(document)
            .map_err(|error| format!("serialize snapshot: {error}"))?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, text)
            .map_err(|error| format!("write {}: {error}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path).map_err(|error| {
            let _ = fs::remove_file(&temp_path);
            format!("rename into {}: {error}", self.path.display())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::PersistentCache;
    use crate::cache::ResponseCache;

    const FIVE_DAYS: Duration = Duration::from_secs(5 * 24 * 60 * 60);

    #[test]
    fn test_snapshot_survives_process_restart() {
        let dir = tempfile::tempdir().expect("temp dir");

        let store = PersistentCache::new(dir.path(), FIVE_DAYS);
        let tags: Arc<ResponseCache<i64, Vec<String>>> =
            Arc::new(ResponseCache::new("tags", FIVE_DAYS));
        store.register(tags.clone());
        store.ensure_loaded();
        tags.insert(23, vec!["Mecha".to_string()]);
        store.flush();
        assert!(store.path().exists());

        let restarted = PersistentCache::new(dir.path(), FIVE_DAYS);
        let restored_tags: Arc<ResponseCache<i64, Vec<String>>> =
            Arc::new(ResponseCache::new("tags", FIVE_DAYS));
        restarted.register(restored_tags.clone());
        restarted.ensure_loaded();
        assert_eq!(restored_tags.get(&23), Some(vec!["Mecha".to_string()]));
    }

    #[test]
    fn test_late_registration_claims_loaded_section() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = PersistentCache::new(dir.path(), FIVE_DAYS);
        let graph: Arc<ResponseCache<i64, String>> =
            Arc::new(ResponseCache::new("graph", FIVE_DAYS));
        store.register(graph.clone());
        graph.insert(121, "root".to_string());
        store.flush();

        let restarted = PersistentCache::new(dir.path(), FIVE_DAYS);
        restarted.ensure_loaded();
        let late: Arc<ResponseCache<i64, String>> =
            Arc::new(ResponseCache::new("graph", FIVE_DAYS));
        restarted.register(late.clone());
        assert_eq!(late.get(&121), Some("root".to_string()));
    }

    #[test]
    fn test_corrupt_snapshot_is_ignored() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join(super::SNAPSHOT_FILE_NAME), "{not json")
            .expect("write corrupt snapshot");
        let store = PersistentCache::new(dir.path(), FIVE_DAYS);
        let graph: Arc<ResponseCache<i64, String>> =
            Arc::new(ResponseCache::new("graph", FIVE_DAYS));
        store.register(graph.clone());
        store.ensure_loaded();
        assert!(graph.is_empty());
        graph.insert(1, "entry".to_string());
        store.flush();
        let text = std::fs::read_to_string(store.path()).expect("snapshot rewritten");
        assert!(text.contains("\"graph\""));
    }
}

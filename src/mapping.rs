//! Cross-reference table: one row per title, one column per catalog id.
//!
//! The table is rebuilt off to the side and swapped in whole, so lookups
//! never observe a partially indexed snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::MappingError;
use crate::http::HttpTransport;

/// One title's identifiers across catalogs. Numeric ids may arrive as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct CrossReferenceRow {
    #[serde(rename = "thetvdb_id", default, deserialize_with = "lenient_id")]
    pub tvdb_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub imdb_id: Option<String>,
    #[serde(rename = "anilist_id", default, deserialize_with = "lenient_id")]
    pub graph_id: Option<i64>,
    #[serde(rename = "anidb_id", default, deserialize_with = "lenient_id")]
    pub tag_id: Option<i64>,
    #[serde(rename = "mal_id", default, deserialize_with = "lenient_id")]
    pub encyclopedia_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub kitsu_id: Option<i64>,
    #[serde(rename = "themoviedb_id", default, deserialize_with = "lenient_id")]
    pub tmdb_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub anisearch_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub livechart_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub notify_moe_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub animeplanet_id: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient_text")]
    pub media_type: Option<String>,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64)),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        _ => None,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// Which index a lookup goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    /// Episode-catalog series id.
    EpisodeCatalog,
    /// External-database id (`tt…`).
    ExternalDatabase,
    /// Relation-graph entry id.
    Graph,
}

fn normalize_key(kind: IdKind, value: &str) -> String {
    let trimmed = value.trim();
    match kind {
        IdKind::ExternalDatabase => trimmed.to_ascii_lowercase(),
        IdKind::EpisodeCatalog | IdKind::Graph => trimmed
            .parse::<i64>()
            .map(|number| number.to_string())
            .unwrap_or_else(|_| trimmed.to_string()),
    }
}

/// Immutable indexed snapshot.
#[derive(Debug, Default)]
pub struct MappingTables {
    rows: Vec<CrossReferenceRow>,
    indexes: HashMap<IdKind, HashMap<String, usize>>,
}

impl MappingTables {
    /// Indexes rows; the first row carrying an identifier owns it.
    pub fn build(rows: Vec<CrossReferenceRow>) -> Self {
        let mut indexes: HashMap<IdKind, HashMap<String, usize>> = HashMap::new();
        for (position, row) in rows.iter().enumerate() {
            let keys = [
                (IdKind::EpisodeCatalog, row.tvdb_id.map(|id| id.to_string())),
                (IdKind::ExternalDatabase, row.imdb_id.clone()),
                (IdKind::Graph, row.graph_id.map(|id| id.to_string())),
            ];
            for (kind, key) in keys {
                let Some(key) = key else {
                    continue;
                };
                indexes
                    .entry(kind)
                    .or_default()
                    .entry(normalize_key(kind, &key))
                    .or_insert(position);
            }
        }
        Self { rows, indexes }
    }

    pub fn lookup(&self, kind: IdKind, value: &str) -> Option<&CrossReferenceRow> {
        let position = self.indexes.get(&kind)?.get(&normalize_key(kind, value))?;
        self.rows.get(*position)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parses the bulk payload, skipping rows that are not objects.
pub fn parse_rows(body: &str) -> Result<Vec<CrossReferenceRow>, MappingError> {
    let raw_rows: Vec<Value> =
        serde_json::from_str(body).map_err(|error| MappingError::Parse(error.to_string()))?;
    let total = raw_rows.len();
    let rows: Vec<CrossReferenceRow> = raw_rows
        .into_iter()
        .filter_map(|raw| serde_json::from_value(raw).ok())
        .collect();
    if rows.len() < total {
        warn!(
            "Mapping: skipped {} unreadable cross-reference rows",
            total - rows.len()
        );
    }
    Ok(rows)
}

/// Longest wait before a failed refresh is retried.
const MAX_FAILURE_BACKOFF: Duration = Duration::from_secs(10 * 60);

pub struct IdentityMapper {
    transport: Arc<dyn HttpTransport>,
    source_url: String,
    refresh_interval: Duration,
    tables: RwLock<Arc<MappingTables>>,
    loaded_at: Mutex<Option<Instant>>,
    last_failure: Mutex<Option<(Instant, MappingError)>>,
    refresh_lock: Mutex<()>,
}

impl IdentityMapper {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        source_url: impl Into<String>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            transport,
            source_url: source_url.into(),
            refresh_interval,
            tables: RwLock::new(Arc::new(MappingTables::default())),
            loaded_at: Mutex::new(None),
            last_failure: Mutex::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<MappingTables> {
        self.tables
            .read()
            .map(|tables| Arc::clone(&tables))
            .unwrap_or_default()
    }

    /// Replaces the live tables with an index over `rows`.
    pub fn load_rows(&self, rows: Vec<CrossReferenceRow>) -> usize {
        let tables = Arc::new(MappingTables::build(rows));
        let count = tables.len();
        if let Ok(mut live) = self.tables.write() {
            *live = tables;
        }
        if let Ok(mut loaded_at) = self.loaded_at.lock() {
            *loaded_at = Some(Instant::now());
        }
        count
    }

    /// Fetches the full table and swaps it in. On failure the previous
    /// snapshot stays live and the error is returned.
    pub fn refresh(&self) -> Result<usize, MappingError> {
        let _guard = self
            .refresh_lock
            .lock()
            .map_err(|_| MappingError::Fetch("refresh lock poisoned".to_string()))?;
        self.download()
    }

    fn download(&self) -> Result<usize, MappingError> {
        info!("Mapping: downloading cross-reference table");
        let response = self
            .transport
            .get(&self.source_url, &[("Accept", "application/json")])
            .map_err(MappingError::Fetch)?;
        if !response.is_success() {
            return Err(MappingError::Fetch(format!(
                "status {} from {}",
                response.status, self.source_url
            )));
        }
        let rows = parse_rows(&response.body)?;
        let count = self.load_rows(rows);
        if let Ok(mut failure) = self.last_failure.lock() {
            *failure = None;
        }
        info!("Mapping: indexed {count} cross-reference rows");
        Ok(count)
    }

    fn failure_backoff(&self) -> Duration {
        self.refresh_interval.min(MAX_FAILURE_BACKOFF)
    }

    /// Error of a refresh that failed less than the backoff ago.
    fn recent_failure_at(&self, now: Instant) -> Option<MappingError> {
        let failure = self.last_failure.lock().ok()?;
        let (failed_at, error) = failure.as_ref()?;
        (now.saturating_duration_since(*failed_at) < self.failure_backoff()).then(|| error.clone())
    }

    fn is_stale_at(&self, now: Instant) -> bool {
        self.loaded_at
            .lock()
            .map(|loaded_at| {
                loaded_at.map_or(true, |instant| {
                    now.saturating_duration_since(instant) >= self.refresh_interval
                })
            })
            .unwrap_or(true)
    }

    /// Outcome when no download is due: the recent failure when there is no
    /// snapshot to serve, else success.
    fn settled_without_download(&self, now: Instant) -> Option<Result<(), MappingError>> {
        if !self.is_stale_at(now) {
            return Some(Ok(()));
        }
        let failure = self.recent_failure_at(now)?;
        if self.snapshot().is_empty() {
            Some(Err(failure))
        } else {
            Some(Ok(()))
        }
    }

    /// Refreshes only once the table TTL has passed. A failed refresh is
    /// fatal only when there is no earlier snapshot to fall back on, and is not
    /// retried until the failure backoff has passed.
    pub fn refresh_if_stale(&self) -> Result<(), MappingError> {
        self.refresh_if_stale_at(Instant::now())
    }

    pub fn refresh_if_stale_at(&self, now: Instant) -> Result<(), MappingError> {
        if let Some(outcome) = self.settled_without_download(now) {
            return outcome;
        }
        let _guard = self
            .refresh_lock
            .lock()
            .map_err(|_| MappingError::Fetch("refresh lock poisoned".to_string()))?;
        // Another caller may have refreshed, or failed, while this one queued.
        if let Some(outcome) = self.settled_without_download(now) {
            return outcome;
        }
        match self.download() {
            Ok(_) => Ok(()),
            Err(error) => {
                if let Ok(mut failure) = self.last_failure.lock() {
                    *failure = Some((now, error.clone()));
                }
                if self.snapshot().is_empty() {
                    return Err(error);
                }
                warn!(
                    "Mapping: refresh failed, keeping previous table for {:?}: {error}",
                    self.failure_backoff()
                );
                Ok(())
            }
        }
    }

    pub fn lookup(&self, kind: IdKind, value: &str) -> Option<CrossReferenceRow> {
        let found = self.snapshot().lookup(kind, value).cloned();
        debug!(
            "Mapping: lookup {:?} {} -> {}",
            kind,
            value,
            if found.is_some() { "hit" } else { "miss" }
        );
        found
    }

    pub fn lookup_graph(&self, graph_id: i64) -> Option<CrossReferenceRow> {
        self.lookup(IdKind::Graph, &graph_id.to_string())
    }
}

//! Encyclopedia-mirror client (REST GET, JSON body).

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::graph::Person;
use super::{classify_status, decode_json, non_blank};
use crate::cache::ResponseCache;
use crate::cancellation::CancellationFlag;
use crate::config::SourcesConfig;
use crate::error::{SourceError, SourceResult};
use crate::http::{jitter_ms, HttpResponse, HttpTransport};
use crate::rate_limit::SpacingLimiter;

pub const CATALOG: &str = "encyclopedia";
const RECORD_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const BACKOFF_UNIT: Duration = Duration::from_secs(30);
const BACKOFF_CEILING: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedResource {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiredRange {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// One encyclopedia entry, in the mirror's own field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncyclopediaRecord {
    #[serde(rename = "mal_id", default)]
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_english: Option<String>,
    #[serde(default)]
    pub title_japanese: Option<String>,
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub aired: Option<AiredRange>,
    /// Parental rating label.
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub synopsis: Option<String>,
    /// Free text such as `24 min per ep`.
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub genres: Vec<NamedResource>,
    #[serde(default)]
    pub explicit_genres: Vec<NamedResource>,
    #[serde(default)]
    pub themes: Vec<NamedResource>,
    #[serde(default)]
    pub demographics: Vec<NamedResource>,
    #[serde(default)]
    pub studios: Vec<NamedResource>,
}

fn duration_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(\d+)\s*min").ok())
        .as_ref()
}

/// Leading minute count of a duration string.
pub fn parse_runtime_minutes(duration: &str) -> Option<u32> {
    duration_pattern()?
        .captures(duration)
        .and_then(|captures| captures.get(1))
        .and_then(|minutes| minutes.as_str().parse().ok())
}

/// Normalized airing status.
pub fn map_status(status: Option<&str>) -> String {
    let Some(status) = status else {
        return "Unknown".to_string();
    };
    match status.to_lowercase().as_str() {
        "currently airing" => "Continuing".to_string(),
        "finished airing" => "Ended".to_string(),
        "not yet aired" => "Not yet released".to_string(),
        _ => status.to_string(),
    }
}

impl EncyclopediaRecord {
    pub fn runtime_minutes(&self) -> Option<u32> {
        self.duration.as_deref().and_then(parse_runtime_minutes)
    }

    /// Entries typed as something other than a TV series describe a side
    /// entry and must not feed a series record.
    pub fn is_series(&self) -> bool {
        match self.media_type.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(kind) => kind
                .get(..2)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("TV")),
        }
    }

    pub fn synopsis(&self) -> Option<String> {
        non_blank(self.synopsis.as_deref())
    }

    /// Genres, explicit genres, themes then demographics.
    pub fn genre_names(&self) -> Vec<String> {
        self.genres
            .iter()
            .chain(&self.explicit_genres)
            .chain(&self.themes)
            .chain(&self.demographics)
            .filter_map(|resource| non_blank(resource.name.as_deref()))
            .collect()
    }

    pub fn studio_names(&self) -> Vec<String> {
        let mut studios: Vec<String> = Vec::new();
        for name in self
            .studios
            .iter()
            .filter_map(|studio| non_blank(studio.name.as_deref()))
        {
            if !studios.contains(&name) {
                studios.push(name);
            }
        }
        studios
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct CharacterEntry {
    character: Option<CharacterInfo>,
    #[serde(default)]
    voice_actors: Vec<VoiceActorEntry>,
}

#[derive(Deserialize)]
struct CharacterInfo {
    name: Option<String>,
}

#[derive(Deserialize)]
struct VoiceActorEntry {
    person: Option<PersonInfo>,
}

#[derive(Deserialize)]
struct PersonInfo {
    name: Option<String>,
    images: Option<PersonImages>,
}

#[derive(Deserialize)]
struct PersonImages {
    webp: Option<ImageUrl>,
    jpg: Option<ImageUrl>,
}

#[derive(Deserialize)]
struct ImageUrl {
    image_url: Option<String>,
}

fn voice_actors_from(entries: Vec<CharacterEntry>) -> Vec<Person> {
    let mut people = Vec::new();
    for entry in entries {
        let Some(character) = entry.character else {
            continue;
        };
        let character_name = character.name.unwrap_or_default();
        for actor in entry.voice_actors {
            let person = actor.person;
            let image_url = person
                .as_ref()
                .and_then(|person| person.images.as_ref())
                .and_then(|images| {
                    images
                        .webp
                        .as_ref()
                        .or(images.jpg.as_ref())
                        .and_then(|image| image.image_url.clone())
                });
            people.push(Person {
                name: person
                    .and_then(|person| person.name)
                    .unwrap_or_else(|| "Unknown VA".to_string()),
                role: format!("Voice - {character_name}"),
                image_url,
            });
        }
    }
    people
}

pub struct EncyclopediaClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    spacing: SpacingLimiter,
    max_attempts: u32,
    backoff_unit: Duration,
    records: ResponseCache<i64, EncyclopediaRecord>,
}

impl EncyclopediaClient {
    pub fn new(transport: Arc<dyn HttpTransport>, sources: &SourcesConfig) -> Self {
        Self {
            transport,
            endpoint: sources.encyclopedia_endpoint.trim_end_matches('/').to_string(),
            spacing: SpacingLimiter::new(Duration::from_millis(
                sources.encyclopedia_min_spacing_ms,
            )),
            max_attempts: sources.encyclopedia_max_attempts.max(1),
            backoff_unit: BACKOFF_UNIT,
            records: ResponseCache::new(CATALOG, RECORD_CACHE_TTL),
        }
    }

    #[cfg(test)]
    fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    fn backoff_for(&self, attempt: u32, response: &HttpResponse) -> Duration {
        let fallback = self
            .backoff_unit
            .saturating_mul(attempt)
            .min(BACKOFF_CEILING);
        let base = response
            .retry_after
            .filter(|delay| !delay.is_zero())
            .unwrap_or(fallback);
        base + Duration::from_millis(jitter_ms(200, 600))
    }

    /// GET with spacing, retrying throttle responses with backoff.
    fn send(&self, url: &str, id: i64, cancel: &CancellationFlag) -> SourceResult<String> {
        for attempt in 1..=self.max_attempts {
            self.spacing.acquire(cancel)?;
            let response = self
                .transport
                .get(url, &[("Accept", "application/json")])
                .map_err(|error| SourceError::transient(CATALOG, error))?;
            cancel.check()?;
            if response.is_success() {
                return Ok(response.body);
            }
            if !matches!(response.status, 429 | 503) {
                return Err(classify_status(CATALOG, id, &response));
            }
            if attempt == self.max_attempts {
                break;
            }
            let backoff = self.backoff_for(attempt, &response);
            warn!(
                "Encyclopedia[{id}]: throttled (status {}), retry {attempt} in {:?}",
                response.status, backoff
            );
            cancel.sleep(backoff)?;
        }
        Err(SourceError::RateLimited {
            catalog: CATALOG,
            detail: format!("{url} still throttled after {} attempts", self.max_attempts),
        })
    }

    fn checked_id(id: i64) -> SourceResult<i64> {
        if id <= 0 || id > i64::from(i32::MAX) {
            return Err(SourceError::invalid_config(
                CATALOG,
                format!("id {id} outside the catalog id range"),
            ));
        }
        Ok(id)
    }

    pub fn anime(&self, id: i64, cancel: &CancellationFlag) -> SourceResult<EncyclopediaRecord> {
        let id = Self::checked_id(id)?;
        if let Some(record) = self.records.get(&id) {
            debug!("Encyclopedia[{id}]: cache hit");
            return Ok(record);
        }
        let url = format!("{}/anime/{id}", self.endpoint);
        let body = self.send(&url, id, cancel)?;
        let envelope: DataEnvelope<EncyclopediaRecord> = decode_json(CATALOG, &body)?;
        let record = envelope
            .data
            .ok_or_else(|| SourceError::not_found(CATALOG, id))?;
        self.records.insert(id, record.clone());
        Ok(record)
    }

    /// Voice actors listed on the entry's character page.
    pub fn voice_actors(&self, id: i64, cancel: &CancellationFlag) -> SourceResult<Vec<Person>> {
        let id = Self::checked_id(id)?;
        let url = format!("{}/anime/{id}/characters", self.endpoint);
        let body = self.send(&url, id, cancel)?;
        let envelope: DataEnvelope<Vec<CharacterEntry>> = decode_json(CATALOG, &body)?;
        Ok(voice_actors_from(envelope.data.unwrap_or_default()))
    }
}

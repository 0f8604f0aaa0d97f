//! Episode/artwork catalog client (bearer-token REST, paginated listings).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{classify_status, decode_json};
use crate::cache::{PersistentCache, ResponseCache};
use crate::cancellation::CancellationFlag;
use crate::config::SourcesConfig;
use crate::error::{SourceError, SourceResult};
use crate::http::{HttpResponse, HttpTransport};

pub const CATALOG: &str = "episodes";
pub const EPISODE_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
const TOKEN_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);
const MAX_LISTING_PAGES: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRecord {
    pub id: i64,
    #[serde(default)]
    pub series_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub aired: Option<String>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub number: Option<i32>,
    #[serde(default)]
    pub absolute_number: Option<i32>,
    #[serde(default)]
    pub season_number: Option<i32>,
    #[serde(default)]
    pub season_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonType {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// Display order key (`default`, `official`, `absolute`, ...).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonSummary {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub season_type: Option<SeasonType>,
    #[serde(default)]
    pub number: Option<i32>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artwork {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(rename = "type", default)]
    pub artwork_type: Option<i32>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub includes_text: Option<bool>,
    #[serde(default)]
    pub season_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesExtended {
    pub id: i64,
    #[serde(default)]
    pub artworks: Vec<Artwork>,
    #[serde(default)]
    pub seasons: Vec<SeasonSummary>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Deserialize)]
struct LoginData {
    token: Option<String>,
}

#[derive(Deserialize)]
struct EpisodePage {
    #[serde(default)]
    episodes: Vec<EpisodeRecord>,
}

struct BearerToken {
    value: String,
    expires_at: Instant,
}

impl BearerToken {
    fn is_usable_at(&self, now: Instant) -> bool {
        self.expires_at > now + TOKEN_REFRESH_MARGIN
    }
}

pub struct EpisodeClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    api_key: String,
    token: Mutex<Option<BearerToken>>,
    listings: Arc<ResponseCache<i64, Vec<EpisodeRecord>>>,
    series: Arc<ResponseCache<i64, SeriesExtended>>,
    persistent: Option<Arc<PersistentCache>>,
}

impl EpisodeClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sources: &SourcesConfig,
        persistent: Option<Arc<PersistentCache>>,
    ) -> Self {
        let listings = Arc::new(ResponseCache::new("episode_listings", EPISODE_CACHE_TTL));
        let series = Arc::new(ResponseCache::new("episode_series", EPISODE_CACHE_TTL));
        if let Some(store) = &persistent {
            store.register(listings.clone());
            store.register(series.clone());
        }
        Self {
            transport,
            endpoint: sources.episode_endpoint.trim_end_matches('/').to_string(),
            api_key: sources.episode_api_key.trim().to_string(),
            token: Mutex::new(None),
            listings,
            series,
            persistent,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn ensure_loaded(&self) {
        if let Some(store) = &self.persistent {
            store.ensure_loaded();
        }
    }

    fn flush(&self) {
        if let Some(store) = &self.persistent {
            store.flush();
        }
    }

    /// Returns a usable token, logging in when none is held. The lock is held
    /// across the login so concurrent callers share one login.
    fn bearer_token(&self) -> SourceResult<String> {
        if !self.is_configured() {
            return Err(SourceError::invalid_config(
                CATALOG,
                "project API key is missing",
            ));
        }
        let mut held = self
            .token
            .lock()
            .map_err(|_| SourceError::transient(CATALOG, "token lock poisoned"))?;
        if let Some(token) = held.as_ref() {
            if token.is_usable_at(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .transport
            .post_json(
                &format!("{}/login", self.endpoint),
                &[("Accept", "application/json")],
                &json!({ "apikey": self.api_key }),
            )
            .map_err(|error| SourceError::transient(CATALOG, error))?;
        if !response.is_success() {
            *held = None;
            return Err(SourceError::transient(
                CATALOG,
                format!("login failed with status {}", response.status),
            ));
        }
        let envelope: Envelope<LoginData> = decode_json(CATALOG, &response.body)?;
        let value = envelope
            .data
            .and_then(|data| data.token)
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| SourceError::malformed(CATALOG, "login returned no token"))?;
        info!("Episodes: obtained bearer token");
        *held = Some(BearerToken {
            value: value.clone(),
            expires_at: Instant::now() + TOKEN_LIFETIME,
        });
        Ok(value)
    }

    fn discard_token(&self) {
        if let Ok(mut held) = self.token.lock() {
            *held = None;
        }
    }

    fn get_with_token(&self, url: &str, token: &str) -> SourceResult<HttpResponse> {
        let authorization = format!("Bearer {token}");
        self.transport
            .get(
                url,
                &[
                    ("Authorization", authorization.as_str()),
                    ("Accept", "application/json"),
                ],
            )
            .map_err(|error| SourceError::transient(CATALOG, error))
    }

    /// Authorized GET. An unauthorized answer drops the token, logs in again
    /// and retries exactly once.
    fn get_authorized(&self, url: &str, cancel: &CancellationFlag) -> SourceResult<HttpResponse> {
        cancel.check()?;
        let token = self.bearer_token()?;
        let response = self.get_with_token(url, &token)?;
        if response.status != 401 {
            return Ok(response);
        }
        info!("Episodes: token rejected, logging in again for {url}");
        self.discard_token();
        cancel.check()?;
        let token = self.bearer_token()?;
        self.get_with_token(url, &token)
    }

    fn get_data<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        id: i64,
        cancel: &CancellationFlag,
    ) -> SourceResult<T> {
        let response = self.get_authorized(url, cancel)?;
        if !response.is_success() {
            return Err(classify_status(CATALOG, id, &response));
        }
        let envelope: Envelope<T> = decode_json(CATALOG, &response.body)?;
        envelope
            .data
            .ok_or_else(|| SourceError::not_found(CATALOG, id))
    }

    fn fetch_page(
        &self,
        url: &str,
        series_id: i64,
        cancel: &CancellationFlag,
    ) -> SourceResult<Envelope<EpisodePage>> {
        let response = self.get_authorized(url, cancel)?;
        if !response.is_success() {
            return Err(classify_status(CATALOG, series_id, &response));
        }
        decode_json(CATALOG, &response.body)
    }

    /// Every episode of a series in default order, following `links.next`.
    /// A failure after the first page yields the episodes read so far, uncached.
    pub fn episodes(
        &self,
        series_id: i64,
        cancel: &CancellationFlag,
    ) -> SourceResult<Vec<EpisodeRecord>> {
        self.ensure_loaded();
        if let Some(episodes) = self.listings.get(&series_id) {
            debug!("Episodes[{series_id}]: listing cache hit");
            return Ok(episodes);
        }

        let mut episodes = Vec::new();
        let mut next_url = Some(format!(
            "{}/series/{series_id}/episodes/default?page=0",
            self.endpoint
        ));
        let mut pages = 0usize;
        let mut complete = true;
        while let Some(url) = next_url.take() {
            if pages == MAX_LISTING_PAGES {
                warn!("Episodes[{series_id}]: stopping after {MAX_LISTING_PAGES} pages");
                break;
            }
            pages += 1;
            let envelope = match self.fetch_page(&url, series_id, cancel) {
                Ok(envelope) => envelope,
                Err(error) if pages == 1 || error == SourceError::Cancelled => return Err(error),
                Err(error) => {
                    warn!(
                        "Episodes[{series_id}]: page {pages} failed, keeping partial listing: {error}"
                    );
                    complete = false;
                    break;
                }
            };
            if let Some(page) = envelope.data {
                debug!(
                    "Episodes[{series_id}]: page {pages} has {} episodes",
                    page.episodes.len()
                );
                episodes.extend(page.episodes);
            }
            next_url = envelope
                .links
                .and_then(|links| links.next)
                .filter(|next| !next.trim().is_empty());
        }

        if complete {
            info!(
                "Episodes[{series_id}]: cached {} episodes",
                episodes.len()
            );
            self.listings.insert(series_id, episodes.clone());
            self.flush();
        }
        Ok(episodes)
    }

    pub fn find_episode(
        &self,
        series_id: i64,
        season_number: i32,
        episode_number: i32,
        cancel: &CancellationFlag,
    ) -> SourceResult<EpisodeRecord> {
        self.episodes(series_id, cancel)?
            .into_iter()
            .find(|episode| {
                episode.season_number == Some(season_number)
                    && episode.number == Some(episode_number)
            })
            .ok_or_else(|| {
                SourceError::not_found(
                    CATALOG,
                    format!("{series_id} S{season_number:02}E{episode_number:02}"),
                )
            })
    }

    pub fn translation(
        &self,
        episode_id: i64,
        language: &str,
        cancel: &CancellationFlag,
    ) -> SourceResult<Translation> {
        let url = format!(
            "{}/episodes/{episode_id}/translations/{}",
            self.endpoint,
            urlencoding::encode(language)
        );
        self.get_data(&url, episode_id, cancel)
    }

    pub fn episode(&self, episode_id: i64, cancel: &CancellationFlag) -> SourceResult<EpisodeRecord> {
        let url = format!("{}/episodes/{episode_id}", self.endpoint);
        self.get_data(&url, episode_id, cancel)
    }

    /// Artworks and season list of a series.
    pub fn series_extended(
        &self,
        series_id: i64,
        cancel: &CancellationFlag,
    ) -> SourceResult<SeriesExtended> {
        self.ensure_loaded();
        if let Some(series) = self.series.get(&series_id) {
            debug!("Episodes[{series_id}]: series cache hit");
            return Ok(series);
        }
        let url = format!("{}/series/{series_id}/extended", self.endpoint);
        let series: SeriesExtended = self.get_data(&url, series_id, cancel)?;
        self.series.insert(series_id, series.clone());
        self.flush();
        Ok(series)
    }
}

//! Relation-graph catalog client (GraphQL over a single POST endpoint).

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{classify_status, decode_json, non_blank};
use crate::cache::{PersistentCache, ResponseCache};
use crate::cancellation::CancellationFlag;
use crate::config::SourcesConfig;
use crate::error::{SourceError, SourceResult};
use crate::http::HttpTransport;
use crate::rate_limit::SlidingWindowLimiter;

pub const CATALOG: &str = "graph";
pub const GRAPH_CACHE_TTL: Duration = Duration::from_secs(5 * 24 * 60 * 60);

const ENTRY_QUERY: &str = r#"query SeriesEntry($id: Int) {
  Media(id: $id) {
    id idMal type format status description genres duration averageScore episodes seasonYear
    title { romaji english native }
    startDate { year month day }
    endDate { year month day }
    relations {
      edges {
        relationType
        node {
          id type format episodes season seasonYear duration
          title { romaji english native }
          startDate { year month day }
        }
      }
    }
  }
}"#;

const SEASON_QUERY: &str = r#"query SeasonDetail($id: Int) {
  Media(id: $id) {
    id idMal type format status description genres duration averageScore episodes seasonYear
    title { romaji english native }
    startDate { year month day }
    endDate { year month day }
    relations { edges { relationType node { id type format duration seasonYear startDate { year month day } } } }
  }
}"#;

const PEOPLE_QUERY: &str = r#"query SeriesPeople($id: Int) {
  Media(id: $id) {
    characters(perPage: 50, sort: ROLE) {
      edges {
        role
        node { id name { full } }
        voiceActors(language: JAPANESE) { id name { full } image { large } }
      }
    }
    staff(perPage: 50, sort: RELEVANCE) {
      edges { role node { id name { full } image { large } } }
    }
  }
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Prequel,
    Sequel,
    SideStory,
    Parent,
    Summary,
    Alternative,
    SpinOff,
    Adaptation,
    Character,
    Other,
    Source,
    Compilation,
    Contains,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaFormat {
    Tv,
    TvShort,
    Movie,
    Special,
    Ova,
    Ona,
    Music,
    Manga,
    Novel,
    OneShot,
    #[serde(other)]
    Unrecognized,
}

impl MediaFormat {
    pub fn is_tv(self) -> bool {
        matches!(self, Self::Tv | Self::TvShort)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphTitle {
    #[serde(default)]
    pub romaji: Option<String>,
    #[serde(default)]
    pub english: Option<String>,
    #[serde(default)]
    pub native: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyDate {
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub day: Option<u32>,
}

impl FuzzyDate {
    /// `YYYY-MM-DD` when every part is known.
    pub fn to_iso_date(self) -> Option<String> {
        match (self.year, self.month, self.day) {
            (Some(year), Some(month), Some(day)) => Some(format!("{year:04}-{month:02}-{day:02}")),
            _ => None,
        }
    }
}

/// Summary of the entry at the far end of a relation edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedNode {
    pub id: i64,
    #[serde(default)]
    pub format: Option<MediaFormat>,
    /// Content type (`ANIME`, `MANGA`).
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub episodes: Option<u32>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub season_year: Option<i32>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub title: GraphTitle,
}

impl RelatedNode {
    pub fn is_anime(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("ANIME"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub kind: RelationKind,
    pub target: RelatedNode,
}

/// One graph-catalog entry with its outgoing relation edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEntry {
    pub id: i64,
    #[serde(default)]
    pub encyclopedia_id: Option<i64>,
    #[serde(default)]
    pub title: GraphTitle,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub average_score: Option<u32>,
    #[serde(default)]
    pub episodes: Option<u32>,
    #[serde(default)]
    pub format: Option<MediaFormat>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub season_year: Option<i32>,
    #[serde(default)]
    pub start_date: FuzzyDate,
    #[serde(default)]
    pub end_date: FuzzyDate,
    #[serde(default)]
    pub relations: Vec<RelationEdge>,
}

impl GraphEntry {
    pub fn year(&self) -> Option<i32> {
        self.start_date.year.or(self.season_year)
    }

    pub fn edges_of(&self, kind: RelationKind) -> impl Iterator<Item = &RelationEdge> {
        self.relations.iter().filter(move |edge| edge.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphCacheKind {
    Entry,
    Season,
    People,
    Root,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphKey {
    pub kind: GraphCacheKind,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", content = "data", rename_all = "snake_case")]
pub enum GraphPayload {
    Entry(GraphEntry),
    People(Vec<Person>),
    Root(i64),
}

mod wire {
    use serde::Deserialize;

    use super::{FuzzyDate, GraphTitle, MediaFormat, RelationKind};

    #[derive(Deserialize)]
    pub struct Envelope<T> {
        pub data: Option<MediaData<T>>,
    }

    #[derive(Deserialize)]
    pub struct MediaData<T> {
        #[serde(rename = "Media")]
        pub media: Option<T>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Media {
        pub id: i64,
        pub id_mal: Option<i64>,
        #[serde(rename = "type")]
        pub content_type: Option<String>,
        pub format: Option<MediaFormat>,
        pub status: Option<String>,
        pub description: Option<String>,
        #[serde(default)]
        pub genres: Option<Vec<Option<String>>>,
        pub duration: Option<u32>,
        pub average_score: Option<u32>,
        pub episodes: Option<u32>,
        pub season_year: Option<i32>,
        pub title: Option<GraphTitle>,
        pub start_date: Option<FuzzyDate>,
        pub end_date: Option<FuzzyDate>,
        pub relations: Option<Connection<RelationEdge>>,
    }

    #[derive(Deserialize)]
    #[serde(bound(deserialize = "T: Deserialize<'de>"))]
    pub struct Connection<T> {
        #[serde(default)]
        pub edges: Option<Vec<Option<T>>>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RelationEdge {
        pub relation_type: Option<RelationKind>,
        pub node: Option<RelationNode>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RelationNode {
        pub id: i64,
        #[serde(rename = "type")]
        pub content_type: Option<String>,
        pub format: Option<MediaFormat>,
        pub episodes: Option<u32>,
        pub season: Option<String>,
        pub season_year: Option<i32>,
        pub duration: Option<u32>,
        pub title: Option<GraphTitle>,
        pub start_date: Option<FuzzyDate>,
    }

    #[derive(Deserialize)]
    pub struct Name {
        pub full: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct Image {
        pub large: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct PeopleMedia {
        pub characters: Option<Connection<CharacterEdge>>,
        pub staff: Option<Connection<StaffEdge>>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CharacterEdge {
        pub node: Option<NamedNode>,
        #[serde(default)]
        pub voice_actors: Option<Vec<NamedNode>>,
    }

    #[derive(Deserialize)]
    pub struct StaffEdge {
        pub role: Option<String>,
        pub node: Option<NamedNode>,
    }

    #[derive(Deserialize)]
    pub struct NamedNode {
        pub name: Option<Name>,
        pub image: Option<Image>,
    }
}

impl From<wire::Media> for GraphEntry {
    fn from(media: wire::Media) -> Self {
        let relations = media
            .relations
            .and_then(|connection| connection.edges)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .filter_map(|edge| {
                let kind = edge.relation_type?;
                let node = edge.node?;
                let season_year = node
                    .season_year
                    .or_else(|| node.start_date.and_then(|date| date.year));
                Some(RelationEdge {
                    kind,
                    target: RelatedNode {
                        id: node.id,
                        format: node.format,
                        content_type: node.content_type,
                        episodes: node.episodes,
                        season: node.season,
                        season_year,
                        duration: node.duration,
                        title: node.title.unwrap_or_default(),
                    },
                })
            })
            .collect();
        Self {
            id: media.id,
            encyclopedia_id: media.id_mal,
            title: media.title.unwrap_or_default(),
            description: non_blank(media.description.as_deref()),
            genres: media
                .genres
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .filter(|genre| !genre.trim().is_empty())
                .collect(),
            duration: media.duration,
            average_score: media.average_score,
            episodes: media.episodes,
            format: media.format,
            content_type: media.content_type,
            status: media.status,
            season_year: media.season_year,
            start_date: media.start_date.unwrap_or_default(),
            end_date: media.end_date.unwrap_or_default(),
            relations,
        }
    }
}

fn people_from_wire(media: wire::PeopleMedia) -> Vec<Person> {
    let mut people = Vec::new();
    let character_edges = media
        .characters
        .and_then(|connection| connection.edges)
        .unwrap_or_default();
    for edge in character_edges.into_iter().flatten() {
        let Some(character) = edge.node else {
            continue;
        };
        let character_name = character
            .name
            .and_then(|name| name.full)
            .unwrap_or_default();
        for actor in edge.voice_actors.unwrap_or_default() {
            people.push(Person {
                name: actor
                    .name
                    .and_then(|name| name.full)
                    .unwrap_or_else(|| "Unknown VA".to_string()),
                role: format!("Voice - {character_name}"),
                image_url: actor.image.and_then(|image| image.large),
            });
        }
    }
    let staff_edges = media
        .staff
        .and_then(|connection| connection.edges)
        .unwrap_or_default();
    for edge in staff_edges.into_iter().flatten() {
        let Some(node) = edge.node else {
            continue;
        };
        people.push(Person {
            name: node
                .name
                .and_then(|name| name.full)
                .unwrap_or_else(|| "Unknown Staff".to_string()),
            role: edge.role.unwrap_or_else(|| "Staff".to_string()),
            image_url: node.image.and_then(|image| image.large),
        });
    }
    people
}

pub struct GraphClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    limiter: SlidingWindowLimiter,
    cache: Arc<ResponseCache<GraphKey, GraphPayload>>,
    persistent: Option<Arc<PersistentCache>>,
}

impl GraphClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sources: &SourcesConfig,
        persistent: Option<Arc<PersistentCache>>,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(CATALOG, GRAPH_CACHE_TTL));
        if let Some(store) = &persistent {
            store.register(cache.clone());
        }
        Self {
            transport,
            endpoint: sources.graph_endpoint.clone(),
            limiter: SlidingWindowLimiter::per_minute("Graph", sources.graph_requests_per_minute),
            cache,
            persistent,
        }
    }

    fn cached(&self, key: GraphKey) -> Option<GraphPayload> {
        if let Some(store) = &self.persistent {
            store.ensure_loaded();
        }
        self.cache.get(&key)
    }

    fn store(&self, key: GraphKey, payload: GraphPayload) {
        self.cache.insert(key, payload);
        if let Some(store) = &self.persistent {
            store.flush();
        }
    }

    /// Posts one query and returns the body of a non-null `data.Media`.
    fn post_query(
        &self,
        query: &'static str,
        id: i64,
        cancel: &CancellationFlag,
    ) -> SourceResult<String> {
        if id <= 0 || id > i64::from(i32::MAX) {
            return Err(SourceError::invalid_config(
                CATALOG,
                format!("id {id} outside the catalog id range"),
            ));
        }
        self.limiter.acquire(cancel)?;
        let body = json!({ "query": query, "variables": { "id": id } });
        let response = self
            .transport
            .post_json(
                &self.endpoint,
                &[("Accept", "application/json")],
                &body,
            )
            .map_err(|error| SourceError::transient(CATALOG, error))?;
        cancel.check()?;
        if !response.is_success() {
            return Err(classify_status(CATALOG, id, &response));
        }
        Ok(response.body)
    }

    fn fetch_media(
        &self,
        kind: GraphCacheKind,
        query: &'static str,
        id: i64,
        cancel: &CancellationFlag,
    ) -> SourceResult<GraphEntry> {
        let key = GraphKey { kind, id };
        if let Some(GraphPayload::Entry(entry)) = self.cached(key) {
            debug!("Graph[{id}]: {kind:?} cache hit");
            return Ok(entry);
        }
        let body = self.post_query(query, id, cancel)?;
        let envelope: wire::Envelope<wire::Media> = decode_json(CATALOG, &body)?;
        let media = envelope
            .data
            .and_then(|data| data.media)
            .ok_or_else(|| SourceError::not_found(CATALOG, id))?;
        let entry = GraphEntry::from(media);
        debug!(
            "Graph[{id}]: fetched {kind:?} with {} relations",
            entry.relations.len()
        );
        self.store(key, GraphPayload::Entry(entry.clone()));
        Ok(entry)
    }

    /// Full entry used for series merges.
    pub fn entry(&self, id: i64, cancel: &CancellationFlag) -> SourceResult<GraphEntry> {
        self.fetch_media(GraphCacheKind::Entry, ENTRY_QUERY, id, cancel)
    }

    /// Compact entry used for season walks and season records.
    pub fn season_detail(&self, id: i64, cancel: &CancellationFlag) -> SourceResult<GraphEntry> {
        self.fetch_media(GraphCacheKind::Season, SEASON_QUERY, id, cancel)
    }

    /// Voice actors first, then staff.
    pub fn people(&self, id: i64, cancel: &CancellationFlag) -> SourceResult<Vec<Person>> {
        let key = GraphKey {
            kind: GraphCacheKind::People,
            id,
        };
        if let Some(GraphPayload::People(people)) = self.cached(key) {
            debug!("Graph[{id}]: people cache hit");
            return Ok(people);
        }
        let body = self.post_query(PEOPLE_QUERY, id, cancel)?;
        let envelope: wire::Envelope<wire::PeopleMedia> = decode_json(CATALOG, &body)?;
        let media = envelope
            .data
            .and_then(|data| data.media)
            .ok_or_else(|| SourceError::not_found(CATALOG, id))?;
        let people = people_from_wire(media);
        info!("Graph[{id}]: fetched {} people", people.len());
        self.store(key, GraphPayload::People(people.clone()));
        Ok(people)
    }

    pub fn cached_root(&self, start_id: i64) -> Option<i64> {
        match self.cached(GraphKey {
            kind: GraphCacheKind::Root,
            id: start_id,
        }) {
            Some(GraphPayload::Root(root_id)) => Some(root_id),
            _ => None,
        }
    }

    pub fn store_root(&self, start_id: i64, root_id: i64) {
        self.store(
            GraphKey {
                kind: GraphCacheKind::Root,
                id: start_id,
            },
            GraphPayload::Root(root_id),
        );
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

//! Reconciliation engine: hint → cross-reference row → graph root → merged record.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::artwork::{
    select_season_images, select_series_images, ArtworkSources, RemoteImage, DEFAULT_DISPLAY_ORDER,
};
use crate::cache::PersistentCache;
use crate::cancellation::CancellationFlag;
use crate::config::Config;
use crate::error::{settle, settle_list, ResolveError, SourceError};
use crate::hint::LocalHint;
use crate::http::{HttpTransport, UreqTransport};
use crate::mapping::{CrossReferenceRow, IdKind, IdentityMapper};
use crate::merge::{
    merge_people, merge_season, merge_series, needs_more_people, wants_encyclopedia_overview,
    NormalizedSeriesRecord, ResolvedSeason, SeasonSources, SeriesSources,
};
use crate::overrides::OverrideTables;
use crate::resolver::GraphResolver;
use crate::sources::{
    non_blank, EncyclopediaClient, EpisodeClient, FanartClient, FanartShow, GraphClient,
    SeriesExtended, TagClient,
};

const DATA_DIR_NAME: &str = "anime-reconciler";

/// Episode-level metadata from the episode catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EpisodeDetails {
    pub series_id: i64,
    pub episode_id: i64,
    pub season_number: i32,
    pub episode_number: i32,
    pub absolute_number: Option<i32>,
    pub name: Option<String>,
    pub original_title: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    pub year: Option<i32>,
    pub runtime_minutes: Option<u32>,
    pub image_url: Option<String>,
}

/// Data directory for the cache snapshot: the configured override, else the
/// platform data directory.
pub fn resolve_data_dir(config: &Config) -> Option<PathBuf> {
    let configured = config.cache.data_dir.trim();
    if !configured.is_empty() {
        return Some(PathBuf::from(configured));
    }
    dirs::data_dir().map(|dir| dir.join(DATA_DIR_NAME))
}

fn joined<T: Default>(label: &str, handle: ScopedJoinHandle<'_, T>) -> T {
    handle.join().unwrap_or_else(|_| {
        error!("Engine: {label} fetch panicked");
        T::default()
    })
}

pub struct ReconciliationEngine {
    config: Config,
    overrides: OverrideTables,
    mapper: IdentityMapper,
    graph: GraphClient,
    tags: TagClient,
    encyclopedia: EncyclopediaClient,
    episodes: EpisodeClient,
    fanart: FanartClient,
}

impl ReconciliationEngine {
    pub fn new(config: Config, transport: Arc<dyn HttpTransport>, data_dir: Option<&Path>) -> Self {
        let persistent = if config.cache.persist {
            data_dir.map(|dir| {
                let max_age =
                    Duration::from_secs(u64::from(config.cache.snapshot_max_age_days) * 86_400);
                Arc::new(PersistentCache::new(dir, max_age))
            })
        } else {
            None
        };
        if let Some(store) = &persistent {
            info!("Engine: cache snapshot at {}", store.path().display());
        }

        let overrides_path = config.resolver.overrides_path.trim();
        let overrides = OverrideTables::load(
            (!overrides_path.is_empty()).then(|| Path::new(overrides_path)),
        );
        let sources = &config.sources;
        let refresh_interval =
            Duration::from_secs(u64::from(sources.cross_reference_refresh_hours) * 3_600);
        Self {
            mapper: IdentityMapper::new(
                transport.clone(),
                sources.cross_reference_url.clone(),
                refresh_interval,
            ),
            graph: GraphClient::new(transport.clone(), sources, persistent.clone()),
            tags: TagClient::new(transport.clone(), sources, persistent.clone()),
            encyclopedia: EncyclopediaClient::new(transport.clone(), sources),
            episodes: EpisodeClient::new(transport.clone(), sources, persistent.clone()),
            fanart: FanartClient::new(transport, sources, persistent),
            overrides,
            config,
        }
    }

    /// Engine over the real network transport.
    pub fn with_default_transport(config: Config) -> Self {
        let data_dir = resolve_data_dir(&config);
        Self::new(config, Arc::new(UreqTransport::new()), data_dir.as_deref())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mapper(&self) -> &IdentityMapper {
        &self.mapper
    }

    fn resolver(&self) -> GraphResolver<'_> {
        GraphResolver::new(&self.graph, &self.config.resolver, &self.overrides)
    }

    /// Cross-reference row for a hint: episode-catalog id first, then the
    /// external-database id.
    pub fn lookup_row(&self, hint: &LocalHint) -> Result<CrossReferenceRow, ResolveError> {
        self.mapper.refresh_if_stale()?;
        let by_tvdb = hint
            .tvdb_id
            .as_deref()
            .and_then(|id| self.mapper.lookup(IdKind::EpisodeCatalog, id));
        by_tvdb
            .or_else(|| {
                hint.imdb_id
                    .as_deref()
                    .and_then(|id| self.mapper.lookup(IdKind::ExternalDatabase, id))
            })
            .ok_or_else(|| ResolveError::NoMapping(hint.label()))
    }

    /// Episode-catalog and fan-art payloads for one series; either may be missing.
    fn artwork_payloads(
        &self,
        series_id: i64,
        cancel: &CancellationFlag,
    ) -> (Option<SeriesExtended>, Option<FanartShow>) {
        let catalog = self
            .episodes
            .is_configured()
            .then(|| settle(self.episodes.series_extended(series_id, cancel)))
            .flatten();
        let fanart = self
            .fanart
            .is_configured()
            .then(|| settle(self.fanart.show(series_id, cancel)))
            .flatten();
        (catalog, fanart)
    }

    fn series_images(&self, tvdb_id: Option<&str>, cancel: &CancellationFlag) -> Vec<RemoteImage> {
        let Some(series_id) = tvdb_id.and_then(|id| id.trim().parse::<i64>().ok()) else {
            return Vec::new();
        };
        let (catalog, fanart) = self.artwork_payloads(series_id, cancel);
        if catalog.is_none() && fanart.is_none() {
            return Vec::new();
        }
        let sources = ArtworkSources {
            series_id,
            catalog: catalog.as_ref(),
            fanart: fanart.as_ref(),
        };
        select_series_images(sources, &self.config.artwork)
    }

    pub fn resolve_series(
        &self,
        hint: &LocalHint,
        cancel: &CancellationFlag,
    ) -> Result<NormalizedSeriesRecord, ResolveError> {
        let label = hint.label();
        let mut row = self.lookup_row(hint)?;
        info!(
            "Engine[{label}]: mapped to graph {:?}, tags {:?}, encyclopedia {:?}",
            row.graph_id, row.tag_id, row.encyclopedia_id
        );

        let mut root_id = row.graph_id;
        if let Some(mapped_id) = row.graph_id {
            if let Some(resolved) = settle(self.resolver().resolve_root(mapped_id, hint.year, cancel)) {
                if resolved != mapped_id {
                    match self.mapper.lookup_graph(resolved) {
                        Some(root_row) => {
                            info!("Engine[{label}]: realigned ids to root {resolved} (mapped {mapped_id})");
                            row = root_row;
                        }
                        None => warn!(
                            "Engine[{label}]: no cross-reference row for root {resolved}; keeping mapped ids"
                        ),
                    }
                }
                root_id = Some(resolved);
            }
        }
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        let graph_entry = root_id.and_then(|id| settle(self.graph.entry(id, cancel)));
        let encyclopedia_id = graph_entry
            .as_ref()
            .and_then(|entry| entry.encyclopedia_id)
            .or(row.encyclopedia_id);
        let tvdb_id = hint
            .tvdb_id
            .clone()
            .or_else(|| row.tvdb_id.map(|id| id.to_string()));

        let (people, tags, encyclopedia, images) = thread::scope(|scope| {
            let people = scope.spawn(|| {
                let graph_people = root_id
                    .map(|id| settle_list(self.graph.people(id, cancel)))
                    .unwrap_or_default();
                if !needs_more_people(&graph_people) {
                    return graph_people;
                }
                let extra = encyclopedia_id
                    .map(|id| settle_list(self.encyclopedia.voice_actors(id, cancel)))
                    .unwrap_or_default();
                merge_people(graph_people, extra)
            });
            let tags = scope.spawn(|| match row.tag_id {
                Some(tag_id) if self.config.metadata.enable_tags => {
                    settle_list(self.tags.tags(tag_id, cancel))
                }
                _ => Vec::new(),
            });
            let encyclopedia = scope.spawn(|| {
                encyclopedia_id.and_then(|id| settle(self.encyclopedia.anime(id, cancel)))
            });
            let images = scope.spawn(|| self.series_images(tvdb_id.as_deref(), cancel));
            (
                joined("people", people),
                joined("tags", tags),
                joined("encyclopedia", encyclopedia),
                joined("artwork", images),
            )
        });
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        let mut record = merge_series(
            SeriesSources {
                hint,
                row: &row,
                root_graph_id: root_id,
                encyclopedia_id,
                graph: graph_entry.as_ref(),
                encyclopedia: encyclopedia.as_ref(),
                tags: &tags,
                people,
            },
            &self.config.metadata,
        );
        record.images = images;
        info!(
            "Engine[{label}]: resolved '{}' ({} genres, {} tags, {} people, {} images)",
            record.title,
            record.genres.len(),
            record.tags.len(),
            record.people.len(),
            record.images.len()
        );
        Ok(record)
    }

    /// Root graph id for a hint, as used by season lookups.
    pub fn resolve_root_for_hint(
        &self,
        hint: &LocalHint,
        cancel: &CancellationFlag,
    ) -> Result<i64, ResolveError> {
        let row = self.lookup_row(hint)?;
        let mapped_id = row
            .graph_id
            .ok_or_else(|| ResolveError::NoMapping(hint.label()))?;
        match self.resolver().resolve_root(mapped_id, hint.year, cancel) {
            Ok(root_id) => Ok(root_id),
            Err(SourceError::Cancelled) => Err(ResolveError::Cancelled),
            Err(failure) => {
                warn!("Engine[{}]: root resolution failed, using mapped id: {failure}", hint.label());
                Ok(mapped_id)
            }
        }
    }

    pub fn resolve_season(
        &self,
        root_id: i64,
        season_number: i32,
        cancel: &CancellationFlag,
    ) -> Result<ResolvedSeason, ResolveError> {
        let not_found = || ResolveError::SeasonNotFound {
            root_id,
            season_number,
        };
        if season_number < 0 {
            return Err(not_found());
        }
        if self.overrides.should_defer_season(root_id, season_number) {
            info!("Engine[{root_id}]: season {season_number} deferred to the episode catalog");
            return Err(not_found());
        }
        if let Err(failure) = self.mapper.refresh_if_stale() {
            // Season lookups only need rows for ids, so a missing table degrades.
            warn!("Engine[{root_id}]: cross-reference table unavailable: {failure}");
        }

        let detail = settle(self.resolver().season_entry(root_id, season_number, cancel)).flatten();
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let root_row = self.mapper.lookup_graph(root_id);
        let season_row = detail
            .as_ref()
            .and_then(|entry| self.mapper.lookup_graph(entry.id));
        debug!(
            "Engine[{root_id}]: season {season_number} -> {:?}",
            detail.as_ref().map(|entry| entry.id)
        );

        let overview_id = detail
            .as_ref()
            .and_then(|entry| entry.encyclopedia_id)
            .or_else(|| root_row.as_ref().and_then(|row| row.encyclopedia_id));
        let tag_id = season_row.as_ref().and_then(|row| row.tag_id);
        let tvdb_id = root_row.as_ref().and_then(|row| row.tvdb_id);

        let (encyclopedia, tags, images) = thread::scope(|scope| {
            let encyclopedia = scope.spawn(|| {
                if detail.is_none()
                    || !wants_encyclopedia_overview(self.config.metadata.season_overview_source)
                {
                    return None;
                }
                overview_id.and_then(|id| settle(self.encyclopedia.anime(id, cancel)))
            });
            let tags = scope.spawn(|| match tag_id {
                Some(tag_id) if self.config.metadata.enable_tags => {
                    settle_list(self.tags.tags(tag_id, cancel))
                }
                _ => Vec::new(),
            });
            let images = scope.spawn(|| {
                let Some(series_id) = tvdb_id else {
                    return Vec::new();
                };
                let (catalog, fanart) = self.artwork_payloads(series_id, cancel);
                if catalog.is_none() && fanart.is_none() {
                    return Vec::new();
                }
                let sources = ArtworkSources {
                    series_id,
                    catalog: catalog.as_ref(),
                    fanart: fanart.as_ref(),
                };
                select_season_images(sources, season_number, DEFAULT_DISPLAY_ORDER)
            });
            (
                joined("encyclopedia", encyclopedia),
                joined("tags", tags),
                joined("artwork", images),
            )
        });
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        let mut season = merge_season(
            SeasonSources {
                season_number,
                detail: detail.as_ref(),
                encyclopedia: encyclopedia.as_ref(),
                tags: &tags,
            },
            &self.config.metadata,
        )
        .ok_or_else(not_found)?;
        season.images = images;
        info!("Engine[{root_id}]: season {season_number} is '{}'", season.name);
        Ok(season)
    }

    /// Episode record with the configured-language translation preferred for
    /// name and overview.
    pub fn resolve_episode(
        &self,
        series_id: i64,
        season_number: i32,
        episode_number: i32,
        cancel: &CancellationFlag,
    ) -> Result<EpisodeDetails, ResolveError> {
        let not_found = || ResolveError::EpisodeNotFound {
            series_id,
            season_number,
            episode_number,
        };
        let episode = settle(
            self.episodes
                .find_episode(series_id, season_number, episode_number, cancel),
        )
        .ok_or_else(not_found)?;
        let language = self.config.sources.episode_language.trim();
        let translation = if language.is_empty() {
            None
        } else {
            settle(self.episodes.translation(episode.id, language, cancel))
        };
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        let translated_name = translation
            .as_ref()
            .and_then(|translation| non_blank(translation.name.as_deref()));
        let translated_overview = translation
            .as_ref()
            .and_then(|translation| non_blank(translation.overview.as_deref()));
        let air_date = non_blank(episode.aired.as_deref());
        let year = air_date
            .as_deref()
            .and_then(|date| date.get(..4))
            .and_then(|year| year.parse().ok());
        Ok(EpisodeDetails {
            series_id,
            episode_id: episode.id,
            season_number: episode.season_number.unwrap_or(season_number),
            episode_number: episode.number.unwrap_or(episode_number),
            absolute_number: episode.absolute_number,
            name: translated_name.or_else(|| episode.name.clone()),
            original_title: episode.name.clone(),
            overview: translated_overview.or_else(|| episode.overview.clone()),
            air_date,
            year,
            runtime_minutes: episode.runtime,
            image_url: non_blank(episode.image.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ReconciliationEngine;
    use crate::artwork::ImageKind;
    use crate::cancellation::CancellationFlag;
    use crate::config::Config;
    use crate::error::ResolveError;
    use crate::hint::LocalHint;
    use crate::http::testing::MockTransport;

    const CROSS_REFERENCE: &str = r#"[
        {"thetvdb_id":85249,"imdb_id":"tt1355642","anilist_id":5114,"mal_id":5114,"anidb_id":6107,"type":"TV"},
        {"thetvdb_id":75579,"anilist_id":121,"mal_id":121,"anidb_id":979,"kitsu_id":"100","type":"TV"}
    ]"#;

    const ENTRY_5114: &str = r#"{"data":{"Media":{"id":5114,"idMal":5114,"type":"ANIME","format":"TV",
        "title":{"romaji":"Hagane no Renkinjutsushi: Fullmetal Alchemist"},"seasonYear":2009,
        "startDate":{"year":2009,"month":4,"day":5},
        "relations":{"edges":[{"relationType":"PREQUEL","node":{"id":121,"type":"ANIME","format":"TV"}}]}}}}"#;

    const ENTRY_121: &str = r#"{"data":{"Media":{"id":121,"idMal":121,"type":"ANIME","format":"TV",
        "title":{"romaji":"Hagane no Renkinjutsushi","english":"Fullmetal Alchemist"},
        "description":"Two brothers.","genres":["Action","Drama"],"duration":24,"averageScore":80,
        "seasonYear":2003,"startDate":{"year":2003,"month":10,"day":4},
        "relations":{"edges":[{"relationType":"SEQUEL","node":{"id":6421,"type":"ANIME","format":"MOVIE"}}]}}}}"#;

    const PEOPLE: &str = r#"{"data":{"Media":{"characters":{"edges":[]},"staff":{"edges":[]}}}}"#;

    const RECORD_121: &str = r#"{"data":{"mal_id":121,"title":"Fullmetal Alchemist","type":"TV",
        "status":"Finished Airing","score":8.1,"synopsis":"Encyclopedia synopsis.",
        "duration":"24 min per ep","genres":[{"name":"Adventure"}],"studios":[{"name":"Bones"}]}}"#;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.cache.persist = false;
        config.sources.encyclopedia_min_spacing_ms = 0;
        config.sources.tag_min_spacing_ms = 0;
        config.sources.tag_slow_spacing_ms = 0;
        config.metadata.enable_tags = false;
        config.metadata.approved_genres = Vec::new();
        config
    }

    fn scripted() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport
            .reply("anime-list-full", 200, CROSS_REFERENCE)
            .reply("SeriesPeople", 200, PEOPLE)
            .reply("{\"id\":5114}", 200, ENTRY_5114)
            .reply("{\"id\":121}", 200, ENTRY_121)
            .reply("/characters", 200, r#"{"data":[]}"#)
            .reply("/anime/121", 200, RECORD_121);
        transport
    }

    fn hint(tvdb: &str, year: Option<i32>) -> LocalHint {
        LocalHint {
            title: Some("Fullmetal Alchemist".to_string()),
            year,
            tvdb_id: Some(tvdb.to_string()),
            imdb_id: None,
        }
    }

    #[test]
    fn test_series_resolves_to_root_and_realigns_ids() {
        let transport = scripted();
        let engine = ReconciliationEngine::new(quiet_config(), transport.clone(), None);
        let record = engine
            .resolve_series(&hint("85249", Some(2006)), &CancellationFlag::new())
            .expect("series resolves");

        assert_eq!(record.ids.graph, Some(121));
        assert_eq!(record.ids.tag_catalog, Some(979));
        assert_eq!(record.ids.encyclopedia, Some(121));
        assert_eq!(record.title, "Fullmetal Alchemist");
        assert_eq!(record.overview.as_deref(), Some("Encyclopedia synopsis."));
        assert_eq!(record.community_rating, Some(8.1));
        assert_eq!(record.genres, vec!["Adventure", "Action", "Drama"]);
        assert_eq!(record.studios, vec!["Bones"]);
        assert!(record.sequels.is_empty());
        assert_eq!(transport.calls_matching("anime-list-full"), 1);
    }

    #[test]
    fn test_unmapped_hint_is_a_resolution_error() {
        let engine = ReconciliationEngine::new(quiet_config(), scripted(), None);
        let result = engine.resolve_series(&hint("1", None), &CancellationFlag::new());
        assert!(matches!(result, Err(ResolveError::NoMapping(_))));
    }

    #[test]
    fn test_unreachable_cross_reference_table_surfaces() {
        let transport = Arc::new(MockTransport::new());
        transport.fail("anime-list-full", "connection refused");
        let engine = ReconciliationEngine::new(quiet_config(), transport, None);
        let result = engine.resolve_series(&hint("85249", None), &CancellationFlag::new());
        assert!(matches!(result, Err(ResolveError::MappingUnavailable(_))));
    }

    #[test]
    fn test_season_one_is_the_root_entry() {
        let engine = ReconciliationEngine::new(quiet_config(), scripted(), None);
        let cancel = CancellationFlag::new();
        let season = engine.resolve_season(121, 1, &cancel).expect("season 1");
        assert_eq!(season.graph_id, Some(121));
        assert_eq!(season.name, "Fullmetal Alchemist");
        assert_eq!(season.overview.as_deref(), Some("Encyclopedia synopsis."));

        assert!(matches!(
            engine.resolve_season(121, 2, &cancel),
            Err(ResolveError::SeasonNotFound { .. })
        ));
        assert!(matches!(
            engine.resolve_season(121, -1, &cancel),
            Err(ResolveError::SeasonNotFound { .. })
        ));
    }

    #[test]
    fn test_episode_prefers_translation() {
        let transport = Arc::new(MockTransport::new());
        transport
            .reply("/login", 200, r#"{"data":{"token":"t"}}"#)
            .reply(
                "page=0",
                200,
                r#"{"data":{"episodes":[{"id":77,"seasonNumber":1,"number":3,"name":"Mikai","aired":"2003-10-18"}]},"links":{"next":null}}"#,
            )
            .reply(
                "/translations/eng",
                200,
                r#"{"data":{"name":"Mother","overview":"Translated.","language":"eng"}}"#,
            );
        let mut config = quiet_config();
        config.sources.episode_api_key = "key".to_string();
        let engine = ReconciliationEngine::new(config, transport, None);

        let cancel = CancellationFlag::new();
        let episode = engine
            .resolve_episode(75579, 1, 3, &cancel)
            .expect("episode resolves");
        assert_eq!(episode.name.as_deref(), Some("Mother"));
        assert_eq!(episode.original_title.as_deref(), Some("Mikai"));
        assert_eq!(episode.year, Some(2003));
        assert!(matches!(
            engine.resolve_episode(75579, 1, 4, &cancel),
            Err(ResolveError::EpisodeNotFound { .. })
        ));
    }

    #[test]
    fn test_fanart_key_alone_supplies_series_and_season_art() {
        let transport = scripted();
        transport.reply(
            "fanart.tv/v3/tv/75579",
            200,
            r#"{"tvposter":[{"url":"https://fanart/poster.jpg"}],
                "showbackground":[{"url":"https://fanart/bg-1.jpg"},{"url":"https://fanart/bg-2.jpg"}],
                "seasonthumb":[{"url":"https://fanart/s1-thumb.jpg","season":"1"}]}"#,
        );
        let mut config = quiet_config();
        config.sources.fanart_api_key = "personal".to_string();
        config.artwork.max_backdrops = 1;
        let engine = ReconciliationEngine::new(config, transport.clone(), None);
        let cancel = CancellationFlag::new();

        let record = engine
            .resolve_series(&hint("75579", Some(2003)), &cancel)
            .expect("series resolves");
        let kinds: Vec<ImageKind> = record.images.iter().map(|image| image.kind).collect();
        assert_eq!(kinds, vec![ImageKind::Primary, ImageKind::Backdrop]);
        assert_eq!(record.images[1].url, "https://fanart/bg-1.jpg");

        let season = engine.resolve_season(121, 1, &cancel).expect("season 1");
        assert_eq!(season.images.len(), 1);
        assert_eq!(season.images[0].kind, ImageKind::Thumb);
        assert_eq!(transport.calls_matching("fanart.tv"), 1);
        assert_eq!(transport.calls_matching("/login"), 0);
    }
}

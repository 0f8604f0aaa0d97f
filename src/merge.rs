//! Field-level merge of catalog payloads into one series or season record.
//!
//! Source preferences are plain enum → selector lookups; every field falls
//! back through the other catalogs and ends in a fixed literal or nothing.

use std::collections::HashSet;

use log::{debug, info};
use serde::Serialize;

use crate::artwork::RemoteImage;
use crate::config::{
    MetadataConfig, OriginalTitleField, RuntimeSource, SeasonOverviewSource, SeasonTitleFormat,
    TitleField, TitleSource,
};
use crate::hint::LocalHint;
use crate::mapping::CrossReferenceRow;
use crate::sources::encyclopedia::map_status;
use crate::sources::{
    EncyclopediaRecord, GraphEntry, MediaFormat, Person, RelationKind,
};
use crate::tag_filter::filter_tags;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
const PEOPLE_TARGET: usize = 5;

/// Identifiers carried by a merged record, one per catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderIds {
    pub tvdb: Option<String>,
    pub imdb: Option<String>,
    pub tmdb: Option<i64>,
    pub tag_catalog: Option<i64>,
    pub graph: Option<i64>,
    pub encyclopedia: Option<i64>,
    pub kitsu: Option<i64>,
    pub anisearch: Option<i64>,
    pub animeplanet: Option<String>,
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalUrl {
    pub site: &'static str,
    pub url: String,
}

/// Public page of each catalog the record carries an id for.
pub fn external_urls(ids: &ProviderIds) -> Vec<ExternalUrl> {
    let mut urls = Vec::new();
    let mut push = |site: &'static str, url: Option<String>| {
        if let Some(url) = url {
            urls.push(ExternalUrl { site, url });
        }
    };
    push(
        "AniDB",
        ids.tag_catalog.map(|id| format!("https://anidb.net/anime/{id}")),
    );
    push(
        "AniList",
        ids.graph.map(|id| format!("https://anilist.co/anime/{id}")),
    );
    push(
        "AniSearch",
        ids.anisearch
            .map(|id| format!("https://www.anisearch.com/anime/{id}")),
    );
    push(
        "Kitsu",
        ids.kitsu.map(|id| format!("https://kitsu.app/anime/{id}")),
    );
    push(
        "MyAnimeList",
        ids.encyclopedia
            .map(|id| format!("https://myanimelist.net/anime/{id}")),
    );
    push(
        "TheTVDB",
        ids.tvdb
            .as_deref()
            .map(|id| format!("https://thetvdb.com/dereferrer/series/{id}")),
    );
    push(
        "IMDb",
        ids.imdb
            .as_deref()
            .map(|id| format!("https://www.imdb.com/title/{id}")),
    );
    urls
}

/// Sequel entry of the root, as listed on the series record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequelSummary {
    pub graph_id: i64,
    pub title: Option<String>,
    pub title_english: Option<String>,
    pub format: Option<MediaFormat>,
    pub season: Option<String>,
    pub season_year: Option<i32>,
    pub episodes: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedSeriesRecord {
    pub title: String,
    pub original_title: String,
    pub year: Option<i32>,
    pub status: String,
    pub community_rating: Option<f64>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub end_date: Option<String>,
    pub runtime_minutes: Option<u32>,
    pub parental_rating: Option<String>,
    pub genres: Vec<String>,
    pub studios: Vec<String>,
    pub tags: Vec<String>,
    pub people: Vec<Person>,
    pub sequels: Vec<SequelSummary>,
    pub ids: ProviderIds,
    pub external_urls: Vec<ExternalUrl>,
    pub images: Vec<RemoteImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedSeason {
    pub season_number: i32,
    pub name: String,
    pub sort_name: String,
    pub original_title: String,
    pub overview: Option<String>,
    pub premiere_date: Option<String>,
    pub year: Option<i32>,
    pub community_rating: Option<f64>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub graph_id: Option<i64>,
    pub encyclopedia_id: Option<i64>,
    pub images: Vec<RemoteImage>,
}

/// Everything fetched for one series resolution.
pub struct SeriesSources<'a> {
    pub hint: &'a LocalHint,
    pub row: &'a CrossReferenceRow,
    pub root_graph_id: Option<i64>,
    pub encyclopedia_id: Option<i64>,
    pub graph: Option<&'a GraphEntry>,
    pub encyclopedia: Option<&'a EncyclopediaRecord>,
    pub tags: &'a [String],
    pub people: Vec<Person>,
}

type TitleSelector = fn(Option<&EncyclopediaRecord>, Option<&GraphEntry>, TitleField) -> Option<String>;
type OriginalTitleSelector =
    fn(Option<&EncyclopediaRecord>, Option<&GraphEntry>, OriginalTitleField) -> Option<String>;
type RuntimeSelector = fn(Option<&EncyclopediaRecord>, Option<&GraphEntry>) -> Option<u32>;

fn clean(value: Option<&String>) -> Option<String> {
    value
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn encyclopedia_title(record: Option<&EncyclopediaRecord>, field: TitleField) -> Option<String> {
    let record = record?;
    clean(match field {
        TitleField::Primary => record.title.as_ref(),
        TitleField::English => record.title_english.as_ref(),
        TitleField::Native => record.title_japanese.as_ref(),
    })
}

fn graph_title(entry: Option<&GraphEntry>, field: TitleField) -> Option<String> {
    let title = &entry?.title;
    clean(match field {
        TitleField::Primary => title.romaji.as_ref(),
        TitleField::English => title.english.as_ref(),
        TitleField::Native => title.native.as_ref(),
    })
}

fn encyclopedia_original(
    record: Option<&EncyclopediaRecord>,
    field: OriginalTitleField,
) -> Option<String> {
    let record = record?;
    clean(match field {
        OriginalTitleField::Primary => record.title.as_ref(),
        OriginalTitleField::Native => record.title_japanese.as_ref(),
    })
}

fn graph_original(entry: Option<&GraphEntry>, field: OriginalTitleField) -> Option<String> {
    let title = &entry?.title;
    clean(match field {
        OriginalTitleField::Primary => title.romaji.as_ref(),
        OriginalTitleField::Native => title.native.as_ref(),
    })
}

fn graph_title_only(
    _: Option<&EncyclopediaRecord>,
    graph: Option<&GraphEntry>,
    field: TitleField,
) -> Option<String> {
    graph_title(graph, field)
}

fn encyclopedia_title_only(
    record: Option<&EncyclopediaRecord>,
    _: Option<&GraphEntry>,
    field: TitleField,
) -> Option<String> {
    encyclopedia_title(record, field)
}

fn encyclopedia_title_first(
    record: Option<&EncyclopediaRecord>,
    graph: Option<&GraphEntry>,
    field: TitleField,
) -> Option<String> {
    encyclopedia_title(record, field).or_else(|| graph_title(graph, field))
}

fn graph_original_only(
    _: Option<&EncyclopediaRecord>,
    graph: Option<&GraphEntry>,
    field: OriginalTitleField,
) -> Option<String> {
    graph_original(graph, field)
}

fn encyclopedia_original_only(
    record: Option<&EncyclopediaRecord>,
    _: Option<&GraphEntry>,
    field: OriginalTitleField,
) -> Option<String> {
    encyclopedia_original(record, field)
}

fn encyclopedia_original_first(
    record: Option<&EncyclopediaRecord>,
    graph: Option<&GraphEntry>,
    field: OriginalTitleField,
) -> Option<String> {
    encyclopedia_original(record, field).or_else(|| graph_original(graph, field))
}

fn title_selector(source: TitleSource) -> TitleSelector {
    match source {
        TitleSource::Graph => graph_title_only,
        TitleSource::Encyclopedia => encyclopedia_title_only,
        TitleSource::EncyclopediaFirst => encyclopedia_title_first,
    }
}

fn original_title_selector(source: TitleSource) -> OriginalTitleSelector {
    match source {
        TitleSource::Graph => graph_original_only,
        TitleSource::Encyclopedia => encyclopedia_original_only,
        TitleSource::EncyclopediaFirst => encyclopedia_original_first,
    }
}

fn graph_runtime(_: Option<&EncyclopediaRecord>, graph: Option<&GraphEntry>) -> Option<u32> {
    graph.and_then(|entry| entry.duration).filter(|minutes| *minutes > 0)
}

fn encyclopedia_runtime(record: Option<&EncyclopediaRecord>, _: Option<&GraphEntry>) -> Option<u32> {
    record.and_then(EncyclopediaRecord::runtime_minutes)
}

/// Preferred source first, then the other one.
fn runtime_selectors(source: RuntimeSource) -> [RuntimeSelector; 2] {
    match source {
        RuntimeSource::Graph => [graph_runtime, encyclopedia_runtime],
        RuntimeSource::Encyclopedia => [encyclopedia_runtime, graph_runtime],
    }
}

pub fn select_title(
    record: Option<&EncyclopediaRecord>,
    graph: Option<&GraphEntry>,
    config: &MetadataConfig,
) -> String {
    title_selector(config.title_source)(record, graph, config.title_field)
        .or_else(|| encyclopedia_title(record, TitleField::Primary))
        .or_else(|| graph_title(graph, TitleField::Primary))
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string())
}

pub fn select_original_title(
    record: Option<&EncyclopediaRecord>,
    graph: Option<&GraphEntry>,
    config: &MetadataConfig,
) -> String {
    original_title_selector(config.original_title_source)(
        record,
        graph,
        config.original_title_field,
    )
    .or_else(|| encyclopedia_original(record, OriginalTitleField::Native))
    .or_else(|| graph_original(graph, OriginalTitleField::Native))
    .unwrap_or_default()
}

pub fn select_runtime(
    record: Option<&EncyclopediaRecord>,
    graph: Option<&GraphEntry>,
    source: RuntimeSource,
) -> Option<u32> {
    runtime_selectors(source)
        .iter()
        .find_map(|selector| selector(record, graph))
}

/// Union of encyclopedia and graph genres, deduplicated ignoring case and
/// restricted to the allow-list when one is configured.
pub fn combine_genres(
    record: Option<&EncyclopediaRecord>,
    graph: Option<&GraphEntry>,
    approved: &[String],
) -> Vec<String> {
    let approved: HashSet<String> = approved
        .iter()
        .map(|genre| genre.trim().to_lowercase())
        .filter(|genre| !genre.is_empty())
        .collect();
    let mut seen = HashSet::new();
    record
        .map(EncyclopediaRecord::genre_names)
        .unwrap_or_default()
        .into_iter()
        .chain(graph.map(|entry| entry.genres.clone()).unwrap_or_default())
        .filter_map(|genre| {
            let genre = genre.trim().to_string();
            let key = genre.to_lowercase();
            let allowed = approved.is_empty() || approved.contains(&key);
            (!genre.is_empty() && allowed && seen.insert(key)).then_some(genre)
        })
        .collect()
}

/// Graph people first; below the target count, encyclopedia people are added
/// unless the same (name, role) pair is already present.
pub fn merge_people(graph_people: Vec<Person>, encyclopedia_people: Vec<Person>) -> Vec<Person> {
    let mut people = graph_people;
    if people.len() >= PEOPLE_TARGET {
        return people;
    }
    for person in encyclopedia_people {
        let duplicate = people
            .iter()
            .any(|existing| existing.name == person.name && existing.role == person.role);
        if !duplicate {
            people.push(person);
        }
    }
    people
}

pub fn needs_more_people(graph_people: &[Person]) -> bool {
    graph_people.len() < PEOPLE_TARGET
}

/// Direct TV-format sequels of the root entry.
pub fn sequel_summaries(entry: &GraphEntry) -> Vec<SequelSummary> {
    entry
        .edges_of(RelationKind::Sequel)
        .filter(|edge| edge.target.format.is_some_and(MediaFormat::is_tv))
        .map(|edge| SequelSummary {
            graph_id: edge.target.id,
            title: edge.target.title.romaji.clone(),
            title_english: edge.target.title.english.clone(),
            format: edge.target.format,
            season: edge.target.season.clone(),
            season_year: edge.target.season_year,
            episodes: edge.target.episodes,
        })
        .collect()
}

fn provider_ids(sources: &SeriesSources<'_>) -> ProviderIds {
    let row = sources.row;
    ProviderIds {
        tvdb: sources
            .hint
            .tvdb_id
            .clone()
            .or_else(|| row.tvdb_id.map(|id| id.to_string())),
        imdb: sources.hint.imdb_id.clone().or_else(|| row.imdb_id.clone()),
        tmdb: row.tmdb_id,
        tag_catalog: row.tag_id,
        graph: sources.root_graph_id.or(row.graph_id),
        encyclopedia: sources.encyclopedia_id.or(row.encyclopedia_id),
        kitsu: row.kitsu_id,
        anisearch: row.anisearch_id,
        animeplanet: row.animeplanet_id.clone(),
        media_type: row.media_type.clone(),
    }
}

pub fn merge_series(sources: SeriesSources<'_>, config: &MetadataConfig) -> NormalizedSeriesRecord {
    let graph = sources.graph;
    let series_record = sources.encyclopedia.filter(|record| record.is_series());
    if let (Some(record), None) = (sources.encyclopedia, series_record) {
        info!(
            "Merge[{}]: ignoring encyclopedia entry {} typed {:?}",
            sources.hint.label(),
            record.id,
            record.media_type
        );
    }

    let ids = provider_ids(&sources);
    let community_rating = series_record
        .and_then(|record| record.score)
        .or_else(|| graph.and_then(|entry| entry.average_score).map(|score| f64::from(score) / 10.0));
    let aired = series_record.and_then(|record| record.aired.as_ref());

    let record = NormalizedSeriesRecord {
        title: select_title(series_record, graph, config),
        original_title: select_original_title(series_record, graph, config),
        year: sources.hint.year.or_else(|| graph.and_then(GraphEntry::year)),
        status: map_status(series_record.and_then(|record| record.status.as_deref())),
        community_rating,
        overview: series_record
            .and_then(EncyclopediaRecord::synopsis)
            .or_else(|| graph.and_then(|entry| clean(entry.description.as_ref()))),
        release_date: aired.and_then(|range| range.from.clone()),
        end_date: aired.and_then(|range| range.to.clone()),
        runtime_minutes: select_runtime(series_record, graph, config.runtime_source),
        parental_rating: series_record.and_then(|record| clean(record.rating.as_ref())),
        genres: combine_genres(series_record, graph, &config.approved_genres),
        studios: sources
            .encyclopedia
            .map(EncyclopediaRecord::studio_names)
            .unwrap_or_default(),
        tags: filter_tags(sources.tags),
        people: sources.people,
        sequels: graph.map(sequel_summaries).unwrap_or_default(),
        external_urls: external_urls(&ids),
        ids,
        images: Vec::new(),
    };
    debug!(
        "Merge[{}]: '{}' with {} genres, {} tags, {} people",
        sources.hint.label(),
        record.title,
        record.genres.len(),
        record.tags.len(),
        record.people.len()
    );
    record
}

/// Inputs for one season record.
pub struct SeasonSources<'a> {
    pub season_number: i32,
    pub detail: Option<&'a GraphEntry>,
    pub encyclopedia: Option<&'a EncyclopediaRecord>,
    pub tags: &'a [String],
}

fn numbered_name(season_number: i32) -> String {
    if season_number <= 0 {
        "Specials".to_string()
    } else {
        format!("Season {season_number}")
    }
}

pub fn season_sort_name(season_number: i32) -> String {
    format!("Season {season_number:02}")
}

pub fn wants_encyclopedia_overview(source: SeasonOverviewSource) -> bool {
    matches!(
        source,
        SeasonOverviewSource::Encyclopedia | SeasonOverviewSource::PreferEncyclopedia
    )
}

fn season_display_title(detail: &GraphEntry) -> Option<String> {
    clean(detail.title.english.as_ref())
        .or_else(|| clean(detail.title.romaji.as_ref()))
        .or_else(|| clean(detail.title.native.as_ref()))
}

/// Season record, or `None` when there is no graph node for the season and
/// titles come from metadata.
pub fn merge_season(sources: SeasonSources<'_>, config: &MetadataConfig) -> Option<ResolvedSeason> {
    let number = sources.season_number;
    let Some(detail) = sources.detail else {
        if config.season_title_format != SeasonTitleFormat::Numbered {
            return None;
        }
        let name = numbered_name(number);
        return Some(ResolvedSeason {
            season_number: number,
            original_title: name.clone(),
            name,
            sort_name: season_sort_name(number),
            ..ResolvedSeason::default()
        });
    };

    let display_title = season_display_title(detail);
    let name = match config.season_title_format {
        SeasonTitleFormat::Numbered => numbered_name(number),
        SeasonTitleFormat::MetadataTitle => display_title
            .clone()
            .unwrap_or_else(|| numbered_name(number)),
    };
    let encyclopedia_overview = if wants_encyclopedia_overview(config.season_overview_source) {
        sources.encyclopedia.and_then(EncyclopediaRecord::synopsis)
    } else {
        None
    };

    Some(ResolvedSeason {
        season_number: number,
        original_title: display_title.unwrap_or_else(|| name.clone()),
        name,
        sort_name: season_sort_name(number),
        overview: encyclopedia_overview.or_else(|| clean(detail.description.as_ref())),
        premiere_date: detail.start_date.to_iso_date(),
        year: detail.start_date.year,
        community_rating: detail.average_score.map(|score| f64::from(score) / 10.0),
        genres: detail.genres.clone(),
        tags: filter_tags(sources.tags),
        graph_id: Some(detail.id),
        encyclopedia_id: detail.encyclopedia_id,
        images: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::{
        combine_genres, external_urls, merge_people, merge_season, merge_series, select_runtime,
        select_title, ProviderIds, SeasonSources, SeriesSources, UNKNOWN_TITLE,
    };
    use crate::config::{
        MetadataConfig, RuntimeSource, SeasonOverviewSource, SeasonTitleFormat, TitleField,
        TitleSource,
    };
    use crate::hint::LocalHint;
    use crate::mapping::CrossReferenceRow;
    use crate::sources::encyclopedia::NamedResource;
    use crate::sources::graph::{FuzzyDate, GraphTitle, RelatedNode};
    use crate::sources::{
        EncyclopediaRecord, GraphEntry, MediaFormat, Person, RelationEdge, RelationKind,
    };

    fn named(names: &[&str]) -> Vec<NamedResource> {
        names
            .iter()
            .map(|name| NamedResource {
                name: Some(name.to_string()),
            })
            .collect()
    }

    fn graph_entry() -> GraphEntry {
        GraphEntry {
            id: 5114,
            encyclopedia_id: Some(5114),
            title: GraphTitle {
                romaji: Some("Hagane no Renkinjutsushi".to_string()),
                english: Some("Fullmetal Alchemist: Brotherhood".to_string()),
                native: Some("鋼の錬金術師".to_string()),
            },
            description: Some("Graph description.".to_string()),
            genres: vec!["action".to_string(), "Drama".to_string()],
            duration: Some(24),
            average_score: Some(90),
            start_date: FuzzyDate {
                year: Some(2009),
                month: Some(4),
                day: Some(5),
            },
            relations: vec![
                RelationEdge {
                    kind: RelationKind::Sequel,
                    target: RelatedNode {
                        id: 6421,
                        format: Some(MediaFormat::Ova),
                        ..RelatedNode::default()
                    },
                },
                RelationEdge {
                    kind: RelationKind::Sequel,
                    target: RelatedNode {
                        id: 7000,
                        format: Some(MediaFormat::Tv),
                        season_year: Some(2011),
                        ..RelatedNode::default()
                    },
                },
            ],
            ..GraphEntry::default()
        }
    }

    fn encyclopedia_record(media_type: &str) -> EncyclopediaRecord {
        EncyclopediaRecord {
            id: 5114,
            title: Some("Fullmetal Alchemist: Brotherhood".to_string()),
            title_japanese: Some("鋼の錬金術師 FULLMETAL ALCHEMIST".to_string()),
            media_type: Some(media_type.to_string()),
            status: Some("Finished Airing".to_string()),
            score: Some(9.1),
            synopsis: Some("Encyclopedia synopsis.".to_string()),
            duration: Some("24 min per ep".to_string()),
            genres: named(&["Action", "Adventure"]),
            themes: named(&["Military"]),
            studios: named(&["Bones", "Bones"]),
            ..EncyclopediaRecord::default()
        }
    }

    fn person(name: &str, role: &str) -> Person {
        Person {
            name: name.to_string(),
            role: role.to_string(),
            image_url: None,
        }
    }

    #[test]
    fn test_title_selection_follows_source_and_falls_back() {
        let config = MetadataConfig {
            title_source: TitleSource::Graph,
            title_field: TitleField::English,
            ..MetadataConfig::default()
        };
        let graph = graph_entry();
        let record = encyclopedia_record("TV");
        assert_eq!(
            select_title(Some(&record), Some(&graph), &config),
            "Fullmetal Alchemist: Brotherhood"
        );

        let english_from_encyclopedia = MetadataConfig {
            title_source: TitleSource::Encyclopedia,
            title_field: TitleField::English,
            ..MetadataConfig::default()
        };
        // No English title on the record: falls back to its primary title.
        assert_eq!(
            select_title(Some(&record), Some(&graph), &english_from_encyclopedia),
            "Fullmetal Alchemist: Brotherhood"
        );
        assert_eq!(select_title(None, None, &config), UNKNOWN_TITLE);
    }

    #[test]
    fn test_runtime_tries_the_other_source() {
        let record = encyclopedia_record("TV");
        let mut graph = graph_entry();
        graph.duration = None;
        assert_eq!(
            select_runtime(Some(&record), Some(&graph), RuntimeSource::Graph),
            Some(24)
        );
        assert_eq!(select_runtime(None, Some(&graph), RuntimeSource::Encyclopedia), None);
    }

    #[test]
    fn test_genres_are_unioned_and_filtered() {
        let record = encyclopedia_record("TV");
        let graph = graph_entry();
        let all = combine_genres(Some(&record), Some(&graph), &[]);
        assert_eq!(all, vec!["Action", "Adventure", "Military", "Drama"]);
        let approved = vec!["drama".to_string(), "Action".to_string()];
        assert_eq!(
            combine_genres(Some(&record), Some(&graph), &approved),
            vec!["Action", "Drama"]
        );
    }

    #[test]
    fn test_people_fill_up_from_encyclopedia_without_duplicates() {
        let merged = merge_people(
            vec![person("Romi Park", "Voice - Edward")],
            vec![
                person("Romi Park", "Voice - Edward"),
                person("Rie Kugimiya", "Voice - Alphonse"),
            ],
        );
        assert_eq!(merged.len(), 2);

        let full: Vec<Person> = (0..5).map(|n| person(&format!("P{n}"), "Staff")).collect();
        assert_eq!(merge_people(full, vec![person("X", "Staff")]).len(), 5);
    }

    #[test]
    fn test_series_merge_ignores_non_tv_encyclopedia_entry() {
        let hint = LocalHint {
            title: Some("FMA".to_string()),
            year: Some(2009),
            tvdb_id: Some("85249".to_string()),
            imdb_id: None,
        };
        let row = CrossReferenceRow {
            graph_id: Some(5114),
            tag_id: Some(6107),
            encyclopedia_id: Some(5114),
            ..CrossReferenceRow::default()
        };
        let graph = graph_entry();
        let movie = encyclopedia_record("Movie");
        let tags = vec!["Weekly Shounen Jump".to_string(), "alchemy".to_string()];
        let record = merge_series(
            SeriesSources {
                hint: &hint,
                row: &row,
                root_graph_id: Some(5114),
                encyclopedia_id: Some(5114),
                graph: Some(&graph),
                encyclopedia: Some(&movie),
                tags: &tags,
                people: Vec::new(),
            },
            &MetadataConfig {
                approved_genres: Vec::new(),
                ..MetadataConfig::default()
            },
        );
        assert_eq!(record.title, "Hagane no Renkinjutsushi");
        assert_eq!(record.community_rating, Some(9.0));
        assert_eq!(record.overview.as_deref(), Some("Graph description."));
        assert_eq!(record.status, "Unknown");
        assert_eq!(record.studios, vec!["Bones"]);
        assert_eq!(record.tags, vec!["alchemy"]);
        assert_eq!(record.sequels.len(), 1);
        assert_eq!(record.sequels[0].graph_id, 7000);
        assert_eq!(record.ids.tvdb.as_deref(), Some("85249"));
        assert!(record
            .external_urls
            .iter()
            .any(|url| url.url == "https://anidb.net/anime/6107"));
    }

    #[test]
    fn test_season_record_naming_and_overview() {
        let detail = graph_entry();
        let record = encyclopedia_record("TV");
        let config = MetadataConfig::default();
        let season = merge_season(
            SeasonSources {
                season_number: 2,
                detail: Some(&detail),
                encyclopedia: Some(&record),
                tags: &[],
            },
            &config,
        )
        .expect("season record");
        assert_eq!(season.name, "Fullmetal Alchemist: Brotherhood");
        assert_eq!(season.sort_name, "Season 02");
        assert_eq!(season.overview.as_deref(), Some("Encyclopedia synopsis."));
        assert_eq!(season.premiere_date.as_deref(), Some("2009-04-05"));
        assert_eq!(season.community_rating, Some(9.0));

        let graph_only = MetadataConfig {
            season_overview_source: SeasonOverviewSource::Graph,
            season_title_format: SeasonTitleFormat::Numbered,
            ..MetadataConfig::default()
        };
        let numbered = merge_season(
            SeasonSources {
                season_number: 0,
                detail: Some(&detail),
                encyclopedia: Some(&record),
                tags: &[],
            },
            &graph_only,
        )
        .expect("numbered season");
        assert_eq!(numbered.name, "Specials");
        assert_eq!(numbered.overview.as_deref(), Some("Graph description."));
    }

    #[test]
    fn test_missing_season_detail_only_yields_numbered_fallback() {
        let sources = || SeasonSources {
            season_number: 3,
            detail: None,
            encyclopedia: None,
            tags: &[],
        };
        assert!(merge_season(sources(), &MetadataConfig::default()).is_none());
        let numbered = MetadataConfig {
            season_title_format: SeasonTitleFormat::Numbered,
            ..MetadataConfig::default()
        };
        let fallback = merge_season(sources(), &numbered).expect("fallback record");
        assert_eq!(fallback.name, "Season 3");
        assert_eq!(fallback.original_title, "Season 3");
        assert_eq!(fallback.sort_name, "Season 03");
        assert_eq!(fallback.graph_id, None);
    }

    #[test]
    fn test_external_urls_only_for_known_ids() {
        let urls = external_urls(&ProviderIds {
            graph: Some(5114),
            encyclopedia: Some(5114),
            ..ProviderIds::default()
        });
        let sites: Vec<&str> = urls.iter().map(|url| url.site).collect();
        assert_eq!(sites, vec!["AniList", "MyAnimeList"]);
    }
}

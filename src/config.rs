//! Persistent engine configuration model and defaults.

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Field-merge preferences.
    pub metadata: MetadataConfig,
    #[serde(default)]
    /// Catalog endpoints and access discipline.
    pub sources: SourcesConfig,
    #[serde(default)]
    /// Relation-graph scoring constants.
    pub resolver: ResolverConfig,
    #[serde(default)]
    /// Artwork URL selection limits.
    pub artwork: ArtworkConfig,
    #[serde(default)]
    /// Durable response cache location and lifetime.
    pub cache: CacheConfig,
}

/// Catalog that wins a title-like field.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    Graph,
    Encyclopedia,
    /// Encyclopedia first, then the graph catalog.
    #[default]
    EncyclopediaFirst,
}

/// Title variant to read from the preferred catalog.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TitleField {
    /// Romanized title.
    #[default]
    Primary,
    English,
    Native,
}

#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OriginalTitleField {
    Primary,
    #[default]
    Native,
}

#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeSource {
    #[default]
    Graph,
    Encyclopedia,
}

#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeasonTitleFormat {
    /// Use the season entry's own title.
    #[default]
    MetadataTitle,
    /// "Season N" / "Specials".
    Numbered,
}

#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeasonOverviewSource {
    Graph,
    Encyclopedia,
    #[default]
    PreferEncyclopedia,
}

/// Field-merge preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub title_source: TitleSource,
    #[serde(default)]
    pub title_field: TitleField,
    #[serde(default)]
    pub original_title_source: TitleSource,
    #[serde(default)]
    pub original_title_field: OriginalTitleField,
    #[serde(default)]
    pub runtime_source: RuntimeSource,
    /// Genres kept after merging. Empty keeps everything.
    #[serde(default = "default_approved_genres")]
    pub approved_genres: Vec<String>,
    #[serde(default = "default_true")]
    pub enable_tags: bool,
    #[serde(default)]
    pub season_title_format: SeasonTitleFormat,
    #[serde(default)]
    pub season_overview_source: SeasonOverviewSource,
}

/// Catalog endpoints and access discipline.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SourcesConfig {
    #[serde(default = "default_cross_reference_url")]
    pub cross_reference_url: String,
    #[serde(default = "default_cross_reference_refresh_hours")]
    pub cross_reference_refresh_hours: u32,
    #[serde(default = "default_graph_endpoint")]
    pub graph_endpoint: String,
    #[serde(default = "default_graph_requests_per_minute")]
    pub graph_requests_per_minute: u32,
    #[serde(default = "default_tag_endpoint")]
    pub tag_endpoint: String,
    #[serde(default = "default_tag_client_name")]
    pub tag_client_name: String,
    #[serde(default = "default_tag_client_version")]
    pub tag_client_version: String,
    #[serde(default = "default_tag_min_spacing_ms")]
    pub tag_min_spacing_ms: u64,
    #[serde(default = "default_tag_slow_spacing_ms")]
    pub tag_slow_spacing_ms: u64,
    #[serde(default = "default_tag_daily_soft_cap")]
    pub tag_daily_soft_cap: u32,
    #[serde(default = "default_tag_ban_minutes")]
    pub tag_ban_minutes: u32,
    #[serde(default = "default_encyclopedia_endpoint")]
    pub encyclopedia_endpoint: String,
    #[serde(default = "default_encyclopedia_min_spacing_ms")]
    pub encyclopedia_min_spacing_ms: u64,
    #[serde(default = "default_encyclopedia_max_attempts")]
    pub encyclopedia_max_attempts: u32,
    #[serde(default = "default_episode_endpoint")]
    pub episode_endpoint: String,
    /// Project key for the episode catalog login. Empty disables that catalog.
    #[serde(default)]
    pub episode_api_key: String,
    #[serde(default = "default_episode_language")]
    pub episode_language: String,
    #[serde(default = "default_fanart_endpoint")]
    pub fanart_endpoint: String,
    /// Personal key for the fan-art catalog. Empty disables that catalog.
    #[serde(default)]
    pub fanart_api_key: String,
}

/// Special-entry scores, highest wins. Other qualifying entries score zero.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SpecialScoreConfig {
    #[serde(default = "default_sequel_ova_score")]
    pub sequel_ova: i32,
    #[serde(default = "default_side_story_special_score")]
    pub side_story_special: i32,
    #[serde(default = "default_side_story_ova_score")]
    pub side_story_ova: i32,
    #[serde(default = "default_sequel_special_score")]
    pub sequel_special: i32,
}

/// Relation-graph scoring constants.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ResolverConfig {
    #[serde(default = "default_year_delta_weight")]
    pub year_delta_weight: i64,
    #[serde(default = "default_movie_penalty")]
    pub movie_penalty: i64,
    #[serde(default = "default_movie_minutes_threshold")]
    pub movie_minutes_threshold: u32,
    /// Replacement for the built-in override tables. Empty uses the built-in set.
    #[serde(default)]
    pub overrides_path: String,
    #[serde(default)]
    pub special_scores: SpecialScoreConfig,
}

/// Artwork URL selection limits.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ArtworkConfig {
    #[serde(default = "default_max_backdrops")]
    pub max_backdrops: u32,
    #[serde(default = "default_backdrop_min_width")]
    pub backdrop_min_width: u32,
    #[serde(default = "default_backdrop_min_height")]
    pub backdrop_min_height: u32,
    #[serde(default = "default_backdrop_min_aspect_ratio")]
    pub backdrop_min_aspect_ratio: f64,
}

/// Durable response cache location and lifetime.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Overrides the platform data directory.
    #[serde(default)]
    pub data_dir: String,
    #[serde(default = "default_snapshot_max_age_days")]
    pub snapshot_max_age_days: u32,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            title_source: TitleSource::EncyclopediaFirst,
            title_field: TitleField::Primary,
            original_title_source: TitleSource::EncyclopediaFirst,
            original_title_field: OriginalTitleField::Native,
            runtime_source: RuntimeSource::Graph,
            approved_genres: default_approved_genres(),
            enable_tags: true,
            season_title_format: SeasonTitleFormat::MetadataTitle,
            season_overview_source: SeasonOverviewSource::PreferEncyclopedia,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            cross_reference_url: default_cross_reference_url(),
            cross_reference_refresh_hours: default_cross_reference_refresh_hours(),
            graph_endpoint: default_graph_endpoint(),
            graph_requests_per_minute: default_graph_requests_per_minute(),
            tag_endpoint: default_tag_endpoint(),
            tag_client_name: default_tag_client_name(),
            tag_client_version: default_tag_client_version(),
            tag_min_spacing_ms: default_tag_min_spacing_ms(),
            tag_slow_spacing_ms: default_tag_slow_spacing_ms(),
            tag_daily_soft_cap: default_tag_daily_soft_cap(),
            tag_ban_minutes: default_tag_ban_minutes(),
            encyclopedia_endpoint: default_encyclopedia_endpoint(),
            encyclopedia_min_spacing_ms: default_encyclopedia_min_spacing_ms(),
            encyclopedia_max_attempts: default_encyclopedia_max_attempts(),
            episode_endpoint: default_episode_endpoint(),
            episode_api_key: String::new(),
            episode_language: default_episode_language(),
            fanart_endpoint: default_fanart_endpoint(),
            fanart_api_key: String::new(),
        }
    }
}

impl Default for SpecialScoreConfig {
    fn default() -> Self {
        Self {
            sequel_ova: default_sequel_ova_score(),
            side_story_special: default_side_story_special_score(),
            side_story_ova: default_side_story_ova_score(),
            sequel_special: default_sequel_special_score(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            year_delta_weight: default_year_delta_weight(),
            movie_penalty: default_movie_penalty(),
            movie_minutes_threshold: default_movie_minutes_threshold(),
            overrides_path: String::new(),
            special_scores: SpecialScoreConfig::default(),
        }
    }
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            max_backdrops: default_max_backdrops(),
            backdrop_min_width: default_backdrop_min_width(),
            backdrop_min_height: default_backdrop_min_height(),
            backdrop_min_aspect_ratio: default_backdrop_min_aspect_ratio(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persist: true,
            data_dir: String::new(),
            snapshot_max_age_days: default_snapshot_max_age_days(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cross_reference_url() -> String {
    "https://raw.githubusercontent.com/Fribb/anime-lists/master/anime-list-full.json".to_string()
}

fn default_cross_reference_refresh_hours() -> u32 {
    6
}

fn default_graph_endpoint() -> String {
    "https://graphql.anilist.co".to_string()
}

fn default_graph_requests_per_minute() -> u32 {
    30
}

fn default_tag_endpoint() -> String {
    "http://api.anidb.net:9001/httpapi".to_string()
}

fn default_tag_client_name() -> String {
    "mediabrowser".to_string()
}

fn default_tag_client_version() -> String {
    "1".to_string()
}

fn default_tag_min_spacing_ms() -> u64 {
    2_000
}

fn default_tag_slow_spacing_ms() -> u64 {
    8_000
}

fn default_tag_daily_soft_cap() -> u32 {
    5
}

fn default_tag_ban_minutes() -> u32 {
    15
}

fn default_encyclopedia_endpoint() -> String {
    "https://api.jikan.moe/v4".to_string()
}

fn default_encyclopedia_min_spacing_ms() -> u64 {
    2_500
}

fn default_encyclopedia_max_attempts() -> u32 {
    3
}

fn default_episode_endpoint() -> String {
    "https://api4.thetvdb.com/v4".to_string()
}

fn default_episode_language() -> String {
    "eng".to_string()
}

fn default_fanart_endpoint() -> String {
    "https://webservice.fanart.tv/v3/tv".to_string()
}

fn default_sequel_ova_score() -> i32 {
    4
}

fn default_side_story_special_score() -> i32 {
    3
}

fn default_side_story_ova_score() -> i32 {
    2
}

fn default_sequel_special_score() -> i32 {
    1
}

fn default_year_delta_weight() -> i64 {
    10
}

fn default_movie_penalty() -> i64 {
    5
}

fn default_movie_minutes_threshold() -> u32 {
    60
}

fn default_max_backdrops() -> u32 {
    5
}

fn default_backdrop_min_width() -> u32 {
    1920
}

fn default_backdrop_min_height() -> u32 {
    1080
}

fn default_backdrop_min_aspect_ratio() -> f64 {
    1.78
}

fn default_snapshot_max_age_days() -> u32 {
    5
}

/// Returns the built-in genre allow-list used for new configs.
pub fn default_approved_genres() -> Vec<String> {
    [
        "Action",
        "Adventure",
        "Avant Garde",
        "Boys Love",
        "Comedy",
        "Demons",
        "Drama",
        "Ecchi",
        "Fantasy",
        "Girls Love",
        "Gourmet",
        "Gore",
        "Harem",
        "Horror",
        "Isekai",
        "Iyashikei",
        "Josei",
        "Kids",
        "Magic",
        "Mythology",
        "Mahou Shoujo",
        "Martial Arts",
        "Mecha",
        "Military",
        "Music",
        "Mystery",
        "Parody",
        "Psychological",
        "Reverse Harem",
        "Romance",
        "School",
        "Sci-Fi",
        "Seinen",
        "Shoujo",
        "Shounen",
        "Slice of Life",
        "Space",
        "Sports",
        "Super Power",
        "Supernatural",
        "Suspense",
        "Samurai",
        "Thriller",
        "Vampire",
    ]
    .iter()
    .map(|genre| genre.to_string())
    .collect()
}

/// Clamps values that would stall or disable a catalog client.
pub fn sanitize_config(config: Config) -> Config {
    let mut sanitized = config;
    let sources = &mut sanitized.sources;
    sources.graph_requests_per_minute = sources.graph_requests_per_minute.clamp(1, 90);
    sources.encyclopedia_max_attempts = sources.encyclopedia_max_attempts.clamp(1, 6);
    sources.tag_slow_spacing_ms = sources.tag_slow_spacing_ms.max(sources.tag_min_spacing_ms);
    sources.tag_ban_minutes = sources.tag_ban_minutes.max(1);
    sources.cross_reference_refresh_hours = sources.cross_reference_refresh_hours.max(1);
    sanitized.artwork.backdrop_min_aspect_ratio =
        sanitized.artwork.backdrop_min_aspect_ratio.clamp(0.0, 10.0);
    sanitized.cache.snapshot_max_age_days = sanitized.cache.snapshot_max_age_days.clamp(1, 90);
    sanitized.resolver.year_delta_weight = sanitized.resolver.year_delta_weight.max(0);
    sanitized.resolver.movie_penalty = sanitized.resolver.movie_penalty.max(0);
    sanitized
}

//! Artwork URL selection across the episode catalog and the fan-art catalog.

use std::collections::HashSet;

use log::{debug, info};
use serde::Serialize;

use crate::config::ArtworkConfig;
use crate::sources::episodes::{Artwork, SeasonSummary};
use crate::sources::fanart::{FanartImage, FanartSeasonImage};
use crate::sources::{non_blank, FanartShow, SeriesExtended};

const TYPE_BANNER: i32 = 1;
const TYPE_POSTER: i32 = 2;
const TYPE_BACKDROP: i32 = 3;
const TYPE_SEASON_BANNER: i32 = 6;
const TYPE_SEASON_POSTER: i32 = 7;
const TYPE_CLEAR_ART: i32 = 22;
const TYPE_LOGO: i32 = 23;

pub const DEFAULT_DISPLAY_ORDER: &str = "official";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Primary,
    Banner,
    Logo,
    Art,
    Thumb,
    Backdrop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteImage {
    pub url: String,
    pub kind: ImageKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub language: Option<String>,
    pub community_rating: Option<f64>,
}

/// Artwork payloads fetched for one series. Either catalog may be missing.
#[derive(Debug, Clone, Copy)]
pub struct ArtworkSources<'a> {
    pub series_id: i64,
    pub catalog: Option<&'a SeriesExtended>,
    pub fanart: Option<&'a FanartShow>,
}

/// Catalog scores are large integers; clamp to a 0-10 rating.
pub fn score_to_rating(score: Option<i64>) -> Option<f64> {
    score.map(|score| (((score as f64) / 10_000.0 * 100.0).round() / 100.0).min(10.0))
}

fn to_image(artwork: &Artwork, kind: ImageKind) -> Option<RemoteImage> {
    let url = artwork
        .image
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())?;
    Some(RemoteImage {
        url: url.to_string(),
        kind,
        width: artwork.width,
        height: artwork.height,
        language: artwork.language.clone(),
        community_rating: score_to_rating(artwork.score),
    })
}

/// Fan-art entries carry no size or rating.
fn fanart_image(image: &FanartImage, kind: ImageKind) -> Option<RemoteImage> {
    Some(RemoteImage {
        url: non_blank(image.url.as_deref())?,
        kind,
        width: None,
        height: None,
        language: non_blank(image.language.as_deref()),
        community_rating: None,
    })
}

fn fanart_images<'a>(
    images: &'a [FanartImage],
    kind: ImageKind,
) -> impl Iterator<Item = RemoteImage> + 'a {
    images.iter().filter_map(move |image| fanart_image(image, kind))
}

fn images_of_type<'a>(
    artworks: &'a [Artwork],
    artwork_type: i32,
    kind: ImageKind,
) -> impl Iterator<Item = RemoteImage> + 'a {
    artworks
        .iter()
        .filter(move |artwork| artwork.artwork_type == Some(artwork_type))
        .filter_map(move |artwork| to_image(artwork, kind))
}

fn passes_backdrop_quality(image: &RemoteImage, limits: &ArtworkConfig) -> bool {
    if limits.backdrop_min_width > 0 && image.width.is_some_and(|w| w < limits.backdrop_min_width) {
        return false;
    }
    if limits.backdrop_min_height > 0
        && image.height.is_some_and(|h| h < limits.backdrop_min_height)
    {
        return false;
    }
    if limits.backdrop_min_aspect_ratio > 0.0 {
        if let (Some(width), Some(height)) = (image.width, image.height) {
            if height > 0 && f64::from(width) / f64::from(height) < limits.backdrop_min_aspect_ratio {
                return false;
            }
        }
    }
    true
}

fn filters_enabled(limits: &ArtworkConfig) -> bool {
    limits.backdrop_min_width > 0
        || limits.backdrop_min_height > 0
        || limits.backdrop_min_aspect_ratio > 0.0
}

fn sort_by_rating(images: &mut [RemoteImage]) {
    images.sort_by(|left, right| {
        right
            .community_rating
            .unwrap_or(0.0)
            .total_cmp(&left.community_rating.unwrap_or(0.0))
    });
}

/// Catalog backdrops passing the quality limits, best rated first. When
/// candidates exist but none pass, the limits are relaxed and every candidate
/// is kept.
fn catalog_backdrops(series: &SeriesExtended, limits: &ArtworkConfig) -> Vec<RemoteImage> {
    let candidates: Vec<RemoteImage> =
        images_of_type(&series.artworks, TYPE_BACKDROP, ImageKind::Backdrop).collect();
    let mut backdrops: Vec<RemoteImage> = candidates
        .iter()
        .filter(|image| passes_backdrop_quality(image, limits))
        .cloned()
        .collect();
    if backdrops.is_empty() && !candidates.is_empty() && filters_enabled(limits) {
        info!(
            "Artwork[{}]: relaxing backdrop quality filter ({} candidates, none passed)",
            series.id,
            candidates.len()
        );
        backdrops = candidates;
    }
    sort_by_rating(&mut backdrops);
    backdrops
}

/// Fan-art backgrounds, then catalog backdrops, deduplicated by URL and
/// capped at `max_backdrops` (0 keeps all).
pub fn select_backdrops(sources: ArtworkSources<'_>, limits: &ArtworkConfig) -> Vec<RemoteImage> {
    let fanart: Vec<RemoteImage> = sources
        .fanart
        .map(|show| {
            fanart_images(&show.backgrounds, ImageKind::Backdrop)
                .filter(|image| passes_backdrop_quality(image, limits))
                .collect()
        })
        .unwrap_or_default();
    let catalog = sources
        .catalog
        .map(|series| catalog_backdrops(series, limits))
        .unwrap_or_default();
    info!(
        "Artwork[{}]: {} fan-art backgrounds, {} catalog backdrops",
        sources.series_id,
        fanart.len(),
        catalog.len()
    );
    let mut backdrops = fanart;
    backdrops.extend(catalog);
    dedup_by_url(&mut backdrops);
    if limits.max_backdrops > 0 {
        backdrops.truncate(limits.max_backdrops as usize);
    }
    backdrops
}

fn dedup_by_url(images: &mut Vec<RemoteImage>) {
    let mut seen = HashSet::new();
    images.retain(|image| seen.insert(image.url.to_ascii_lowercase()));
}

/// Fan-art posters, banners, logos, clear art, and thumbs, then the catalog's
/// posters, banners, logos, and clear art, then backdrops.
pub fn select_series_images(
    sources: ArtworkSources<'_>,
    limits: &ArtworkConfig,
) -> Vec<RemoteImage> {
    let mut images: Vec<RemoteImage> = Vec::new();
    if let Some(show) = sources.fanart {
        images.extend(fanart_images(&show.posters, ImageKind::Primary));
        images.extend(fanart_images(&show.banners, ImageKind::Banner));
        images.extend(fanart_images(show.logos(), ImageKind::Logo));
        images.extend(fanart_images(&show.clear_art, ImageKind::Art));
        images.extend(fanart_images(&show.thumbs, ImageKind::Thumb));
    }
    if let Some(series) = sources.catalog {
        images.extend(
            [
                (TYPE_POSTER, ImageKind::Primary),
                (TYPE_BANNER, ImageKind::Banner),
                (TYPE_LOGO, ImageKind::Logo),
                (TYPE_CLEAR_ART, ImageKind::Art),
            ]
            .into_iter()
            .flat_map(|(artwork_type, kind)| images_of_type(&series.artworks, artwork_type, kind)),
        );
    }
    dedup_by_url(&mut images);
    debug!(
        "Artwork[{}]: {} series images before backdrops",
        sources.series_id,
        images.len()
    );
    images.extend(select_backdrops(sources, limits));
    images
}

fn season_for<'a>(
    seasons: &'a [SeasonSummary],
    season_number: i32,
    display_order: &str,
) -> Option<&'a SeasonSummary> {
    let order_of = |season: &&SeasonSummary, order: &str| {
        season
            .season_type
            .as_ref()
            .and_then(|kind| kind.kind.as_deref())
            .is_some_and(|kind| kind.eq_ignore_ascii_case(order))
    };
    let matching: Vec<&SeasonSummary> = seasons
        .iter()
        .filter(|season| season.number == Some(season_number))
        .collect();
    matching
        .iter()
        .find(|season| order_of(season, display_order))
        .or_else(|| {
            matching
                .iter()
                .find(|season| order_of(season, DEFAULT_DISPLAY_ORDER))
        })
        .or_else(|| matching.first())
        .copied()
}

/// Season posters and banners for the season of the requested display order.
/// Falls back to the season's own image when no poster artwork exists.
fn catalog_season_images(
    series: &SeriesExtended,
    season_number: i32,
    display_order: &str,
) -> Vec<RemoteImage> {
    let Some(season) = season_for(&series.seasons, season_number, display_order) else {
        return Vec::new();
    };
    let in_season = |artwork: &&Artwork| artwork.season_id == Some(season.id);
    let mut images: Vec<RemoteImage> = series
        .artworks
        .iter()
        .filter(in_season)
        .filter(|artwork| artwork.artwork_type == Some(TYPE_SEASON_POSTER))
        .filter_map(|artwork| to_image(artwork, ImageKind::Primary))
        .collect();
    images.extend(
        series
            .artworks
            .iter()
            .filter(in_season)
            .filter(|artwork| artwork.artwork_type == Some(TYPE_SEASON_BANNER))
            .filter_map(|artwork| to_image(artwork, ImageKind::Banner)),
    );

    let has_poster = images.iter().any(|image| image.kind == ImageKind::Primary);
    if !has_poster {
        if let Some(url) = season
            .image
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
        {
            images.push(RemoteImage {
                url: url.to_string(),
                kind: ImageKind::Primary,
                width: None,
                height: None,
                language: None,
                community_rating: None,
            });
        }
    }
    debug!(
        "Artwork[{}]: season {season_number} (catalog season {}) has {} images",
        series.id,
        season.id,
        images.len()
    );
    images
}

fn fanart_season_images<'a>(
    images: &'a [FanartSeasonImage],
    season_number: i32,
    kind: ImageKind,
) -> impl Iterator<Item = RemoteImage> + 'a {
    images
        .iter()
        .filter(move |image| image.is_for_season(season_number))
        .filter_map(move |image| fanart_image(&image.image, kind))
}

/// Catalog season art first, fan-art season posters, banners, and thumbs as
/// the fallback, deduplicated by URL.
pub fn select_season_images(
    sources: ArtworkSources<'_>,
    season_number: i32,
    display_order: &str,
) -> Vec<RemoteImage> {
    let mut images = sources
        .catalog
        .map(|series| catalog_season_images(series, season_number, display_order))
        .unwrap_or_default();
    if let Some(show) = sources.fanart {
        for (entries, kind) in [
            (&show.season_posters, ImageKind::Primary),
            (&show.season_banners, ImageKind::Banner),
            (&show.season_thumbs, ImageKind::Thumb),
        ] {
            images.extend(fanart_season_images(entries, season_number, kind));
        }
    }
    dedup_by_url(&mut images);
    info!(
        "Artwork[{}]: {} images for season {season_number}",
        sources.series_id,
        images.len()
    );
    images
}

#[cfg(test)]
mod tests {
    use super::{
        score_to_rating, select_backdrops, select_season_images, select_series_images,
        ArtworkSources, ImageKind,
    };
    use crate::config::ArtworkConfig;
    use crate::sources::episodes::{Artwork, SeasonSummary, SeasonType};
    use crate::sources::fanart::{FanartImage, FanartSeasonImage};
    use crate::sources::{FanartShow, SeriesExtended};

    fn catalog_only(series: &SeriesExtended) -> ArtworkSources<'_> {
        ArtworkSources {
            series_id: series.id,
            catalog: Some(series),
            fanart: None,
        }
    }

    fn fanart(url: &str) -> FanartImage {
        FanartImage {
            url: Some(url.to_string()),
            language: Some("en".to_string()),
        }
    }

    fn fanart_season(url: &str, season: &str) -> FanartSeasonImage {
        FanartSeasonImage {
            image: fanart(url),
            season: Some(season.to_string()),
        }
    }

    fn urls(images: &[super::RemoteImage]) -> Vec<&str> {
        images.iter().map(|image| image.url.as_str()).collect()
    }

    fn artwork(id: i64, kind: i32, url: &str, size: (u32, u32), score: i64) -> Artwork {
        Artwork {
            id,
            image: Some(url.to_string()),
            artwork_type: Some(kind),
            score: Some(score),
            width: Some(size.0),
            height: Some(size.1),
            ..Artwork::default()
        }
    }

    fn season(id: i64, number: i32, order: &str, image: Option<&str>) -> SeasonSummary {
        SeasonSummary {
            id,
            number: Some(number),
            season_type: Some(SeasonType {
                id: 1,
                name: None,
                kind: Some(order.to_string()),
            }),
            image: image.map(str::to_string),
        }
    }

    #[test]
    fn test_score_to_rating_rounds_and_clamps() {
        assert_eq!(score_to_rating(Some(123_456)), Some(10.0));
        assert_eq!(score_to_rating(Some(45_678)), Some(4.57));
        assert_eq!(score_to_rating(None), None);
    }

    #[test]
    fn test_backdrops_sorted_limited_and_relaxed() {
        let limits = ArtworkConfig {
            max_backdrops: 2,
            backdrop_min_aspect_ratio: 1.7,
            ..ArtworkConfig::default()
        };
        let series = SeriesExtended {
            id: 1,
            artworks: vec![
                artwork(1, 3, "https://art/b1.jpg", (1920, 1080), 10_000),
                artwork(2, 3, "https://art/b2.jpg", (1920, 1080), 90_000),
                artwork(3, 3, "https://art/b3.jpg", (1280, 720), 99_000),
                artwork(4, 3, "https://art/b4.jpg", (3840, 2160), 50_000),
            ],
            seasons: Vec::new(),
        };
        let urls: Vec<String> = select_backdrops(catalog_only(&series), &limits)
            .into_iter()
            .map(|image| image.url)
            .collect();
        assert_eq!(urls, vec!["https://art/b2.jpg", "https://art/b4.jpg"]);

        let small_only = SeriesExtended {
            id: 2,
            artworks: vec![artwork(5, 3, "https://art/small.jpg", (640, 360), 1)],
            seasons: Vec::new(),
        };
        assert_eq!(select_backdrops(catalog_only(&small_only), &limits).len(), 1);
    }

    #[test]
    fn test_series_images_group_by_kind() {
        let series = SeriesExtended {
            id: 1,
            artworks: vec![
                artwork(1, 2, "https://art/poster.jpg", (680, 1000), 5),
                artwork(2, 2, "https://ART/POSTER.jpg", (680, 1000), 5),
                artwork(3, 23, "https://art/logo.png", (800, 310), 5),
                artwork(4, 1, "https://art/banner.jpg", (758, 140), 5),
            ],
            seasons: Vec::new(),
        };
        let limits = ArtworkConfig::default();
        let kinds: Vec<ImageKind> = select_series_images(catalog_only(&series), &limits)
            .into_iter()
            .map(|image| image.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![ImageKind::Primary, ImageKind::Banner, ImageKind::Logo]
        );
    }

    #[test]
    fn test_season_images_prefer_display_order_then_fall_back_to_season_image() {
        let mut poster = artwork(1, 7, "https://art/s2-absolute.jpg", (680, 1000), 1);
        poster.season_id = Some(21);
        let mut official_banner = artwork(2, 6, "https://art/s2-banner.jpg", (758, 140), 1);
        official_banner.season_id = Some(20);
        let series = SeriesExtended {
            id: 1,
            artworks: vec![poster, official_banner],
            seasons: vec![
                season(20, 2, "official", Some("https://art/s2-official.jpg")),
                season(21, 2, "absolute", None),
            ],
        };

        let absolute = select_season_images(catalog_only(&series), 2, "absolute");
        assert_eq!(absolute.len(), 1);
        assert_eq!(absolute[0].url, "https://art/s2-absolute.jpg");

        let fallback = select_season_images(catalog_only(&series), 2, "dvd");
        let urls: Vec<&str> = fallback.iter().map(|image| image.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://art/s2-banner.jpg", "https://art/s2-official.jpg"]
        );
        assert!(select_season_images(catalog_only(&series), 5, "official").is_empty());
    }

    #[test]
    fn test_fanart_images_lead_and_duplicates_collapse() {
        let series = SeriesExtended {
            id: 75579,
            artworks: vec![
                artwork(1, 2, "https://art/poster.jpg", (680, 1000), 5),
                artwork(2, 2, "https://FANART/poster.jpg", (680, 1000), 5),
                artwork(3, 22, "https://art/clear.png", (1000, 562), 5),
            ],
            seasons: Vec::new(),
        };
        let show = FanartShow {
            posters: vec![fanart("https://fanart/poster.jpg")],
            clear_logos: vec![fanart("https://fanart/clearlogo.png")],
            hd_logos: vec![fanart("https://fanart/hdlogo.png")],
            thumbs: vec![fanart("https://fanart/thumb.jpg"), fanart("  ")],
            ..FanartShow::default()
        };
        let sources = ArtworkSources {
            series_id: 75579,
            catalog: Some(&series),
            fanart: Some(&show),
        };

        let images = select_series_images(sources, &ArtworkConfig::default());
        assert_eq!(
            urls(&images),
            vec![
                "https://fanart/poster.jpg",
                "https://fanart/hdlogo.png",
                "https://fanart/thumb.jpg",
                "https://art/poster.jpg",
                "https://art/clear.png",
            ]
        );
        assert_eq!(images[2].kind, ImageKind::Thumb);
        assert_eq!(images[0].language.as_deref(), Some("en"));
        assert_eq!(images[0].width, None);
    }

    #[test]
    fn test_backdrop_cap_spans_fanart_and_catalog() {
        let limits = ArtworkConfig {
            max_backdrops: 3,
            ..ArtworkConfig::default()
        };
        let series = SeriesExtended {
            id: 75579,
            artworks: vec![
                artwork(1, 3, "https://art/low.jpg", (1920, 1080), 10_000),
                artwork(2, 3, "https://art/high.jpg", (1920, 1080), 90_000),
                artwork(3, 3, "https://fanart/bg-2.jpg", (1920, 1080), 99_000),
            ],
            seasons: Vec::new(),
        };
        let show = FanartShow {
            backgrounds: vec![
                fanart("https://fanart/bg-1.jpg"),
                fanart("https://fanart/bg-2.jpg"),
            ],
            ..FanartShow::default()
        };
        let sources = ArtworkSources {
            series_id: 75579,
            catalog: Some(&series),
            fanart: Some(&show),
        };

        let capped = select_backdrops(sources, &limits);
        assert_eq!(
            urls(&capped),
            vec!["https://fanart/bg-1.jpg", "https://fanart/bg-2.jpg", "https://art/high.jpg"]
        );
        assert!(capped.iter().all(|image| image.kind == ImageKind::Backdrop));

        let unlimited = ArtworkConfig {
            max_backdrops: 0,
            ..limits.clone()
        };
        assert_eq!(select_backdrops(sources, &unlimited).len(), 4);

        let fanart_only = ArtworkSources {
            catalog: None,
            ..sources
        };
        assert_eq!(select_backdrops(fanart_only, &limits).len(), 2);
    }

    #[test]
    fn test_season_fanart_follows_catalog_art() {
        let mut poster = artwork(1, 7, "https://art/s1.jpg", (680, 1000), 1);
        poster.season_id = Some(10);
        let series = SeriesExtended {
            id: 75579,
            artworks: vec![poster],
            seasons: vec![season(10, 1, "official", None)],
        };
        let show = FanartShow {
            season_posters: vec![
                fanart_season("https://fanart/s1.jpg", "1"),
                fanart_season("https://art/S1.jpg", "1"),
                fanart_season("https://fanart/s2.jpg", "2"),
            ],
            season_banners: vec![fanart_season("https://fanart/s1-banner.jpg", "1")],
            season_thumbs: vec![
                fanart_season("https://fanart/s1-thumb.jpg", "1"),
                fanart_season("https://fanart/all-thumb.jpg", "all"),
            ],
            ..FanartShow::default()
        };
        let sources = ArtworkSources {
            series_id: 75579,
            catalog: Some(&series),
            fanart: Some(&show),
        };

        let images = select_season_images(sources, 1, "official");
        assert_eq!(
            urls(&images),
            vec![
                "https://art/s1.jpg",
                "https://fanart/s1.jpg",
                "https://fanart/s1-banner.jpg",
                "https://fanart/s1-thumb.jpg",
            ]
        );
        assert_eq!(images[3].kind, ImageKind::Thumb);

        let without_catalog = ArtworkSources {
            catalog: None,
            ..sources
        };
        assert_eq!(
            urls(&select_season_images(without_catalog, 2, "official")),
            vec!["https://fanart/s2.jpg"]
        );
    }
}

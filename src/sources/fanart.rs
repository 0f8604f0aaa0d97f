//! Fan-art catalog client (REST GET keyed by episode-catalog series id).
//!
//! The catalog only answers with a personal API key; without one the client
//! reports itself unconfigured and the engine never calls it.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{classify_status, decode_json};
use crate::cache::{PersistentCache, ResponseCache};
use crate::cancellation::CancellationFlag;
use crate::config::SourcesConfig;
use crate::error::{SourceError, SourceResult};
use crate::http::{query_string, HttpTransport};

pub const CATALOG: &str = "fanart";
pub const FANART_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanartImage {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "lang", default)]
    pub language: Option<String>,
}

/// Season-scoped image. `season` is a decimal string, or `all`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanartSeasonImage {
    #[serde(flatten)]
    pub image: FanartImage,
    #[serde(default)]
    pub season: Option<String>,
}

impl FanartSeasonImage {
    pub fn is_for_season(&self, season_number: i32) -> bool {
        self.season
            .as_deref()
            .and_then(|season| season.trim().parse::<i32>().ok())
            == Some(season_number)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanartShow {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "thetvdb_id", default)]
    pub tvdb_id: Option<String>,
    #[serde(rename = "tvposter", default)]
    pub posters: Vec<FanartImage>,
    #[serde(rename = "tvbanner", default)]
    pub banners: Vec<FanartImage>,
    #[serde(rename = "hdtvlogo", default)]
    pub hd_logos: Vec<FanartImage>,
    #[serde(rename = "clearlogo", default)]
    pub clear_logos: Vec<FanartImage>,
    #[serde(rename = "clearart", default)]
    pub clear_art: Vec<FanartImage>,
    #[serde(rename = "tvthumb", default)]
    pub thumbs: Vec<FanartImage>,
    #[serde(rename = "showbackground", default)]
    pub backgrounds: Vec<FanartImage>,
    #[serde(rename = "seasonposter", default)]
    pub season_posters: Vec<FanartSeasonImage>,
    #[serde(rename = "seasonbanner", default)]
    pub season_banners: Vec<FanartSeasonImage>,
    #[serde(rename = "seasonthumb", default)]
    pub season_thumbs: Vec<FanartSeasonImage>,
}

impl FanartShow {
    /// HD logos when any exist, else the plain clear logos.
    pub fn logos(&self) -> &[FanartImage] {
        if self.hd_logos.is_empty() {
            &self.clear_logos
        } else {
            &self.hd_logos
        }
    }
}

pub struct FanartClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    api_key: String,
    shows: Arc<ResponseCache<i64, FanartShow>>,
    persistent: Option<Arc<PersistentCache>>,
}

impl FanartClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sources: &SourcesConfig,
        persistent: Option<Arc<PersistentCache>>,
    ) -> Self {
        let shows = Arc::new(ResponseCache::new("fanart_shows", FANART_CACHE_TTL));
        if let Some(store) = &persistent {
            store.register(shows.clone());
        }
        Self {
            transport,
            endpoint: sources.fanart_endpoint.trim_end_matches('/').to_string(),
            api_key: sources.fanart_api_key.trim().to_string(),
            shows,
            persistent,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Artwork listing for one episode-catalog series id.
    pub fn show(&self, tvdb_id: i64, cancel: &CancellationFlag) -> SourceResult<FanartShow> {
        if !self.is_configured() {
            return Err(SourceError::invalid_config(CATALOG, "personal API key is missing"));
        }
        if let Some(store) = &self.persistent {
            store.ensure_loaded();
        }
        if let Some(show) = self.shows.get(&tvdb_id) {
            debug!("Fanart[{tvdb_id}]: cache hit");
            return Ok(show);
        }
        cancel.check()?;

        let url = format!(
            "{}/{tvdb_id}?{}",
            self.endpoint,
            query_string(&[("api_key", &self.api_key)])
        );
        let response = self
            .transport
            .get(&url, &[])
            .map_err(|error| SourceError::transient(CATALOG, error))?;
        cancel.check()?;
        if !response.is_success() {
            return Err(classify_status(CATALOG, tvdb_id, &response));
        }
        let show: FanartShow = decode_json(CATALOG, &response.body)?;
        info!(
            "Fanart[{tvdb_id}]: {} posters, {} backgrounds, {} season posters",
            show.posters.len(),
            show.backgrounds.len(),
            show.season_posters.len()
        );
        self.shows.insert(tvdb_id, show.clone());
        if let Some(store) = &self.persistent {
            store.flush();
        }
        Ok(show)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{FanartClient, FanartSeasonImage};
    use crate::cancellation::CancellationFlag;
    use crate::config::SourcesConfig;
    use crate::error::SourceError;
    use crate::http::testing::MockTransport;

    const SHOW: &str = r#"{
        "name":"Fullmetal Alchemist","thetvdb_id":"75579",
        "tvposter":[{"id":"1","url":"https://fanart/poster.jpg","lang":"en","likes":"4"}],
        "clearlogo":[{"id":"2","url":"https://fanart/clearlogo.png","lang":"en"}],
        "hdtvlogo":[{"id":"3","url":"https://fanart/hdlogo.png","lang":"en"}],
        "showbackground":[{"id":"4","url":"https://fanart/bg.jpg","lang":""}],
        "seasonposter":[
            {"id":"5","url":"https://fanart/s1.jpg","lang":"en","season":"1"},
            {"id":"6","url":"https://fanart/sall.jpg","lang":"en","season":"all"}
        ]}"#;

    fn keyed() -> SourcesConfig {
        SourcesConfig {
            fanart_api_key: "personal".to_string(),
            ..SourcesConfig::default()
        }
    }

    #[test]
    fn test_show_parses_and_is_cached() {
        let transport = Arc::new(MockTransport::new());
        transport.reply("/75579?api_key=personal", 200, SHOW);
        let client = FanartClient::new(transport.clone(), &keyed(), None);
        let cancel = CancellationFlag::new();

        let show = client.show(75579, &cancel).expect("show");
        assert_eq!(show.posters[0].language.as_deref(), Some("en"));
        assert_eq!(show.logos()[0].url.as_deref(), Some("https://fanart/hdlogo.png"));
        assert!(show.season_posters[0].is_for_season(1));
        assert!(!show.season_posters[1].is_for_season(1));

        client.show(75579, &cancel).expect("cached");
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_missing_key_never_reaches_network() {
        let transport = Arc::new(MockTransport::new());
        let client = FanartClient::new(transport.clone(), &SourcesConfig::default(), None);
        assert!(!client.is_configured());
        assert!(matches!(
            client.show(75579, &CancellationFlag::new()),
            Err(SourceError::ConfigurationInvalid { .. })
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn test_unknown_show_is_not_found() {
        let transport = Arc::new(MockTransport::new());
        let client = FanartClient::new(transport, &keyed(), None);
        let outcome = client.show(1, &CancellationFlag::new());
        assert!(outcome.is_err_and(|error| error.is_not_found()));
    }

    #[test]
    fn test_season_filter_ignores_blank_and_all() {
        let image = |season: Option<&str>| FanartSeasonImage {
            season: season.map(str::to_string),
            ..FanartSeasonImage::default()
        };
        assert!(image(Some(" 0 ")).is_for_season(0));
        assert!(!image(Some("all")).is_for_season(0));
        assert!(!image(None).is_for_season(1));
    }
}

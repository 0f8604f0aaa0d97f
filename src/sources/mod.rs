//! Catalog clients. Each one owns its access discipline and response cache.

pub mod encyclopedia;
pub mod episodes;
pub mod fanart;
pub mod graph;
pub mod tags;

use serde::de::DeserializeOwned;

use crate::error::{SourceError, SourceResult};
use crate::http::HttpResponse;

pub use encyclopedia::{EncyclopediaClient, EncyclopediaRecord};
pub use episodes::{EpisodeClient, EpisodeRecord, SeriesExtended};
pub use fanart::{FanartClient, FanartShow};
pub use graph::{GraphClient, GraphEntry, MediaFormat, Person, RelationEdge, RelationKind};
pub use tags::TagClient;

/// Maps a non-success status to the shared taxonomy.
pub(crate) fn classify_status(
    catalog: &'static str,
    id: impl ToString,
    response: &HttpResponse,
) -> SourceError {
    match response.status {
        404 => SourceError::not_found(catalog, id),
        429 => SourceError::RateLimited {
            catalog,
            detail: format!("status 429 for {}", id.to_string()),
        },
        status => SourceError::transient(catalog, format!("status {status} for {}", id.to_string())),
    }
}

pub(crate) fn decode_json<T: DeserializeOwned>(
    catalog: &'static str,
    body: &str,
) -> SourceResult<T> {
    serde_json::from_str(body).map_err(|error| SourceError::malformed(catalog, error.to_string()))
}

/// Trims and drops empty strings.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

//! Error taxonomy for catalog clients and the resolution boundary.
//!
//! Catalog failures never abort a resolution: they are settled into "no data
//! from that source" with [`settle`]. Only identity-table failures and a
//! missing cross-reference row surface to callers as [`ResolveError`].

use log::{debug, warn};
use thiserror::Error;

/// Failure reported by a single catalog client call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("{catalog}: no entry for {id}")]
    NotFound { catalog: &'static str, id: String },
    #[error("{catalog}: rate limited ({detail})")]
    RateLimited {
        catalog: &'static str,
        detail: String,
    },
    #[error("{catalog}: requests suspended until {until_unix_ms} ({reason})")]
    Banned {
        catalog: &'static str,
        until_unix_ms: i64,
        reason: String,
    },
    #[error("{catalog}: transient failure: {message}")]
    Transient {
        catalog: &'static str,
        message: String,
    },
    #[error("{catalog}: malformed response: {message}")]
    Malformed {
        catalog: &'static str,
        message: String,
    },
    #[error("{catalog}: invalid configuration: {message}")]
    ConfigurationInvalid {
        catalog: &'static str,
        message: String,
    },
    #[error("request cancelled")]
    Cancelled,
}

pub type SourceResult<T> = Result<T, SourceError>;

impl SourceError {
    pub fn not_found(catalog: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            catalog,
            id: id.to_string(),
        }
    }

    pub fn transient(catalog: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            catalog,
            message: message.into(),
        }
    }

    pub fn malformed(catalog: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            catalog,
            message: message.into(),
        }
    }

    pub fn invalid_config(catalog: &'static str, message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid {
            catalog,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Degrades a client failure to "no data", logging at a level matching its kind.
pub fn settle<T>(result: SourceResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error @ (SourceError::NotFound { .. } | SourceError::Cancelled)) => {
            debug!("{error}");
            None
        }
        Err(error) => {
            warn!("{error}");
            None
        }
    }
}

/// Same as [`settle`] for list-shaped results.
pub fn settle_list<T>(result: SourceResult<Vec<T>>) -> Vec<T> {
    settle(result).unwrap_or_default()
}

/// Failure while loading the cross-reference table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("cross-reference fetch failed: {0}")]
    Fetch(String),
    #[error("cross-reference payload malformed: {0}")]
    Parse(String),
}

/// Resolution-level failure returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("cross-reference table unavailable: {0}")]
    MappingUnavailable(#[from] MappingError),
    #[error("no cross-reference row for {0}")]
    NoMapping(String),
    #[error("hint unreadable: {0}")]
    Hint(String),
    #[error("no season {season_number} under root {root_id}")]
    SeasonNotFound { root_id: i64, season_number: i32 },
    #[error("no episode S{season_number:02}E{episode_number:02} for series {series_id}")]
    EpisodeNotFound {
        series_id: i64,
        season_number: i32,
        episode_number: i32,
    },
    #[error("resolution cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::{settle, settle_list, SourceError};

    #[test]
    fn test_settle_degrades_every_failure_kind_to_none() {
        let failures = vec![
            SourceError::not_found("graph", 7),
            SourceError::RateLimited {
                catalog: "graph",
                detail: "window full".to_string(),
            },
            SourceError::Banned {
                catalog: "tags",
                until_unix_ms: 10,
                reason: "banned".to_string(),
            },
            SourceError::transient("episodes", "timeout"),
            SourceError::malformed("encyclopedia", "bad json"),
            SourceError::invalid_config("episodes", "missing api key"),
            SourceError::Cancelled,
        ];
        for failure in failures {
            assert_eq!(settle::<u8>(Err(failure)), None);
        }
        assert_eq!(settle(Ok(3)), Some(3));
    }

    #[test]
    fn test_settle_list_returns_empty_on_failure() {
        let settled: Vec<String> = settle_list(Err(SourceError::transient("tags", "reset")));
        assert!(settled.is_empty());
    }

    #[test]
    fn test_source_error_display_names_catalog() {
        let error = SourceError::not_found("graph", 5114);
        assert_eq!(error.to_string(), "graph: no entry for 5114");
        assert!(error.is_not_found());
    }
}

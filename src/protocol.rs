//! Event-bus protocol between hosts and the resolution worker.
//!
//! Requests carry a caller-chosen id; every result echoes it so a host can
//! match answers to requests and cancel work still in flight.

use crate::config::Config;
use crate::hint::LocalHint;
use crate::merge::{NormalizedSeriesRecord, ResolvedSeason};
use crate::service::EpisodeDetails;

/// Caller-chosen correlation id.
pub type RequestId = u64;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Resolution(ResolutionMessage),
    Config(ConfigMessage),
}

/// Where a season lookup starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeasonAnchor {
    /// Known root graph id.
    Root(i64),
    /// Resolve the root from the series hint first.
    Hint(LocalHint),
}

/// Resolution commands and their results.
#[derive(Debug, Clone)]
pub enum ResolutionMessage {
    ResolveSeries {
        request_id: RequestId,
        hint: LocalHint,
    },
    ResolveSeason {
        request_id: RequestId,
        anchor: SeasonAnchor,
        season_number: i32,
    },
    ResolveEpisode {
        request_id: RequestId,
        series_id: i64,
        season_number: i32,
        episode_number: i32,
    },
    /// Stops the request at its next checkpoint. Unknown ids are ignored.
    Cancel(RequestId),
    SeriesResolved {
        request_id: RequestId,
        record: Box<NormalizedSeriesRecord>,
    },
    SeasonResolved {
        request_id: RequestId,
        season: Box<ResolvedSeason>,
    },
    EpisodeResolved {
        request_id: RequestId,
        episode: Box<EpisodeDetails>,
    },
    ResolutionFailed {
        request_id: RequestId,
        /// Display form of the resolution error.
        error: String,
        cancelled: bool,
    },
}

impl ResolutionMessage {
    /// Id of the request this message belongs to.
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::ResolveSeries { request_id, .. }
            | Self::ResolveSeason { request_id, .. }
            | Self::ResolveEpisode { request_id, .. }
            | Self::SeriesResolved { request_id, .. }
            | Self::SeasonResolved { request_id, .. }
            | Self::EpisodeResolved { request_id, .. }
            | Self::ResolutionFailed { request_id, .. } => *request_id,
            Self::Cancel(request_id) => *request_id,
        }
    }

    /// True for messages the worker publishes.
    pub fn is_result(&self) -> bool {
        matches!(
            self,
            Self::SeriesResolved { .. }
                | Self::SeasonResolved { .. }
                | Self::EpisodeResolved { .. }
                | Self::ResolutionFailed { .. }
        )
    }
}

/// Runtime configuration updates.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum ConfigMessage {
    ConfigChanged(Config),
}

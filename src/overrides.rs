//! Curated exception tables for franchises with unreliable relation data.

use std::collections::BTreeSet;
use std::path::Path;

use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct DeferSeasonRule {
    pub root_id: i64,
    pub from_season: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct OverrideTables {
    #[serde(default)]
    pub pinned_ids: BTreeSet<i64>,
    #[serde(default)]
    pub long_episode_ids: BTreeSet<i64>,
    #[serde(default)]
    pub defer_seasons: Vec<DeferSeasonRule>,
}

impl OverrideTables {
    pub fn builtin_text() -> &'static str {
        include_str!("../config/overrides.toml")
    }

    pub fn builtin() -> Self {
        toml::from_str(Self::builtin_text()).unwrap_or_else(|err| {
            log::error!("Built-in overrides table failed to parse: {}", err);
            Self::default()
        })
    }

    /// Loads a replacement table, falling back to the built-in one.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::builtin();
        };
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    "Failed to read overrides file {}. Using built-in table. error={}",
                    path.display(),
                    err
                );
                return Self::builtin();
            }
        };
        match toml::from_str::<Self>(&text) {
            Ok(tables) => tables,
            Err(err) => {
                warn!(
                    "Failed to parse overrides file {}. Using built-in table. error={}",
                    path.display(),
                    err
                );
                Self::builtin()
            }
        }
    }

    pub fn is_pinned(&self, graph_id: i64) -> bool {
        self.pinned_ids.contains(&graph_id)
    }

    pub fn is_long_episode(&self, graph_id: i64) -> bool {
        self.long_episode_ids.contains(&graph_id)
    }

    pub fn should_defer_season(&self, root_id: i64, season_number: i32) -> bool {
        self.defer_seasons
            .iter()
            .any(|rule| rule.root_id == root_id && season_number >= rule.from_season)
    }
}

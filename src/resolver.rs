//! Relation-graph walks: root finding, season-by-number and year disambiguation.
//!
//! Nodes are addressed by catalog id and every walk keeps a visited set, so
//! cyclic relation data always terminates.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info, warn};

use crate::cancellation::CancellationFlag;
use crate::config::{ResolverConfig, SpecialScoreConfig};
use crate::error::{SourceError, SourceResult};
use crate::overrides::OverrideTables;
use crate::sources::{GraphClient, GraphEntry, MediaFormat, RelationEdge, RelationKind};

const MAX_DISAMBIGUATION_NODES: usize = 16;

/// Read access to the relation graph plus the root memo.
pub trait RelationSource: Send + Sync {
    fn entry(&self, id: i64, cancel: &CancellationFlag) -> SourceResult<GraphEntry>;
    fn season_detail(&self, id: i64, cancel: &CancellationFlag) -> SourceResult<GraphEntry>;
    fn cached_root(&self, start_id: i64) -> Option<i64>;
    fn store_root(&self, start_id: i64, root_id: i64);
}

impl RelationSource for GraphClient {
    fn entry(&self, id: i64, cancel: &CancellationFlag) -> SourceResult<GraphEntry> {
        GraphClient::entry(self, id, cancel)
    }

    fn season_detail(&self, id: i64, cancel: &CancellationFlag) -> SourceResult<GraphEntry> {
        GraphClient::season_detail(self, id, cancel)
    }

    fn cached_root(&self, start_id: i64) -> Option<i64> {
        GraphClient::cached_root(self, start_id)
    }

    fn store_root(&self, start_id: i64, root_id: i64) {
        GraphClient::store_root(self, start_id, root_id)
    }
}

/// TV > TV_SHORT > ONA > OVA > everything else.
pub fn preferred_format_score(format: Option<MediaFormat>) -> i32 {
    match format {
        Some(MediaFormat::Tv) => 3,
        Some(MediaFormat::TvShort) => 2,
        Some(MediaFormat::Ona) => 1,
        Some(MediaFormat::Ova) => 0,
        _ => -1,
    }
}

/// Best edge of `kind`; ties keep edge order.
pub fn best_relation(entry: &GraphEntry, kind: RelationKind, tv_only: bool) -> Option<&RelationEdge> {
    let mut best: Option<(&RelationEdge, i32)> = None;
    for edge in entry.edges_of(kind) {
        if tv_only && !edge.target.format.is_some_and(MediaFormat::is_tv) {
            continue;
        }
        let score = preferred_format_score(edge.target.format);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((edge, score));
        }
    }
    best.map(|(edge, _)| edge)
}

/// Score of an edge as a specials candidate, `None` when it cannot be one.
pub fn special_score(edge: &RelationEdge, scores: &SpecialScoreConfig) -> Option<i32> {
    if !edge.target.is_anime() {
        return None;
    }
    let format = edge.target.format;
    let special_format = matches!(
        format,
        Some(MediaFormat::Ova | MediaFormat::Special | MediaFormat::Ona)
    );
    if !special_format && edge.kind != RelationKind::SideStory {
        return None;
    }
    let score = match (edge.kind, format) {
        (RelationKind::Sequel, Some(MediaFormat::Ova)) => scores.sequel_ova,
        (RelationKind::SideStory, Some(MediaFormat::Special)) => scores.side_story_special,
        (RelationKind::SideStory, Some(MediaFormat::Ova)) => scores.side_story_ova,
        (RelationKind::Sequel, Some(MediaFormat::Special)) => scores.sequel_special,
        _ => 0,
    };
    Some(score)
}

pub fn best_special<'e>(entry: &'e GraphEntry, scores: &SpecialScoreConfig) -> Option<&'e RelationEdge> {
    let mut best: Option<(&RelationEdge, i32)> = None;
    for edge in &entry.relations {
        let Some(score) = special_score(edge, scores) else {
            continue;
        };
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((edge, score));
        }
    }
    best.map(|(edge, _)| edge)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeSummary {
    year: Option<i32>,
    format: Option<MediaFormat>,
    duration: Option<u32>,
}

impl From<&GraphEntry> for NodeSummary {
    fn from(entry: &GraphEntry) -> Self {
        Self {
            year: entry.year(),
            format: entry.format,
            duration: entry.duration,
        }
    }
}

pub struct GraphResolver<'a> {
    source: &'a dyn RelationSource,
    config: &'a ResolverConfig,
    overrides: &'a OverrideTables,
}

impl<'a> GraphResolver<'a> {
    pub fn new(
        source: &'a dyn RelationSource,
        config: &'a ResolverConfig,
        overrides: &'a OverrideTables,
    ) -> Self {
        Self {
            source,
            config,
            overrides,
        }
    }

    /// Follows the best TV-format prequel until none qualifies or a node repeats.
    pub fn find_root(&self, start_id: i64, cancel: &CancellationFlag) -> SourceResult<i64> {
        if let Some(root_id) = self.source.cached_root(start_id) {
            debug!("Resolver[{start_id}]: root memo hit -> {root_id}");
            return Ok(root_id);
        }

        let mut visited = HashSet::new();
        let mut previous = start_id;
        let mut current = start_id;
        loop {
            visited.insert(current);
            let entry = match self.source.entry(current, cancel) {
                Ok(entry) => entry,
                Err(error) if current != start_id && error != SourceError::Cancelled => {
                    // Not memoized; a later call retries the walk.
                    warn!("Resolver[{start_id}]: prequel walk stopped at {current}: {error}");
                    return Ok(previous);
                }
                Err(error) => return Err(error),
            };
            let Some(edge) = best_relation(&entry, RelationKind::Prequel, true) else {
                break;
            };
            if visited.contains(&edge.target.id) {
                debug!(
                    "Resolver[{start_id}]: prequel cycle at {} -> {}",
                    current, edge.target.id
                );
                break;
            }
            previous = current;
            current = edge.target.id;
        }

        info!("Resolver[{start_id}]: root is {current}");
        self.source.store_root(start_id, current);
        Ok(current)
    }

    /// Root for a mapped id, honoring pinned ids and the year hint.
    pub fn resolve_root(
        &self,
        mapped_id: i64,
        year_hint: Option<i32>,
        cancel: &CancellationFlag,
    ) -> SourceResult<i64> {
        if self.overrides.is_pinned(mapped_id) {
            info!("Resolver[{mapped_id}]: pinned, skipping root resolution");
            return Ok(mapped_id);
        }
        let root_id = self.find_root(mapped_id, cancel)?;
        match year_hint {
            Some(year) if root_id != mapped_id => {
                self.disambiguate_by_year(mapped_id, root_id, year, cancel)
            }
            _ => Ok(root_id),
        }
    }

    fn disambiguation_score(&self, id: i64, node: &NodeSummary, year_hint: i32) -> Option<i64> {
        let year = node.year?;
        let mut score = i64::from((year - year_hint).abs()) * self.config.year_delta_weight;
        let long_movie = node.format == Some(MediaFormat::Movie)
            && node
                .duration
                .is_some_and(|minutes| minutes > self.config.movie_minutes_threshold);
        if long_movie && !self.overrides.is_long_episode(id) {
            score += self.config.movie_penalty;
        }
        Some(score)
    }

    /// Picks between the mapped entry and the generic root by release year.
    /// Ties, and a mapped entry without a year, keep the root.
    pub fn disambiguate_by_year(
        &self,
        mapped_id: i64,
        root_id: i64,
        year_hint: i32,
        cancel: &CancellationFlag,
    ) -> SourceResult<i64> {
        let mut nodes: HashMap<i64, NodeSummary> = HashMap::new();
        let mut queue = VecDeque::from([mapped_id]);
        while let Some(id) = queue.pop_front() {
            if nodes.contains_key(&id) || nodes.len() >= MAX_DISAMBIGUATION_NODES {
                continue;
            }
            let entry = match self.source.entry(id, cancel) {
                Ok(entry) => entry,
                Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
                Err(error) => {
                    debug!("Resolver[{mapped_id}]: skipping {id} during year check: {error}");
                    continue;
                }
            };
            nodes.insert(id, NodeSummary::from(&entry));
            queue.extend(
                entry
                    .edges_of(RelationKind::Prequel)
                    .map(|edge| edge.target.id)
                    .filter(|target| !nodes.contains_key(target)),
            );
        }
        if !nodes.contains_key(&root_id) {
            if let Ok(entry) = self.source.entry(root_id, cancel) {
                nodes.insert(root_id, NodeSummary::from(&entry));
            }
        }

        let mapped_score = nodes
            .get(&mapped_id)
            .and_then(|node| self.disambiguation_score(mapped_id, node, year_hint));
        let root_score = nodes
            .get(&root_id)
            .and_then(|node| self.disambiguation_score(root_id, node, year_hint));
        debug!(
            "Resolver[{mapped_id}]: year {year_hint} scores mapped={mapped_score:?} root({root_id})={root_score:?}"
        );
        let chosen = match (mapped_score, root_score) {
            (Some(mapped), Some(root)) if mapped < root => mapped_id,
            (Some(_), None) => mapped_id,
            _ => root_id,
        };
        if chosen != root_id {
            info!("Resolver[{mapped_id}]: year {year_hint} keeps mapped entry over root {root_id}");
        }
        Ok(chosen)
    }

    /// Graph node of season `season_number` under `root_id`. Season 1 is the
    /// root, season 0 the best specials entry along the sequel chain.
    pub fn season_entry(
        &self,
        root_id: i64,
        season_number: i32,
        cancel: &CancellationFlag,
    ) -> SourceResult<Option<GraphEntry>> {
        match season_number {
            n if n < 0 => Ok(None),
            0 => self.specials_entry(root_id, cancel),
            1 => self.source.season_detail(root_id, cancel).map(Some),
            n => {
                let mut visited = HashSet::from([root_id]);
                let mut current = root_id;
                for hop in 1..n {
                    let detail = self.source.season_detail(current, cancel)?;
                    let Some(edge) = best_relation(&detail, RelationKind::Sequel, true) else {
                        debug!(
                            "Resolver[{root_id}]: sequel chain ends at hop {hop} of {}",
                            n - 1
                        );
                        return Ok(None);
                    };
                    if !visited.insert(edge.target.id) {
                        debug!("Resolver[{root_id}]: sequel cycle at {}", edge.target.id);
                        return Ok(None);
                    }
                    current = edge.target.id;
                }
                self.source.season_detail(current, cancel).map(Some)
            }
        }
    }

    fn specials_entry(&self, root_id: i64, cancel: &CancellationFlag) -> SourceResult<Option<GraphEntry>> {
        let mut visited = HashSet::new();
        let mut current = root_id;
        while visited.insert(current) {
            let detail = self.source.season_detail(current, cancel)?;
            if let Some(edge) = best_special(&detail, &self.config.special_scores) {
                debug!(
                    "Resolver[{root_id}]: specials entry {} found at {current}",
                    edge.target.id
                );
                return self.source.season_detail(edge.target.id, cancel).map(Some);
            }
            match best_relation(&detail, RelationKind::Sequel, true) {
                Some(edge) => current = edge.target.id,
                None => break,
            }
        }
        Ok(None)
    }
}

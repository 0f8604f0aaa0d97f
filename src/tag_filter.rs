//! Exclusion filter for tag-catalog tags.

use std::collections::HashSet;

use log::debug;

/// Category and maintenance tags that carry no descriptive value.
const EXCLUDED_TAGS: &[&str] = &[
    "Japanese production",
    "adapted into other media",
    "adapted into Japanese movie",
    "character related tags which need deleting or merging",
    "ending tags that need merging",
    "human - non-human relationship",
    "put right what once went wrong",
    "tropes",
    "cast",
    "ending",
    "origin",
    "technical aspects",
    "Weekly Shounen Jump",
    "complete manga adaptation",
    "unsorted",
    "manga",
    "incomplete story",
    "place",
    "present",
    "plot continuity",
    "elements",
    "time",
    "setting",
    "original work",
    "themes",
    "target audience",
    "dynamic",
    "shoujo",
    "comedy",
    "seinen",
    "content indicators",
    "novel",
    "action",
    "ecchi",
    "romance",
    "harem",
    "fantasy",
    "contemporary fantasy",
    "storytelling",
    "speculative fiction",
    "TO BE MOVED TO CHARACTER",
    "TO BE MOVED TO EPISODE",
    "open-ended",
    "parody",
    "remastered version available",
    "thick line animation",
    "TV censoring",
    "wafuku -- TO BE SPLIT AND DELETED",
    "excessive censoring",
    "preaired episodes",
    "censored uncensored version",
    "season",
    "shounen",
    "multiple protagonists - TO BE MOVED TO PARENT OR DELETED",
    "school festival - TO BE SPLIT AND DELETED",
    "uniform -- TO BE SPLIT AND DELETED",
    "gun - TO BE SPLIT AND DELETED",
    "unusual weapons -- TO BE SPLIT AND DELETED",
    "RPG aspects",
    "medieval -- TO BE SPLIT AND DELETED",
    "maintenance tags",
];

/// Exact or substring match against the exclusion list, ignoring case.
pub fn is_excluded(tag: &str) -> bool {
    let lowered = tag.to_lowercase();
    EXCLUDED_TAGS
        .iter()
        .any(|excluded| lowered.contains(&excluded.to_lowercase()))
}

/// Trims, drops excluded and blank tags, and removes case-insensitive duplicates
/// keeping the first spelling.
pub fn filter_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            continue;
        }
        if is_excluded(tag) {
            dropped += 1;
            continue;
        }
        if seen.insert(tag.to_lowercase()) {
            kept.push(tag.to_string());
        }
    }
    if dropped > 0 {
        debug!("Tags: filtered out {dropped}, kept {}", kept.len());
    }
    kept
}

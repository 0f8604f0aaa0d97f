//! Reader for the per-series `key: value` hint file.

use std::path::{Path, PathBuf};

use log::debug;

pub const HINT_FILE_NAME: &str = ".plexmatch";

/// What a series folder says about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct LocalHint {
    pub title: Option<String>,
    pub year: Option<i32>,
    /// Episode-catalog series id.
    pub tvdb_id: Option<String>,
    /// External-database id (`tt…`).
    pub imdb_id: Option<String>,
}

impl LocalHint {
    pub fn has_identifier(&self) -> bool {
        self.tvdb_id.is_some() || self.imdb_id.is_some()
    }

    pub fn label(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.tvdb_id.as_ref().map(|id| format!("tvdb:{id}")))
            .or_else(|| self.imdb_id.as_ref().map(|id| format!("imdb:{id}")))
            .unwrap_or_else(|| "<untitled>".to_string())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parses hint text. Unknown keys and lines without a colon are skipped; keys
/// are case-insensitive and a later duplicate overrides an earlier one.
pub fn parse_hint(content: &str) -> LocalHint {
    let mut hint = LocalHint::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "title" => hint.title = non_empty(value),
            "year" => {
                if let Ok(year) = value.trim().parse::<i32>() {
                    hint.year = Some(year);
                }
            }
            "tvdbid" => hint.tvdb_id = non_empty(value),
            "imdbid" => hint.imdb_id = non_empty(value),
            other => debug!("Hint: ignoring key {other}"),
        }
    }
    hint
}

/// Accepts either the hint file itself or the series folder holding it.
pub fn hint_path_for(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(HINT_FILE_NAME)
    } else {
        path.to_path_buf()
    }
}

pub fn read_hint_file(path: &Path) -> Result<LocalHint, String> {
    let hint_path = hint_path_for(path);
    let content = std::fs::read_to_string(&hint_path)
        .map_err(|error| format!("{}: {error}", hint_path.display()))?;
    Ok(parse_hint(&content))
}

#[cfg(test)]
mod tests {
    use super::{parse_hint, read_hint_file, LocalHint, HINT_FILE_NAME};

    #[test]
    fn test_parse_hint_reads_known_keys_case_insensitively() {
        let hint = parse_hint(
            "Title: Fullmetal Alchemist\nYEAR: 2003\ntvdbid: 75579\nImdbId: tt0421357\nguid: plex://x\n",
        );
        assert_eq!(
            hint,
            LocalHint {
                title: Some("Fullmetal Alchemist".to_string()),
                year: Some(2003),
                tvdb_id: Some("75579".to_string()),
                imdb_id: Some("tt0421357".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_hint_skips_malformed_lines_and_bad_years() {
        let hint = parse_hint("no colon here\nyear: soon\n# tvdbid: 1\ntitle: A: Subtitle\n");
        assert_eq!(hint.year, None);
        assert_eq!(hint.tvdb_id, None);
        assert_eq!(hint.title.as_deref(), Some("A: Subtitle"));
        assert!(!hint.has_identifier());
    }

    #[test]
    fn test_read_hint_file_accepts_series_folder() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join(HINT_FILE_NAME), "tvdbid: 12345\nyear: 2006\n")
            .expect("write hint");
        let hint = read_hint_file(dir.path()).expect("hint readable");
        assert_eq!(hint.tvdb_id.as_deref(), Some("12345"));
        assert_eq!(hint.year, Some(2006));
        assert!(read_hint_file(&dir.path().join("missing")).is_err());
    }
}

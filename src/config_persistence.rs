use std::path::Path;

use log::{info, warn};
use toml_edit::{DocumentMut, Item, Table};

use crate::config::{sanitize_config, Config};

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

/// Copies `source` into `destination`, touching only keys whose value changed
/// so comments and layout around untouched keys survive.
fn merge_table_with_targeted_updates(destination: &mut Table, source: &Table) {
    for (key, source_item) in source.iter() {
        match source_item {
            Item::Table(source_table) => {
                if !destination.get(key).is_some_and(Item::is_table) {
                    destination.insert(key, Item::Table(Table::new()));
                }
                if let Some(destination_table) =
                    destination.get_mut(key).and_then(Item::as_table_mut)
                {
                    merge_table_with_targeted_updates(destination_table, source_table);
                }
            }
            _ => {
                let unchanged = match (
                    destination.get(key).and_then(Item::as_value),
                    source_item.as_value(),
                ) {
                    (Some(current), Some(next)) => current.to_string().trim() == next.to_string().trim(),
                    _ => false,
                };
                if !unchanged {
                    set_table_value_preserving_decor(destination, key, source_item.clone());
                }
            }
        }
    }
}

pub fn serialize_config_with_preserved_comments(
    existing_text: &str,
    config: &Config,
) -> Result<String, String> {
    let next_config_text = toml::to_string(config)
        .map_err(|err| format!("failed to serialize config to TOML: {}", err))?;
    let next_document = next_config_text
        .parse::<DocumentMut>()
        .map_err(|err| format!("failed to parse serialized config TOML document: {}", err))?;
    let mut existing_document = existing_text
        .parse::<DocumentMut>()
        .map_err(|err| format!("failed to parse existing config as TOML document: {}", err))?;

    merge_table_with_targeted_updates(existing_document.as_table_mut(), next_document.as_table());
    Ok(existing_document.to_string())
}

pub fn persist_config_file(config: &Config, path: &Path) {
    let existing_text = std::fs::read_to_string(path).ok();
    let config_text = if let Some(existing_text) = existing_text {
        match serialize_config_with_preserved_comments(&existing_text, config) {
            Ok(updated_text) => Some(updated_text),
            Err(err) => {
                warn!(
                    "Failed to preserve config comments for {} ({}). Falling back to plain serialization.",
                    path.display(),
                    err
                );
                toml::to_string(config).ok()
            }
        }
    } else {
        toml::to_string(config).ok()
    };

    let Some(config_text) = config_text else {
        log::error!("Failed to serialize config for {}", path.display());
        return;
    };

    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            log::error!("Failed to create config dir {}: {}", parent.display(), err);
            return;
        }
    }
    if let Err(err) = std::fs::write(path, config_text) {
        log::error!("Failed to persist config to {}: {}", path.display(), err);
    }
}

pub fn system_config_template_text() -> &'static str {
    include_str!("../config/config.system.toml")
}

pub fn load_system_config_template() -> Config {
    match toml::from_str(system_config_template_text()) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Config system template failed to parse ({}). Using defaults.", err);
            Config::default()
        }
    }
}

/// Writes the commented system template when no config exists yet.
pub fn ensure_config_file(path: &Path) {
    if path.exists() {
        return;
    }
    info!(
        "Config file not found. Creating default config. path={}",
        path.display()
    );
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            warn!("Failed to create config dir {}: {}", parent.display(), err);
            return;
        }
    }
    if let Err(err) = std::fs::write(path, system_config_template_text()) {
        warn!("Failed to write default config {}: {}", path.display(), err);
    }
}

pub fn load_config_file(path: &Path) -> Config {
    let config_content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "Failed to read config file {}. Using config system template. error={}",
                path.display(),
                err
            );
            return load_system_config_template();
        }
    };

    match toml::from_str::<Config>(&config_content) {
        Ok(config) => sanitize_config(config),
        Err(err) => {
            warn!(
                "Failed to parse config file {}. Using config system template. error={}",
                path.display(),
                err
            );
            load_system_config_template()
        }
    }
}

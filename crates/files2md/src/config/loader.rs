use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::schema::RawSettings;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default config file location (`<config dir>/files2md/config.yaml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("files2md").join(CONFIG_FILE_NAME))
}

/// Loads raw settings from a YAML or JSON file, chosen by extension.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<RawSettings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        load_settings_from_json(&content)
    } else {
        load_settings_from_yaml(&content)
    }
}

pub fn load_settings_from_yaml(content: &str) -> Result<RawSettings, ConfigError> {
    if content.trim().is_empty() {
        return Ok(RawSettings::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

pub fn load_settings_from_json(content: &str) -> Result<RawSettings, ConfigError> {
    Ok(serde_json::from_str(content)?)
}

/// Parses `COLLECTION_KEY=OUTPUT_DIR` pairs, preserving input order.
pub fn parse_collection_output_pairs<S: AsRef<str>>(
    values: &[S],
) -> Result<Vec<(String, PathBuf)>, ConfigError> {
    let mut mapping = Vec::new();
    let mut seen = HashSet::new();

    for value in values {
        let raw = value.as_ref().trim();
        if raw.is_empty() {
            continue;
        }

        let invalid = |reason: &str| ConfigError::InvalidCollectionOutput {
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let (key, dir) = raw
            .split_once('=')
            .ok_or_else(|| invalid("expected COLLECTION_KEY=OUTPUT_DIR"))?;
        let key = key.trim();
        let dir = dir.trim();

        if key.is_empty() {
            return Err(invalid("collection key cannot be empty"));
        }
        if dir.is_empty() {
            return Err(invalid("output directory cannot be empty"));
        }
        if !seen.insert(key.to_string()) {
            return Err(invalid("duplicate collection key"));
        }

        mapping.push((key.to_string(), PathBuf::from(dir)));
    }

    Ok(mapping)
}

//! API key resolution.
//!
//! The key may be given directly (flag, config file, or `ZOTERO_API_KEY` via the
//! CLI) or read from a file, which supports the Docker secrets pattern
//! (`api_key_file: /run/secrets/zotero_api_key`).

use std::fs;

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Zotero API key must be provided (direct value or api_key_file)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret file '{0}' is empty")]
    EmptyFile(String),
}

/// Resolves the API key from a direct value, then from a file.
///
/// Surrounding whitespace is trimmed in both cases; a whitespace-only direct
/// value counts as absent.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
) -> Result<SecretString, SecretError> {
    if let Some(value) = direct {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Ok(SecretString::from(trimmed.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.trim().is_empty() {
            let expanded = expand_home(path.trim());
            let content = fs::read_to_string(&expanded).map_err(|e| {
                SecretError::FileReadError {
                    path: expanded.clone(),
                    source: e,
                }
            })?;
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return Err(SecretError::EmptyFile(expanded));
            }
            return Ok(SecretString::from(trimmed.to_string()));
        }
    }

    Err(SecretError::NoSourceProvided)
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    path.to_string()
}

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::loader::parse_collection_output_pairs;
use super::secrets::resolve_secret;

/// Default cap on generalist workers when the user gives none.
pub const DEFAULT_MAX_WORKERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryType {
    User,
    Group,
}

impl LibraryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryType::User => "user",
            LibraryType::Group => "group",
        }
    }

    /// Path segment used by the Zotero Web API (`users/<id>` or `groups/<id>`).
    pub fn api_prefix(&self) -> &'static str {
        match self {
            LibraryType::User => "users",
            LibraryType::Group => "groups",
        }
    }
}

impl FromStr for LibraryType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(LibraryType::User),
            "group" => Ok(LibraryType::Group),
            _ => Err(ConfigError::InvalidChoice {
                field: "library_type",
                value: s.to_string(),
                expected: "user, group",
            }),
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How embedded pictures are carried into the rendered Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageProcessing {
    Embed,
    Placeholder,
    Drop,
}

impl ImageProcessing {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageProcessing::Embed => "embed",
            ImageProcessing::Placeholder => "placeholder",
            ImageProcessing::Drop => "drop",
        }
    }
}

impl FromStr for ImageProcessing {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "embed" => Ok(ImageProcessing::Embed),
            "placeholder" => Ok(ImageProcessing::Placeholder),
            "drop" => Ok(ImageProcessing::Drop),
            _ => Err(ConfigError::InvalidChoice {
                field: "image_processing",
                value: s.to_string(),
                expected: "embed, placeholder, drop",
            }),
        }
    }
}

impl fmt::Display for ImageProcessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Naming strategy for the per-reference output folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReferenceFolderName {
    #[default]
    CitationKey,
    ItemTitle,
}

impl ReferenceFolderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceFolderName::CitationKey => "citation-key",
            ReferenceFolderName::ItemTitle => "item-title",
        }
    }
}

impl FromStr for ReferenceFolderName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "citation-key" => Ok(ReferenceFolderName::CitationKey),
            "item-title" => Ok(ReferenceFolderName::ItemTitle),
            _ => Err(ConfigError::InvalidChoice {
                field: "reference_folder_name",
                value: s.to_string(),
                expected: "citation-key, item-title",
            }),
        }
    }
}

impl fmt::Display for ReferenceFolderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// External converter process (docling CLI by default).
    #[default]
    Command,
    /// In-process text extraction, CPU only.
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub kind: EngineKind,
    pub program: String,
    pub extra_args: Vec<String>,
    pub render_timeout_secs: u64,
    pub num_threads: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            kind: EngineKind::Command,
            program: "docling".to_string(),
            extra_args: Vec::new(),
            render_timeout_secs: 600,
            num_threads: None,
        }
    }
}

/// Settings as written in a config file or assembled from CLI flags,
/// before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub api_key: Option<String>,
    pub api_key_file: Option<String>,
    pub library_id: String,
    pub library_type: String,
    pub output_dir: Option<PathBuf>,
    pub collections: Vec<String>,
    pub tags: Vec<String>,
    /// `COLLECTION_KEY=OUTPUT_DIR` pairs.
    pub collection_outputs: Vec<String>,
    pub overwrite: bool,
    pub skip_existing: bool,
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub chunk_size: usize,
    pub max_workers: Option<usize>,
    pub workers_per_gpu: usize,
    pub force_full_page_ocr: bool,
    pub do_picture_description: bool,
    pub image_resolution_scale: f32,
    pub image_processing: String,
    pub reference_folder_name: String,
    pub use_multi_gpu: bool,
    pub download_timeout_secs: u64,
    pub engine: EngineSettings,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_file: None,
            library_id: String::new(),
            library_type: "user".to_string(),
            output_dir: None,
            collections: Vec::new(),
            tags: Vec::new(),
            collection_outputs: Vec::new(),
            overwrite: false,
            skip_existing: false,
            dry_run: false,
            limit: None,
            chunk_size: 100,
            max_workers: None,
            workers_per_gpu: 1,
            force_full_page_ocr: false,
            do_picture_description: false,
            image_resolution_scale: 4.0,
            image_processing: "embed".to_string(),
            reference_folder_name: "citation-key".to_string(),
            use_multi_gpu: true,
            download_timeout_secs: 300,
            engine: EngineSettings::default(),
        }
    }
}

/// Conversion quality knobs. Part of the engine cache fingerprint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub force_full_page_ocr: bool,
    pub do_picture_description: bool,
    pub image_resolution_scale: f32,
    pub image_processing: ImageProcessing,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            force_full_page_ocr: false,
            do_picture_description: false,
            image_resolution_scale: 4.0,
            image_processing: ImageProcessing::Embed,
        }
    }
}

/// Everything one export pass needs besides the source and engine.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub overwrite: bool,
    pub skip_existing: bool,
    pub dry_run: bool,
    pub max_workers: Option<usize>,
    pub workers_per_gpu: usize,
    pub use_multi_gpu: bool,
    pub reference_folder_name: ReferenceFolderName,
    pub render: RenderSettings,
}

impl RunOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            overwrite: false,
            skip_existing: false,
            dry_run: false,
            max_workers: None,
            workers_per_gpu: 1,
            use_multi_gpu: true,
            reference_folder_name: ReferenceFolderName::default(),
            render: RenderSettings::default(),
        }
    }
}

/// Filters applied by the attachment source.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub collections: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub limit: Option<usize>,
    pub chunk_size: usize,
}

/// Validated configuration for exporting attachments to Markdown.
#[derive(Debug)]
pub struct ExportSettings {
    pub api_key: SecretString,
    pub library_id: String,
    pub library_type: LibraryType,
    pub output_dir: PathBuf,
    pub collections: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub collection_outputs: Vec<(String, PathBuf)>,
    pub overwrite: bool,
    pub skip_existing: bool,
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub chunk_size: usize,
    pub max_workers: Option<usize>,
    pub workers_per_gpu: usize,
    pub render: RenderSettings,
    pub reference_folder_name: ReferenceFolderName,
    pub use_multi_gpu: bool,
    pub download_timeout: Duration,
    pub engine: EngineSettings,
}

impl ExportSettings {
    pub fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let api_key = resolve_secret(raw.api_key.as_deref(), raw.api_key_file.as_deref())?;

        let library_id = raw.library_id.trim().to_string();
        if library_id.is_empty() {
            return Err(ConfigError::validation("Zotero library ID must be provided."));
        }

        let library_type: LibraryType = raw.library_type.parse()?;

        if raw.limit == Some(0) {
            return Err(ConfigError::validation(
                "limit must be a positive integer when provided.",
            ));
        }
        if raw.chunk_size == 0 {
            return Err(ConfigError::validation("chunk_size must be a positive integer."));
        }
        if raw.max_workers == Some(0) {
            return Err(ConfigError::validation(
                "max_workers must be positive when provided.",
            ));
        }
        if raw.workers_per_gpu == 0 {
            return Err(ConfigError::validation(
                "workers_per_gpu must be a positive integer.",
            ));
        }
        if !raw.image_resolution_scale.is_finite() || raw.image_resolution_scale <= 0.0 {
            return Err(ConfigError::validation(
                "image_resolution_scale must be a positive number.",
            ));
        }
        if raw.engine.render_timeout_secs == 0 || raw.download_timeout_secs == 0 {
            return Err(ConfigError::validation("timeouts must be positive."));
        }

        let image_processing: ImageProcessing = raw.image_processing.parse()?;
        let reference_folder_name: ReferenceFolderName = raw.reference_folder_name.parse()?;

        let output_dir = raw
            .output_dir
            .as_deref()
            .ok_or_else(|| ConfigError::validation("output_dir must be provided."))?;
        let output_dir = absolute_dir(output_dir)?;

        let collection_outputs = parse_collection_output_pairs(&raw.collection_outputs)?
            .into_iter()
            .map(|(key, dir)| absolute_dir(&dir).map(|dir| (key, dir)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            api_key,
            library_id,
            library_type,
            output_dir,
            collections: clean_set(&raw.collections),
            tags: clean_set(&raw.tags),
            collection_outputs,
            overwrite: raw.overwrite,
            skip_existing: raw.skip_existing,
            dry_run: raw.dry_run,
            limit: raw.limit,
            chunk_size: raw.chunk_size,
            max_workers: raw.max_workers,
            workers_per_gpu: raw.workers_per_gpu,
            render: RenderSettings {
                force_full_page_ocr: raw.force_full_page_ocr,
                do_picture_description: raw.do_picture_description,
                image_resolution_scale: raw.image_resolution_scale,
                image_processing,
            },
            reference_folder_name,
            use_multi_gpu: raw.use_multi_gpu,
            download_timeout: Duration::from_secs(raw.download_timeout_secs),
            engine: raw.engine,
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            output_dir: self.output_dir.clone(),
            overwrite: self.overwrite,
            skip_existing: self.skip_existing,
            dry_run: self.dry_run,
            max_workers: self.max_workers,
            workers_per_gpu: self.workers_per_gpu,
            use_multi_gpu: self.use_multi_gpu,
            reference_folder_name: self.reference_folder_name,
            render: self.render,
        }
    }

    pub fn source_filter(&self) -> SourceFilter {
        SourceFilter {
            collections: self.collections.clone(),
            tags: self.tags.clone(),
            limit: self.limit,
            chunk_size: self.chunk_size,
        }
    }

    /// Human-friendly description of active filters.
    pub fn describe_filters(&self) -> String {
        let mut parts = Vec::new();
        if !self.collections.is_empty() {
            parts.push(format!("collections={:?}", self.collections));
        }
        if !self.tags.is_empty() {
            parts.push(format!("tags={:?}", self.tags));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={}", limit));
        }
        if parts.is_empty() {
            "no filters".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Summary lines suitable for logging at the start of a run.
    pub fn to_cli_summary(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Library type: {}", self.library_type),
            format!("Library ID: {}", self.library_id),
            "Using Zotero Web API".to_string(),
            format!("Output directory: {}", self.output_dir.display()),
            format!("Reference folder name: {}", self.reference_folder_name),
            format!("Filters: {}", self.describe_filters()),
            format!("Overwrite existing files: {}", self.overwrite),
            format!("Skip existing files: {}", self.skip_existing),
            format!("Dry run: {}", self.dry_run),
            format!("Chunk size: {}", self.chunk_size),
            format!(
                "Max workers: {}",
                self.max_workers
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "auto".to_string())
            ),
            format!("Workers per GPU: {}", self.workers_per_gpu),
            format!("Force full page OCR: {}", self.render.force_full_page_ocr),
            format!("Picture description: {}", self.render.do_picture_description),
            format!("Image resolution scale: {}", self.render.image_resolution_scale),
            format!("Image processing: {}", self.render.image_processing),
            format!("Use multi GPU: {}", self.use_multi_gpu),
        ];
        for (key, dir) in &self.collection_outputs {
            lines.push(format!("Collection output: {} -> {}", key, dir.display()));
        }
        lines
    }
}

fn clean_set(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .collect()
}

/// Expands a leading `~` and makes the path absolute.
fn absolute_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };
    std::path::absolute(&expanded).map_err(|e| ConfigError::Validation {
        message: format!("Invalid output directory '{}': {}", expanded.display(), e),
    })
}

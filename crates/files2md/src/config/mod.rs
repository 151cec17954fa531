pub mod loader;
pub mod schema;
pub mod secrets;

pub use loader::{
    default_config_path, load_settings, load_settings_from_json, load_settings_from_yaml,
    parse_collection_output_pairs,
};
pub use schema::{
    EngineKind, EngineSettings, ExportSettings, ImageProcessing, LibraryType, RawSettings,
    ReferenceFolderName, RenderSettings, RunOptions, SourceFilter, DEFAULT_MAX_WORKERS,
};

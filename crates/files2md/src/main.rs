use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use files2md::config::{default_config_path, load_settings, EngineKind, RawSettings};
use files2md::logging::init_logging;
use files2md::{run_export, ExportRun, ExportSettings};

#[derive(Parser, Debug)]
#[command(
    name = "files2md",
    version,
    about = "Export Zotero file attachments to Markdown"
)]
struct Args {
    /// Directory that receives the Markdown files.
    output_dir: Option<PathBuf>,

    /// YAML or JSON settings file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "ZOTERO_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// File holding the API key (Docker secrets style).
    #[arg(long)]
    api_key_file: Option<String>,

    #[arg(long, env = "ZOTERO_LIBRARY_ID")]
    library_id: Option<String>,

    /// Library type: user or group.
    #[arg(long)]
    library_type: Option<String>,

    /// Only export attachments in this collection (repeatable).
    #[arg(short = 'c', long = "collection")]
    collections: Vec<String>,

    /// Only export attachments carrying this tag (repeatable).
    #[arg(short = 't', long = "tag")]
    tags: Vec<String>,

    /// Export one collection into its own directory: COLLECTION_KEY=OUTPUT_DIR (repeatable).
    #[arg(long = "collection-output")]
    collection_outputs: Vec<String>,

    #[arg(long)]
    limit: Option<usize>,

    /// Items requested per API page.
    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long)]
    max_workers: Option<usize>,

    #[arg(long)]
    workers_per_gpu: Option<usize>,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    skip_existing: bool,

    #[arg(long)]
    dry_run: bool,

    /// Extra argument passed to the conversion command (repeatable).
    #[arg(short = 'o', long = "option", alias = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    #[arg(long, value_enum)]
    engine: Option<EngineChoice>,

    /// Conversion command to run for the command engine.
    #[arg(long)]
    engine_program: Option<String>,

    #[arg(long)]
    force_full_page_ocr: bool,

    #[arg(long)]
    do_picture_description: bool,

    #[arg(long)]
    image_resolution_scale: Option<f32>,

    /// embed, placeholder or drop.
    #[arg(long)]
    image_processing: Option<String>,

    /// citation-key or item-title.
    #[arg(long)]
    reference_folder_name: Option<String>,

    #[arg(long, overrides_with = "no_use_multi_gpu")]
    use_multi_gpu: bool,

    #[arg(long)]
    no_use_multi_gpu: bool,

    /// critical, error, warning, info or debug. RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EngineChoice {
    Command,
    Native,
}

impl From<EngineChoice> for EngineKind {
    fn from(choice: EngineChoice) -> Self {
        match choice {
            EngineChoice::Command => EngineKind::Command,
            EngineChoice::Native => EngineKind::Native,
        }
    }
}

impl Args {
    /// Layers the flags that were given on top of file settings.
    fn apply(self, raw: &mut RawSettings) {
        if let Some(dir) = self.output_dir {
            raw.output_dir = Some(dir);
        }
        if self.api_key.is_some() {
            raw.api_key = self.api_key;
        }
        if self.api_key_file.is_some() {
            raw.api_key_file = self.api_key_file;
        }
        if let Some(id) = self.library_id {
            raw.library_id = id;
        }
        if let Some(kind) = self.library_type {
            raw.library_type = kind;
        }
        if !self.collections.is_empty() {
            raw.collections = self.collections;
        }
        if !self.tags.is_empty() {
            raw.tags = self.tags;
        }
        if !self.collection_outputs.is_empty() {
            raw.collection_outputs = self.collection_outputs;
        }
        if self.limit.is_some() {
            raw.limit = self.limit;
        }
        if let Some(size) = self.chunk_size {
            raw.chunk_size = size;
        }
        if self.max_workers.is_some() {
            raw.max_workers = self.max_workers;
        }
        if let Some(per_gpu) = self.workers_per_gpu {
            raw.workers_per_gpu = per_gpu;
        }
        raw.overwrite |= self.overwrite;
        raw.skip_existing |= self.skip_existing;
        raw.dry_run |= self.dry_run;
        raw.force_full_page_ocr |= self.force_full_page_ocr;
        raw.do_picture_description |= self.do_picture_description;
        if let Some(scale) = self.image_resolution_scale {
            raw.image_resolution_scale = scale;
        }
        if let Some(mode) = self.image_processing {
            raw.image_processing = mode;
        }
        if let Some(name) = self.reference_folder_name {
            raw.reference_folder_name = name;
        }
        if self.no_use_multi_gpu {
            raw.use_multi_gpu = false;
        } else if self.use_multi_gpu {
            raw.use_multi_gpu = true;
        }
        if let Some(engine) = self.engine {
            raw.engine.kind = engine.into();
        }
        if let Some(program) = self.engine_program {
            raw.engine.program = program;
        }
        raw.engine.extra_args.extend(self.engine_args);
    }
}

fn load_raw_settings(explicit: Option<&PathBuf>) -> Result<RawSettings> {
    if let Some(path) = explicit {
        return load_settings(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }
    match default_config_path() {
        Some(path) if path.exists() => load_settings(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        _ => Ok(RawSettings::default()),
    }
}

fn print_run(run: &ExportRun) {
    if let Some(collection) = &run.collection {
        println!(
            "\nCollection {} -> {}",
            collection,
            run.output_dir.display()
        );
    }
    println!("{}", run.summary);
    if !run.summary.output_paths.is_empty() {
        println!("\nOutput files:");
        for path in &run.summary.output_paths {
            println!("  {}", path.display());
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut raw = load_raw_settings(args.config.as_ref())?;
    args.apply(&mut raw);
    let settings = ExportSettings::from_raw(raw).context("Invalid settings")?;

    info!("Starting files2md v{}", env!("CARGO_PKG_VERSION"));
    for line in settings.to_cli_summary() {
        info!("{}", line);
    }

    let runs = run_export(&settings).context("Export failed")?;
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

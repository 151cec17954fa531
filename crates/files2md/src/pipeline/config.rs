use std::path::PathBuf;

use crate::config::{RenderSettings, RunOptions};

pub struct PipelineConfig {
    pub scratch_directory: PathBuf,
    pub overwrite: bool,
    pub dry_run: bool,
    pub render: RenderSettings,
}

impl PipelineConfig {
    pub fn from_options(options: &RunOptions, scratch_directory: PathBuf) -> Self {
        Self {
            scratch_directory,
            overwrite: options.overwrite,
            dry_run: options.dry_run,
            render: options.render,
        }
    }
}

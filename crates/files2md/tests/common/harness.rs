//! Isolated export runs over fakes.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use files2md::config::{RunOptions, SourceFilter};
use files2md::pipeline::NoopProgress;
use files2md::summary::RunSummary;
use files2md::topology::AcceleratorTopology;
use files2md::Exporter;

use super::fakes::{MemoryFetcher, MemorySource, ScriptedEngineFactory};

/// Temp output directory plus the fakes one export pass runs against.
pub struct TestHarness {
    temp_dir: TempDir,
    pub output_dir: PathBuf,
    pub fetcher: Arc<MemoryFetcher>,
    pub factory: Arc<ScriptedEngineFactory>,
    pub accelerators: usize,
}

impl TestHarness {
    pub fn new(factory: ScriptedEngineFactory) -> Self {
        Self::with_fetcher(factory, MemoryFetcher::new())
    }

    pub fn with_fetcher(factory: ScriptedEngineFactory, fetcher: MemoryFetcher) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let output_dir = temp_dir.path().join("output");
        Self {
            temp_dir,
            output_dir,
            fetcher: Arc::new(fetcher),
            factory: Arc::new(factory),
            accelerators: 0,
        }
    }

    pub fn with_accelerators(mut self, count: usize) -> Self {
        self.accelerators = count;
        self
    }

    pub fn options(&self) -> RunOptions {
        RunOptions::new(&self.output_dir)
    }

    pub fn filter(&self) -> SourceFilter {
        SourceFilter {
            chunk_size: 100,
            ..SourceFilter::default()
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Runs one export pass and panics on run-level errors.
    pub fn run(&self, source: &MemorySource, options: &RunOptions) -> RunSummary {
        let exporter = Exporter::new(
            Arc::clone(&self.fetcher) as _,
            Arc::clone(&self.factory) as _,
            AcceleratorTopology::with_count(self.accelerators),
            Arc::new(NoopProgress),
        );
        exporter
            .run(source, &self.filter(), options)
            .expect("export pass failed")
    }

    /// Every regular file below the output directory, relative to it.
    pub fn output_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(&self.output_dir, &self.output_dir, &mut files);
        files.sort();
        files
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files);
        } else if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};

use crate::engine::RenderOptions;
use crate::error::{RenderError, SourceError, StorageError};
use crate::model::{PipelineOutcome, SkipReason};
use crate::source::AttachmentFetcher;
use crate::storage::{scratch_path, OutputStorage};
use crate::worker::job::WorkItem;

use super::config::PipelineConfig;
use super::context::WorkerContext;
use super::progress::{PipelinePhase, ProgressEvent, ProgressReporter};
use super::recovery::is_resource_exhausted;

/// Per-item download, conversion and write.
///
/// Shared by every worker; per-worker state lives in [`WorkerContext`].
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn AttachmentFetcher>,
    storage: OutputStorage,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, fetcher: Arc<dyn AttachmentFetcher>) -> Self {
        let storage = OutputStorage::new(config.overwrite);
        Self {
            config,
            fetcher,
            storage,
        }
    }

    /// Runs one item to a terminal outcome. Never fails: every error becomes a
    /// `skipped` outcome with its cause logged.
    pub fn run(
        &self,
        work: &WorkItem,
        worker: &mut WorkerContext,
        progress: &dyn ProgressReporter,
    ) -> PipelineOutcome {
        let item = &work.item;
        let _pipeline_span = info_span!("pipeline",
            key = %item.key,
            worker = worker.worker_id,
            device = %worker.device,
        )
        .entered();

        let phase = |phase: PipelinePhase| {
            progress.report(ProgressEvent::Phase {
                key: item.key.clone(),
                worker_id: worker.worker_id,
                phase,
            });
        };

        phase(PipelinePhase::Pending);

        let outcome = if self.config.dry_run {
            PipelineOutcome::dry_run(item, work.output_path.clone())
        } else {
            self.process(work, worker, progress)
        };

        progress.report(ProgressEvent::Finished {
            key: item.key.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    fn process(
        &self,
        work: &WorkItem,
        worker: &mut WorkerContext,
        progress: &dyn ProgressReporter,
    ) -> PipelineOutcome {
        let item = &work.item;
        let skipped = |reason| PipelineOutcome::skipped(item, work.output_path.clone(), reason);

        // Step 1: Download
        let local_path = {
            let _step = info_span!("download").entered();
            match self.step_download(work) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Failed to download attachment {}: {}", item.label(), e);
                    return skipped(SkipReason::DownloadFailed);
                }
            }
        };
        progress.report(ProgressEvent::Phase {
            key: item.key.clone(),
            worker_id: worker.worker_id,
            phase: PipelinePhase::Downloaded,
        });

        // Step 2: Render, with one CPU retry on accelerator memory exhaustion
        let rendered = {
            let _step = info_span!("render").entered();
            self.step_render(work, &local_path, worker, progress)
        };
        if let Err(e) = std::fs::remove_file(&local_path) {
            debug!("Failed to remove scratch file {}: {}", local_path.display(), e);
        }
        let markdown = match rendered {
            Ok(markdown) => markdown,
            Err(reason) => return skipped(reason),
        };

        // Step 3: Write
        progress.report(ProgressEvent::Phase {
            key: item.key.clone(),
            worker_id: worker.worker_id,
            phase: PipelinePhase::Done,
        });
        let _step = info_span!("write").entered();
        match self.step_write(&work.output_path, &markdown) {
            Ok(()) => PipelineOutcome::converted(item, work.output_path.clone()),
            Err(reason) => skipped(reason),
        }
    }

    fn step_download(&self, work: &WorkItem) -> Result<PathBuf, SourceError> {
        let destination = scratch_path(&self.config.scratch_directory, work.index, &work.item);
        self.fetcher.fetch(&work.item, &destination)?;
        debug!("Downloaded {} to {}", work.item.key, destination.display());
        Ok(destination)
    }

    fn step_render(
        &self,
        work: &WorkItem,
        local_path: &Path,
        worker: &mut WorkerContext,
        progress: &dyn ProgressReporter,
    ) -> Result<String, SkipReason> {
        let item = &work.item;
        let options = RenderOptions::new(worker.device, self.config.render);
        progress.report(ProgressEvent::Phase {
            key: item.key.clone(),
            worker_id: worker.worker_id,
            phase: PipelinePhase::Rendering,
        });

        let error = match worker.engine.render(local_path, &options) {
            Ok(markdown) => return Ok(markdown),
            Err(e) => e,
        };

        if !(options.device.is_accelerated() && is_resource_exhausted(&error)) {
            error!("Failed to convert {}: {}", item.label(), error);
            return Err(SkipReason::RenderFailed);
        }

        warn!(
            "Accelerator memory exhausted on {} while converting {}, retrying on CPU",
            options.device,
            item.label()
        );
        progress.report(ProgressEvent::Phase {
            key: item.key.clone(),
            worker_id: worker.worker_id,
            phase: PipelinePhase::Recovering,
        });
        worker.engine.release();

        let _recovery = info_span!("recover_on_cpu").entered();
        worker
            .engine
            .render(local_path, &options.on_cpu())
            .map_err(|e: RenderError| {
                error!("CPU retry failed for {}: {}", item.label(), e);
                SkipReason::OutOfMemory
            })
    }

    fn step_write(&self, output_path: &Path, markdown: &str) -> Result<(), SkipReason> {
        if !self.config.overwrite && self.storage.exists(output_path) {
            info!("Skipping existing file {}", output_path.display());
            return Err(SkipReason::ExistingOutput);
        }

        match self.storage.write_markdown(output_path, markdown) {
            Ok(()) => Ok(()),
            Err(StorageError::FileExists(path)) => {
                info!("Skipping existing file {}", path.display());
                Err(SkipReason::ExistingOutput)
            }
            Err(e) => {
                error!("Failed to write {}: {}", output_path.display(), e);
                Err(SkipReason::WriteFailed)
            }
        }
    }
}

//! Run orchestration: list, filter, plan, dispatch, summarize.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, info_span};

use crate::config::{ExportSettings, RunOptions, SourceFilter};
use crate::dedup::{self, FilterResult};
use crate::engine::{self, Device, EngineFactory};
use crate::error::Result;
use crate::model::AttachmentItem;
use crate::pipeline::{LogProgress, Pipeline, PipelineConfig, ProgressEvent, ProgressReporter};
use crate::source::{AttachmentFetcher, AttachmentSource, ZoteroClient};
use crate::storage::ScratchSpace;
use crate::summary::{summarize, RunSummary};
use crate::topology::{self, AcceleratorTopology, NvidiaSmiProbe};
use crate::worker::{WorkerPool, WorkerPoolPlan};

/// Result of one export pass.
#[derive(Debug, Clone)]
pub struct ExportRun {
    /// Collection the pass was restricted to, when run from a collection mapping.
    pub collection: Option<String>,
    pub output_dir: PathBuf,
    pub summary: RunSummary,
}

/// Drives export passes over a source with a fixed fetcher, engine and topology.
pub struct Exporter {
    fetcher: Arc<dyn AttachmentFetcher>,
    factory: Arc<dyn EngineFactory>,
    topology: AcceleratorTopology,
    progress: Arc<dyn ProgressReporter>,
}

impl Exporter {
    pub fn new(
        fetcher: Arc<dyn AttachmentFetcher>,
        factory: Arc<dyn EngineFactory>,
        topology: AcceleratorTopology,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            fetcher,
            factory,
            topology,
            progress,
        }
    }

    /// Runs every pass the settings ask for.
    ///
    /// With collection outputs configured, runs one pass per mapping, each
    /// restricted to its collection and written to its own directory.
    /// Otherwise runs a single pass with the configured filters.
    pub fn run_settings(
        &self,
        source: &dyn AttachmentSource,
        settings: &ExportSettings,
    ) -> Result<Vec<ExportRun>> {
        let base_filter = settings.source_filter();
        let base_options = settings.run_options();

        if settings.collection_outputs.is_empty() {
            let summary = self.run(source, &base_filter, &base_options)?;
            return Ok(vec![ExportRun {
                collection: None,
                output_dir: base_options.output_dir,
                summary,
            }]);
        }

        let mut runs = Vec::with_capacity(settings.collection_outputs.len());
        for (collection, output_dir) in &settings.collection_outputs {
            info!(
                "Exporting collection {} to {}",
                collection,
                output_dir.display()
            );
            let filter = SourceFilter {
                collections: [collection.clone()].into_iter().collect(),
                ..base_filter.clone()
            };
            let options = RunOptions {
                output_dir: output_dir.clone(),
                ..base_options.clone()
            };

            let summary = self.run(source, &filter, &options)?;
            runs.push(ExportRun {
                collection: Some(collection.clone()),
                output_dir: output_dir.clone(),
                summary,
            });
        }
        Ok(runs)
    }

    /// One export pass.
    ///
    /// Only listing, scratch setup and pool failures are run-level errors.
    /// Every per-item failure is folded into the summary as a skip.
    pub fn run(
        &self,
        source: &dyn AttachmentSource,
        filter: &SourceFilter,
        options: &RunOptions,
    ) -> Result<RunSummary> {
        let _span = info_span!("export", output = %options.output_dir.display()).entered();

        let items = source
            .attachments(filter)
            .collect::<std::result::Result<Vec<AttachmentItem>, _>>()?;
        if items.is_empty() {
            info!("No attachments matched the requested filters.");
            return Ok(summarize(Vec::new()));
        }
        info!("Found {} attachment(s) to process.", items.len());

        let FilterResult { accepted, skipped } = dedup::filter(items, options);
        for outcome in &skipped {
            self.progress.report(ProgressEvent::Finished {
                key: outcome.source.to_string_lossy().to_string(),
                outcome: outcome.clone(),
            });
        }
        if accepted.is_empty() {
            return Ok(summarize(skipped));
        }

        let plan = WorkerPoolPlan::compute(
            accepted.len(),
            options.max_workers,
            self.topology.count(),
            options.workers_per_gpu,
            options.use_multi_gpu,
        );

        // Held until the pool has finished; dropping it removes the directory.
        // A dry run never downloads, so it gets none.
        let scratch = if options.dry_run {
            None
        } else {
            Some(ScratchSpace::new()?)
        };
        let scratch_directory = scratch
            .as_ref()
            .map(|space| space.path().to_path_buf())
            .unwrap_or_default();
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig::from_options(options, scratch_directory),
            Arc::clone(&self.fetcher),
        ));

        let mut pool = WorkerPool::start(
            plan,
            pipeline,
            Arc::clone(&self.factory),
            Arc::clone(&self.progress),
            self.generalist_device(),
        )?;
        for work in accepted {
            pool.submit(work)?;
        }
        let outcomes = pool.finish()?;
        drop(scratch);

        Ok(summarize(skipped.into_iter().chain(outcomes)))
    }

    /// Device for workers that are not pinned to an accelerator.
    fn generalist_device(&self) -> Device {
        if self.topology.is_empty() {
            Device::Cpu
        } else {
            Device::Auto
        }
    }
}

/// Exports from the Zotero library described by `settings`.
///
/// Detects accelerators once and shares the client between listing and
/// downloads.
pub fn run_export(settings: &ExportSettings) -> Result<Vec<ExportRun>> {
    let client = Arc::new(ZoteroClient::new(settings)?);
    let topology = topology::detect(&NvidiaSmiProbe::new());
    let factory = engine::factory_from_settings(&settings.engine, &topology);

    let exporter = Exporter::new(
        Arc::clone(&client) as Arc<dyn AttachmentFetcher>,
        factory,
        topology,
        Arc::new(LogProgress),
    );
    exporter.run_settings(client.as_ref(), settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawSettings;
    use crate::error::{ExportError, SourceError};
    use crate::model::{OutcomeStatus, SkipReason};
    use crate::pipeline::NoopProgress;
    use crate::source::AttachmentStream;
    use crate::test_support::{attachment, FakeEngineFactory, FakeFetcher, RecordingProgress, VecSource};
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use std::path::Path;

    fn exporter(fetcher: FakeFetcher, factory: FakeEngineFactory) -> Exporter {
        Exporter::new(
            Arc::new(fetcher),
            Arc::new(factory),
            AcceleratorTopology::none(),
            Arc::new(NoopProgress),
        )
    }

    fn filter() -> SourceFilter {
        SourceFilter {
            chunk_size: 100,
            ..SourceFilter::default()
        }
    }

    struct FailingSource;

    impl AttachmentSource for FailingSource {
        fn attachments(&self, _filter: &SourceFilter) -> AttachmentStream<'_> {
            Box::new(std::iter::once(Err(SourceError::Status {
                url: "http://zotero.test/items".to_string(),
                status: 403,
            })))
        }
    }

    #[test]
    fn test_empty_source_returns_empty_summary() {
        let temp = TempDir::new().unwrap();
        let exporter = exporter(FakeFetcher::with_files(&[]), FakeEngineFactory::echo());

        let summary = exporter
            .run(&VecSource(Vec::new()), &filter(), &RunOptions::new(temp.path()))
            .unwrap();
        assert_eq!(summary, RunSummary::empty());
    }

    #[test]
    fn test_listing_error_is_run_level() {
        let temp = TempDir::new().unwrap();
        let exporter = exporter(FakeFetcher::with_files(&[]), FakeEngineFactory::echo());

        let result = exporter.run(&FailingSource, &filter(), &RunOptions::new(temp.path()));
        assert!(matches!(result, Err(ExportError::Source(SourceError::Status { status: 403, .. }))));
    }

    #[test]
    fn test_converts_and_reports_duplicates() {
        let temp = TempDir::new().unwrap();
        let fetcher = FakeFetcher::with_files(&[("A", "alpha"), ("B", "beta"), ("C", "gamma")]);
        let fetched = fetcher.fetched();
        let exporter = exporter(fetcher, FakeEngineFactory::echo());
        let source = VecSource(vec![
            attachment("A", "Paper", "ref"),
            attachment("B", "Paper", "ref"),
            attachment("C", "Other", "ref"),
        ]);

        let summary = exporter
            .run(&source, &filter(), &RunOptions::new(temp.path()))
            .unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.converted, 2);
        assert_eq!(summary.skipped, 1);
        assert!(summary.is_complete());
        temp.child("ref/Paper.md").assert("alpha");
        temp.child("ref/Other.md").assert("gamma");

        let mut fetched = fetched.lock().unwrap().clone();
        fetched.sort();
        assert_eq!(fetched, vec!["A", "C"]);
    }

    #[test]
    fn test_policy_skips_reach_progress() {
        let temp = TempDir::new().unwrap();
        let progress = Arc::new(RecordingProgress::default());
        let exporter = Exporter::new(
            Arc::new(FakeFetcher::with_files(&[("A", "alpha")])),
            Arc::new(FakeEngineFactory::echo()),
            AcceleratorTopology::none(),
            Arc::clone(&progress) as Arc<dyn ProgressReporter>,
        );
        let source = VecSource(vec![
            attachment("A", "Paper", "ref"),
            attachment("B", "Paper", "ref"),
        ]);

        exporter
            .run(&source, &filter(), &RunOptions::new(temp.path()))
            .unwrap();

        let finished = progress.finished();
        assert_eq!(finished.len(), 2);
        assert!(finished
            .iter()
            .any(|o| o.skip_reason == Some(SkipReason::DuplicatePath)));
        assert!(finished.iter().any(|o| o.status == OutcomeStatus::Converted));
    }

    #[test]
    fn test_generalist_device_follows_topology() {
        let none = exporter(FakeFetcher::with_files(&[]), FakeEngineFactory::echo());
        assert_eq!(none.generalist_device(), Device::Cpu);

        let with_gpu = Exporter::new(
            Arc::new(FakeFetcher::with_files(&[])),
            Arc::new(FakeEngineFactory::echo()),
            AcceleratorTopology::with_count(1),
            Arc::new(NoopProgress),
        );
        assert_eq!(with_gpu.generalist_device(), Device::Auto);
    }

    fn settings(output: &Path, collection_outputs: Vec<String>) -> ExportSettings {
        ExportSettings::from_raw(RawSettings {
            api_key: Some("secret".to_string()),
            library_id: "123".to_string(),
            output_dir: Some(output.to_path_buf()),
            collection_outputs,
            ..RawSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_single_pass_without_collection_outputs() {
        let temp = TempDir::new().unwrap();
        let exporter = exporter(
            FakeFetcher::with_files(&[("A", "alpha")]),
            FakeEngineFactory::echo(),
        );

        let runs = exporter
            .run_settings(
                &VecSource(vec![attachment("A", "Paper", "ref")]),
                &settings(temp.path(), Vec::new()),
            )
            .unwrap();

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].collection, None);
        assert_eq!(runs[0].summary.converted, 1);
    }

    /// Yields only items whose collections intersect the filter.
    struct CollectionSource(Vec<AttachmentItem>);

    impl AttachmentSource for CollectionSource {
        fn attachments(&self, filter: &SourceFilter) -> AttachmentStream<'_> {
            let wanted = filter.collections.clone();
            Box::new(
                self.0
                    .iter()
                    .filter(move |item| {
                        wanted.is_empty() || !item.collections.is_disjoint(&wanted)
                    })
                    .cloned()
                    .map(Ok::<_, SourceError>),
            )
        }
    }

    #[test]
    fn test_collection_outputs_run_one_pass_each() {
        let temp = TempDir::new().unwrap();
        let papers = temp.child("papers");
        let books = temp.child("books");
        let mapping = vec![
            format!("PAPERS={}", papers.path().display()),
            format!("BOOKS={}", books.path().display()),
        ];

        let mut a = attachment("A", "Paper", "ref");
        a.collections.insert("PAPERS".to_string());
        let mut b = attachment("B", "Book", "ref");
        b.collections.insert("BOOKS".to_string());

        let exporter = exporter(
            FakeFetcher::with_files(&[("A", "alpha"), ("B", "beta")]),
            FakeEngineFactory::echo(),
        );
        let runs = exporter
            .run_settings(
                &CollectionSource(vec![a, b]),
                &settings(&temp.path().join("main"), mapping),
            )
            .unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].collection.as_deref(), Some("PAPERS"));
        assert_eq!(runs[0].summary.converted, 1);
        assert_eq!(runs[1].collection.as_deref(), Some("BOOKS"));
        assert_eq!(runs[1].summary.converted, 1);
        papers.child("ref/Paper.md").assert("alpha");
        books.child("ref/Book.md").assert("beta");
        assert!(!temp.path().join("main").exists());
    }
}

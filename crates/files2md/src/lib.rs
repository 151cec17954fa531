pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod export;
pub mod logging;
pub mod model;
pub mod naming;
pub mod pipeline;
pub mod source;
pub mod storage;
pub mod summary;
pub mod topology;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::{load_settings, ExportSettings, RawSettings, RunOptions, SourceFilter};
pub use engine::{ConversionEngine, Device, EngineFactory, RenderOptions};
pub use error::{
    ConfigError, ExportError, LoggingError, ProbeError, RenderError, Result, SourceError,
    StorageError, WorkerError,
};
pub use export::{run_export, ExportRun, Exporter};
pub use model::{AttachmentItem, OutcomeStatus, PipelineOutcome, SkipReason};
pub use pipeline::{is_resource_exhausted, Pipeline, PipelineConfig, ProgressReporter};
pub use source::{AttachmentFetcher, AttachmentSource, ZoteroClient};
pub use summary::RunSummary;
pub use topology::AcceleratorTopology;
pub use worker::{WorkerPool, WorkerPoolPlan};

pub mod config;
pub mod context;
pub mod progress;
pub mod recovery;
pub mod runner;

pub use config::PipelineConfig;
pub use context::WorkerContext;
pub use progress::{LogProgress, NoopProgress, PipelinePhase, ProgressEvent, ProgressReporter};
pub use recovery::is_resource_exhausted;
pub use runner::Pipeline;

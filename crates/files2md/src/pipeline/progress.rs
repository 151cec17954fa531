use std::fmt;

use tracing::{debug, info, warn};

use crate::model::{OutcomeStatus, PipelineOutcome};

/// States an item passes through inside a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Pending,
    Downloaded,
    Rendering,
    Recovering,
    Done,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelinePhase::Pending => "pending",
            PipelinePhase::Downloaded => "downloaded",
            PipelinePhase::Rendering => "rendering",
            PipelinePhase::Recovering => "recovering",
            PipelinePhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Events emitted by the pipeline while processing one item.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Phase {
        key: String,
        worker_id: usize,
        phase: PipelinePhase,
    },
    Finished {
        key: String,
        outcome: PipelineOutcome,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and library callers without a UI.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Reports item progress through the log.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase {
                key,
                worker_id,
                phase,
            } => {
                debug!("[worker {}] {} -> {}", worker_id, key, phase);
            }
            ProgressEvent::Finished { key, outcome } => match outcome.status {
                OutcomeStatus::Converted => {
                    info!("Converted {} -> {}", key, outcome.output.display());
                }
                OutcomeStatus::DryRun => {
                    info!("[dry-run] Would export {} -> {}", key, outcome.output.display());
                }
                OutcomeStatus::Skipped => {
                    let reason = outcome
                        .skip_reason
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    warn!("Skipped {} ({})", key, reason);
                }
            },
        }
    }
}

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::model::{OutcomeStatus, PipelineOutcome};

/// Aggregate counts for one export pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub converted: usize,
    pub skipped: usize,
    pub dry_run: usize,
    /// Output path of every processed item, in no particular order.
    pub output_paths: Vec<PathBuf>,
}

impl RunSummary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether every processed item is accounted for by exactly one status.
    pub fn is_complete(&self) -> bool {
        self.processed == self.converted + self.skipped + self.dry_run
            && self.processed == self.output_paths.len()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Export summary:")?;
        writeln!(f, "  Processed attachments: {}", self.processed)?;
        writeln!(f, "  Converted:            {}", self.converted)?;
        writeln!(f, "  Skipped:              {}", self.skipped)?;
        write!(f, "  Dry-run:              {}", self.dry_run)
    }
}

/// Reduces per-item outcomes into a summary.
pub fn summarize<I>(outcomes: I) -> RunSummary
where
    I: IntoIterator<Item = PipelineOutcome>,
{
    let mut summary = RunSummary::empty();
    for outcome in outcomes {
        summary.processed += 1;
        match outcome.status {
            OutcomeStatus::Converted => summary.converted += 1,
            OutcomeStatus::Skipped => summary.skipped += 1,
            OutcomeStatus::DryRun => summary.dry_run += 1,
        }
        summary.output_paths.push(outcome.output);
    }

    info!(
        "Export complete: processed={} converted={} skipped={} dry-run={}",
        summary.processed, summary.converted, summary.skipped, summary.dry_run
    );
    summary
}

//! Work-set construction.
//!
//! Runs single-threaded before any worker starts. Guarantees that at most one
//! accepted item targets any output path, so workers never race on writes.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::info;

use crate::config::RunOptions;
use crate::model::{AttachmentItem, PipelineOutcome, SkipReason};
use crate::naming;
use crate::worker::WorkItem;

/// Items to hand to workers plus outcomes already decided by policy.
#[derive(Debug, Default)]
pub struct FilterResult {
    pub accepted: Vec<WorkItem>,
    pub skipped: Vec<PipelineOutcome>,
}

/// Splits `items` into the accepted work set and policy skips, in source order.
///
/// A path already claimed by an earlier item is a duplicate. Duplicates are
/// detected before the existing-output check, so a duplicate of an existing
/// file is reported as a duplicate.
pub fn filter(items: Vec<AttachmentItem>, options: &RunOptions) -> FilterResult {
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut result = FilterResult::default();

    for item in items {
        let output_path =
            naming::resolve_in(&options.output_dir, &item, options.reference_folder_name);

        if claimed.contains(&output_path) {
            info!(
                "Skipping duplicate output path for attachment {}: {}",
                item.key,
                output_path.display()
            );
            result.skipped.push(PipelineOutcome::skipped(
                &item,
                output_path,
                SkipReason::DuplicatePath,
            ));
            continue;
        }

        if options.skip_existing && output_path.exists() {
            info!("Skipping existing file (skip_existing): {}", output_path.display());
            result.skipped.push(PipelineOutcome::skipped(
                &item,
                output_path,
                SkipReason::ExistingOutput,
            ));
            continue;
        }

        claimed.insert(output_path.clone());
        let index = result.accepted.len();
        result.accepted.push(WorkItem::new(index, item, output_path));
    }

    result
}

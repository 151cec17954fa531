use std::path::PathBuf;

use crate::model::AttachmentItem;

/// An accepted item travelling to a worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Position in the accepted work set; drives accelerator routing.
    pub index: usize,
    pub item: AttachmentItem,
    /// Absolute output path claimed by the dedup filter.
    pub output_path: PathBuf,
}

impl WorkItem {
    pub fn new(index: usize, item: AttachmentItem, output_path: PathBuf) -> Self {
        Self {
            index,
            item,
            output_path,
        }
    }
}

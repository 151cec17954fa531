pub mod zotero;

use std::path::Path;

use crate::config::SourceFilter;
use crate::error::SourceError;
use crate::model::AttachmentItem;

pub use zotero::ZoteroClient;

/// Lazily produced, finite sequence of attachments.
pub type AttachmentStream<'a> = Box<dyn Iterator<Item = Result<AttachmentItem, SourceError>> + 'a>;

/// Lists downloadable attachments, honouring the filter.
///
/// Listing happens on the orchestrating thread before any worker starts, so
/// implementations need not be thread-safe.
pub trait AttachmentSource {
    fn attachments(&self, filter: &SourceFilter) -> AttachmentStream<'_>;
}

/// Retrieves attachment bytes. Called concurrently from every worker.
pub trait AttachmentFetcher: Send + Sync {
    fn fetch(&self, item: &AttachmentItem, destination: &Path) -> Result<(), SourceError>;
}

//! Attachment metadata and per-item outcomes.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing one remote file attachment.
///
/// Produced by an [`AttachmentSource`](crate::source::AttachmentSource) and
/// treated as read-only by everything downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentItem {
    /// Stable attachment key in the remote library.
    pub key: String,
    pub title: Option<String>,
    pub parent_key: Option<String>,
    pub parent_title: Option<String>,
    pub parent_citation_key: Option<String>,
    /// Original filename of the stored attachment.
    pub filename: Option<String>,
    /// MIME type recorded by the remote library.
    pub content_type: Option<String>,
    pub collections: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub date_added: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
}

impl AttachmentItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Human-friendly label combining parent and attachment titles.
    pub fn label(&self) -> String {
        match (self.parent_title.as_deref(), self.title.as_deref()) {
            (Some(parent), Some(title)) => {
                if parent.trim().to_lowercase() == title.trim().to_lowercase() {
                    parent.to_string()
                } else {
                    format!("{} – {}", parent, title)
                }
            }
            (_, Some(title)) => title.to_string(),
            (Some(parent), None) => parent.to_string(),
            (None, None) => self.key.clone(),
        }
    }

    /// Reference to the originating file, used to tag outcomes.
    pub fn source_reference(&self) -> PathBuf {
        PathBuf::from(self.filename.as_deref().unwrap_or(&self.key))
    }

    /// Extension of the original file including the leading dot, if known.
    pub fn file_extension(&self) -> Option<String> {
        let from_name = self
            .filename
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(|ext| ext.to_string());

        from_name
            .or_else(|| self.content_type.as_deref().and_then(extension_for_mime))
            .map(|ext| format!(".{}", ext))
    }
}

/// Extension for a MIME type. Common attachment types map to their usual
/// extension; anything else takes the first one mime_guess knows.
fn extension_for_mime(content_type: &str) -> Option<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let preferred = match essence.as_str() {
        "text/plain" => Some("txt"),
        "text/html" => Some("html"),
        "text/markdown" => Some("md"),
        "application/pdf" => Some("pdf"),
        _ => None,
    };
    preferred.map(str::to_string).or_else(|| {
        mime_guess::get_mime_extensions_str(&essence)
            .and_then(|exts| exts.first())
            .map(|ext| ext.to_string())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Converted,
    Skipped,
    DryRun,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Converted => write!(f, "converted"),
            OutcomeStatus::Skipped => write!(f, "skipped"),
            OutcomeStatus::DryRun => write!(f, "dry-run"),
        }
    }
}

/// Why an item ended up `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    DuplicatePath,
    ExistingOutput,
    DownloadFailed,
    RenderFailed,
    OutOfMemory,
    WriteFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::DuplicatePath => "duplicate output path",
            SkipReason::ExistingOutput => "output already exists",
            SkipReason::DownloadFailed => "download failed",
            SkipReason::RenderFailed => "conversion failed",
            SkipReason::OutOfMemory => "accelerator memory exhausted",
            SkipReason::WriteFailed => "write failed",
        };
        f.write_str(text)
    }
}

/// Terminal result of one item, consumed by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub source: PathBuf,
    pub output: PathBuf,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl PipelineOutcome {
    pub fn converted(item: &AttachmentItem, output: PathBuf) -> Self {
        Self {
            source: item.source_reference(),
            output,
            status: OutcomeStatus::Converted,
            skip_reason: None,
        }
    }

    pub fn dry_run(item: &AttachmentItem, output: PathBuf) -> Self {
        Self {
            source: item.source_reference(),
            output,
            status: OutcomeStatus::DryRun,
            skip_reason: None,
        }
    }

    pub fn skipped(item: &AttachmentItem, output: PathBuf, reason: SkipReason) -> Self {
        Self {
            source: item.source_reference(),
            output,
            status: OutcomeStatus::Skipped,
            skip_reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_combines_distinct_titles() {
        let mut item = AttachmentItem::new("ABC");
        item.parent_title = Some("Paper".to_string());
        item.title = Some("Full Text PDF".to_string());
        assert_eq!(item.label(), "Paper – Full Text PDF");
    }

    #[test]
    fn test_label_collapses_equal_titles() {
        let mut item = AttachmentItem::new("ABC");
        item.parent_title = Some("Same Title".to_string());
        item.title = Some(" same title ".to_string());
        assert_eq!(item.label(), "Same Title");
    }

    #[test]
    fn test_label_falls_back_to_key() {
        assert_eq!(AttachmentItem::new("ABC").label(), "ABC");
    }

    #[test]
    fn test_source_reference_prefers_filename() {
        let mut item = AttachmentItem::new("ABC");
        assert_eq!(item.source_reference(), PathBuf::from("ABC"));
        item.filename = Some("paper.pdf".to_string());
        assert_eq!(item.source_reference(), PathBuf::from("paper.pdf"));
    }

    #[test]
    fn test_file_extension_from_filename() {
        let mut item = AttachmentItem::new("ABC");
        item.filename = Some("report.final.docx".to_string());
        assert_eq!(item.file_extension().as_deref(), Some(".docx"));
    }

    #[test]
    fn test_file_extension_from_content_type() {
        let mut item = AttachmentItem::new("ABC");
        item.content_type = Some("application/pdf".to_string());
        assert_eq!(item.file_extension().as_deref(), Some(".pdf"));
    }

    #[test]
    fn test_file_extension_prefers_common_mime_extensions() {
        let mut item = AttachmentItem::new("ABC");
        for (content_type, expected) in [
            ("text/plain", ".txt"),
            ("text/plain; charset=utf-8", ".txt"),
            ("text/html", ".html"),
            ("text/markdown", ".md"),
            ("Application/PDF", ".pdf"),
        ] {
            item.content_type = Some(content_type.to_string());
            assert_eq!(item.file_extension().as_deref(), Some(expected), "{}", content_type);
        }
    }

    #[test]
    fn test_file_extension_unknown() {
        let item = AttachmentItem::new("ABC");
        assert!(item.file_extension().is_none());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(OutcomeStatus::DryRun.to_string(), "dry-run");
        assert_eq!(OutcomeStatus::Converted.to_string(), "converted");
    }
}

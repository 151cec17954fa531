//! Output path resolution.
//!
//! Every attachment maps to `<reference folder>/<attachment slug>.md` relative
//! to the output directory. The mapping is pure: two different attachments may
//! legitimately land on the same path, which the dedup filter handles.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::config::ReferenceFolderName;
use crate::model::AttachmentItem;

/// Maximum slug length in characters.
pub const MAX_SLUG_LEN: usize = 120;

/// Token used when no metadata yields a usable slug.
pub const FALLBACK_SLUG: &str = "item";

pub const MARKDOWN_EXTENSION: &str = "md";

static RE_DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());
static RE_REPEATED_DASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").unwrap());

fn clean_slug_text(text: &str) -> String {
    let normalized: String = text.nfkd().collect();
    let replaced = RE_DISALLOWED.replace_all(normalized.trim(), "-");
    let collapsed = RE_REPEATED_DASH.replace_all(&replaced, "-");
    collapsed
        .trim_matches(|c| c == '-' || c == '.' || c == '_')
        .to_string()
}

/// Creates a filesystem-friendly slug containing only `A-Za-z0-9._-`.
///
/// Falls back to `fallback`, then to [`FALLBACK_SLUG`], when the preferred
/// text is empty after cleanup. Never returns an empty string.
pub fn slugify(value: Option<&str>, fallback: &str) -> String {
    let mut text = clean_slug_text(value.unwrap_or(""));
    if text.is_empty() {
        text = clean_slug_text(fallback);
    }
    if text.is_empty() {
        text = FALLBACK_SLUG.to_string();
    }
    // Slugs are pure ASCII at this point, so byte truncation is safe.
    text.truncate(MAX_SLUG_LEN);
    text
}

/// Slugifies the first candidate that survives cleanup.
fn first_slug<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(clean_slug_text)
        .find(|slug| !slug.is_empty())
        .map(|mut slug| {
            slug.truncate(MAX_SLUG_LEN);
            slug
        })
        .unwrap_or_else(|| FALLBACK_SLUG.to_string())
}

/// Name of the per-reference folder for an attachment.
pub fn reference_folder(item: &AttachmentItem, strategy: ReferenceFolderName) -> String {
    let parent_title = item.parent_title.as_deref();
    let parent_key = item.parent_key.as_deref();
    let citation_key = item.parent_citation_key.as_deref();

    match strategy {
        ReferenceFolderName::CitationKey => first_slug([citation_key, parent_title, parent_key]),
        ReferenceFolderName::ItemTitle => first_slug([parent_title, parent_key, citation_key]),
    }
}

/// Relative output path for an attachment under the given naming strategy.
pub fn resolve(item: &AttachmentItem, strategy: ReferenceFolderName) -> PathBuf {
    let folder = reference_folder(item, strategy);
    let filename = slugify(item.title.as_deref(), &item.key);
    PathBuf::from(folder).join(format!("{}.{}", filename, MARKDOWN_EXTENSION))
}

/// Output path for an attachment rooted at `output_dir`.
pub fn resolve_in(
    output_dir: &Path,
    item: &AttachmentItem,
    strategy: ReferenceFolderName,
) -> PathBuf {
    output_dir.join(resolve(item, strategy))
}

//! Zotero Web API (v3) attachment source.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs::File;
use std::path::Path;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ExportSettings, LibraryType, SourceFilter};
use crate::error::SourceError;
use crate::model::AttachmentItem;

use super::{AttachmentFetcher, AttachmentSource, AttachmentStream};

pub const DEFAULT_BASE_URL: &str = "https://api.zotero.org";
const API_VERSION: &str = "3";

/// Link modes whose file is stored in Zotero and can be downloaded.
const DOWNLOADABLE_LINK_MODES: &[&str] = &["imported_file", "imported_url"];

static RE_CITATION_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:citation\s*key|citekey)\s*:\s*(.+?)\s*$").unwrap()
});

#[derive(Debug, Deserialize)]
struct ApiItem {
    #[serde(default)]
    data: ItemData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ItemData {
    key: Option<String>,
    title: Option<String>,
    parent_item: Option<String>,
    link_mode: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    collections: Vec<String>,
    tags: Vec<ApiTag>,
    date_added: Option<String>,
    date_modified: Option<String>,
    citation_key: Option<Value>,
    extra: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ApiTag {
    tag: String,
}

impl ItemData {
    fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .map(|t| t.tag.as_str())
            .filter(|name| !name.is_empty())
    }

    fn is_downloadable(&self) -> bool {
        let downloadable = self
            .link_mode
            .as_deref()
            .is_some_and(|mode| DOWNLOADABLE_LINK_MODES.contains(&mode));
        if !downloadable {
            debug!(
                "Skipping non-imported attachment {:?} with linkMode={:?}",
                self.key, self.link_mode
            );
        }
        downloadable
    }
}

/// Blocking client for one user or group library.
pub struct ZoteroClient {
    http: Client,
    library_url: String,
    api_key: SecretString,
    parent_cache: Mutex<HashMap<String, Option<ItemData>>>,
}

impl ZoteroClient {
    pub fn new(settings: &ExportSettings) -> Result<Self, SourceError> {
        Self::with_base_url(
            DEFAULT_BASE_URL,
            settings.library_type,
            &settings.library_id,
            settings.api_key.clone(),
            settings.download_timeout,
        )
    }

    pub fn with_base_url(
        base_url: &str,
        library_type: LibraryType,
        library_id: &str,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("files2md/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SourceError::Client)?;

        let library_url = format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            library_type.api_prefix(),
            library_id
        );
        debug!("Initialised Zotero client for {} library {}", library_type, library_id);

        Ok(Self {
            http,
            library_url,
            api_key,
            parent_cache: Mutex::new(HashMap::new()),
        })
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.http
            .get(url)
            .header("Zotero-API-Key", self.api_key.expose_secret())
            .header("Zotero-API-Version", API_VERSION)
    }

    fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, SourceError> {
        let response = request.send().map_err(|e| SourceError::Request {
            url: url.to_string(),
            source: e,
        })?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    fn items_url(&self, collection: Option<&str>) -> String {
        match collection {
            Some(key) => format!("{}/collections/{}/items", self.library_url, key),
            None => format!("{}/items", self.library_url),
        }
    }

    /// One page of attachment items, newest modification first.
    fn fetch_page(
        &self,
        collection: Option<&str>,
        start: usize,
        limit: usize,
    ) -> Result<Vec<ApiItem>, SourceError> {
        let url = self.items_url(collection);
        let query = [
            ("itemType", "attachment".to_string()),
            ("format", "json".to_string()),
            ("limit", limit.to_string()),
            ("start", start.to_string()),
            ("sort", "dateModified".to_string()),
            ("direction", "desc".to_string()),
        ];
        let response = self.send(&url, self.get(&url).query(&query))?;
        response.json().map_err(|e| SourceError::Decode { url, source: e })
    }

    /// Parent item data, cached per client. A missing parent yields `None`.
    fn parent(&self, key: &str) -> Result<Option<ItemData>, SourceError> {
        if let Ok(cache) = self.parent_cache.lock() {
            if let Some(cached) = cache.get(key) {
                return Ok(cached.clone());
            }
        }

        let url = format!("{}/items/{}", self.library_url, key);
        let parent = match self.send(&url, self.get(&url).query(&[("format", "json")])) {
            Ok(response) => {
                let item: ApiItem = response
                    .json()
                    .map_err(|e| SourceError::Decode { url, source: e })?;
                Some(item.data)
            }
            Err(SourceError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                warn!("Parent item {} not found; continuing without metadata", key);
                None
            }
            Err(e) => return Err(e),
        };

        if let Ok(mut cache) = self.parent_cache.lock() {
            cache.insert(key.to_string(), parent.clone());
        }
        Ok(parent)
    }
}

impl AttachmentSource for ZoteroClient {
    fn attachments(&self, filter: &SourceFilter) -> AttachmentStream<'_> {
        Box::new(AttachmentPages::new(self, filter))
    }
}

impl AttachmentFetcher for ZoteroClient {
    fn fetch(&self, item: &AttachmentItem, destination: &Path) -> Result<(), SourceError> {
        let url = format!("{}/items/{}/file", self.library_url, item.key);
        let mut response = self.send(&url, self.get(&url))?;

        let mut file = File::create(destination).map_err(|e| SourceError::WriteFile {
            path: destination.to_path_buf(),
            source: e,
        })?;
        let bytes = response
            .copy_to(&mut file)
            .map_err(|e| SourceError::Request { url, source: e })?;
        debug!("Fetched {} bytes for attachment {}", bytes, item.key);
        Ok(())
    }
}

/// Lazy page walk over one or more item listings.
struct AttachmentPages<'a> {
    client: &'a ZoteroClient,
    collection_filter: BTreeSet<String>,
    tag_filter: HashSet<String>,
    limit: Option<usize>,
    chunk_size: usize,
    /// Listings still to walk; `None` is the whole library.
    listings: VecDeque<Option<String>>,
    start: usize,
    buffer: VecDeque<ApiItem>,
    seen: HashSet<String>,
    yielded: usize,
    finished: bool,
}

impl<'a> AttachmentPages<'a> {
    fn new(client: &'a ZoteroClient, filter: &SourceFilter) -> Self {
        let listings: VecDeque<Option<String>> = if filter.collections.is_empty() {
            VecDeque::from([None])
        } else {
            filter.collections.iter().cloned().map(Some).collect()
        };

        Self {
            client,
            collection_filter: filter.collections.clone(),
            tag_filter: filter.tags.iter().map(|t| t.to_lowercase()).collect(),
            limit: filter.limit,
            chunk_size: filter.chunk_size.max(1),
            listings,
            start: 0,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            yielded: 0,
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        if self.yielded == 0 {
            info!("No attachments matched the specified filters.");
        }
    }

    /// Turns a raw item into an attachment if it passes every filter.
    fn accept(&mut self, raw: ApiItem) -> Result<Option<AttachmentItem>, SourceError> {
        let data = raw.data;
        let Some(key) = data.key.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        if !self.seen.insert(key.clone()) {
            return Ok(None);
        }
        if !data.is_downloadable() {
            return Ok(None);
        }

        let parent = match data.parent_item.as_deref() {
            Some(parent_key) => self.client.parent(parent_key)?,
            None => None,
        };

        let collections: BTreeSet<String> = data
            .collections
            .iter()
            .chain(parent.iter().flat_map(|p| p.collections.iter()))
            .cloned()
            .collect();
        let tags: BTreeSet<String> = data
            .tag_names()
            .chain(parent.iter().flat_map(|p| p.tag_names()))
            .map(|t| t.to_string())
            .collect();

        if !self.collection_filter.is_empty()
            && collections.is_disjoint(&self.collection_filter)
        {
            return Ok(None);
        }
        if !self.tag_filter.is_empty()
            && !tags.iter().any(|t| self.tag_filter.contains(&t.to_lowercase()))
        {
            return Ok(None);
        }

        Ok(Some(AttachmentItem {
            key,
            title: data.title.clone(),
            parent_key: data.parent_item.clone(),
            parent_title: parent.as_ref().and_then(|p| p.title.clone()),
            parent_citation_key: parent.as_ref().and_then(parent_citation_key),
            filename: data.filename.clone(),
            content_type: data.content_type.clone(),
            collections,
            tags,
            date_added: data.date_added.as_deref().and_then(parse_timestamp),
            date_modified: data.date_modified.as_deref().and_then(parse_timestamp),
        }))
    }
}

impl Iterator for AttachmentPages<'_> {
    type Item = Result<AttachmentItem, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if self.limit.is_some_and(|limit| self.yielded >= limit) {
                self.finished = true;
                return None;
            }

            if let Some(raw) = self.buffer.pop_front() {
                match self.accept(raw) {
                    Ok(Some(item)) => {
                        self.yielded += 1;
                        return Some(Ok(item));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            }

            let Some(listing) = self.listings.front().cloned() else {
                self.finish();
                return None;
            };

            match self
                .client
                .fetch_page(listing.as_deref(), self.start, self.chunk_size)
            {
                Ok(batch) if batch.is_empty() => {
                    self.listings.pop_front();
                    self.start = 0;
                }
                Ok(batch) => {
                    debug!(
                        "Fetched {} item(s) at offset {} from {:?}",
                        batch.len(),
                        self.start,
                        listing
                    );
                    self.start += batch.len();
                    self.buffer.extend(batch);
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Citation key of a parent item, from `citationKey` or an `extra` line.
fn parent_citation_key(parent: &ItemData) -> Option<String> {
    if let Some(direct) = parent.citation_key.as_ref().and_then(Value::as_str) {
        let cleaned = direct.trim();
        if !cleaned.is_empty() {
            return Some(cleaned.to_string());
        }
    }

    let extra = parent.extra.as_ref().and_then(Value::as_str)?;
    extra.lines().find_map(|line| {
        RE_CITATION_KEY
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|key| !key.is_empty())
    })
}

/// Parses Zotero timestamps, returning `None` on anything unrecognised.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn item_data(value: serde_json::Value) -> ItemData {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_citation_key_from_field() {
        let parent = item_data(json!({"citationKey": "  smith2023  ", "extra": "Citation Key: other"}));
        assert_eq!(parent_citation_key(&parent), Some("smith2023".to_string()));
    }

    #[test]
    fn test_citation_key_from_extra() {
        for extra in [
            "tex.note: x\nCitation Key: doe2021deep",
            "citationkey:doe2021deep",
            "  CITEKEY :  doe2021deep  ",
        ] {
            let parent = item_data(json!({"extra": extra}));
            assert_eq!(
                parent_citation_key(&parent),
                Some("doe2021deep".to_string()),
                "extra: {:?}",
                extra
            );
        }
    }

    #[test]
    fn test_citation_key_absent() {
        assert_eq!(parent_citation_key(&item_data(json!({}))), None);
        assert_eq!(
            parent_citation_key(&item_data(json!({"citationKey": "   ", "extra": "PMID: 1"}))),
            None
        );
        // Non-string values are ignored rather than failing the page.
        assert_eq!(
            parent_citation_key(&item_data(json!({"citationKey": 42}))),
            None
        );
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp("2023-04-05T06:07:08Z"),
            Some(Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap())
        );
        assert_eq!(
            parse_timestamp("2023-04-05T08:07:08+02:00"),
            Some(Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap())
        );
        assert_eq!(
            parse_timestamp("2023-04-05 06:07:08"),
            Some(Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap())
        );
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_downloadable_link_modes() {
        assert!(item_data(json!({"linkMode": "imported_file"})).is_downloadable());
        assert!(item_data(json!({"linkMode": "imported_url"})).is_downloadable());
        assert!(!item_data(json!({"linkMode": "linked_file"})).is_downloadable());
        assert!(!item_data(json!({"linkMode": "linked_url"})).is_downloadable());
        assert!(!item_data(json!({})).is_downloadable());
    }

    #[test]
    fn test_tag_names_skip_empty() {
        let data = item_data(json!({"tags": [{"tag": "ml"}, {"tag": ""}, {"type": 1}]}));
        assert_eq!(data.tag_names().collect::<Vec<_>>(), vec!["ml"]);
    }

    #[test]
    fn test_library_urls() {
        let client = ZoteroClient::with_base_url(
            "http://localhost:1/",
            LibraryType::Group,
            "42",
            SecretString::from("key".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.items_url(None), "http://localhost:1/groups/42/items");
        assert_eq!(
            client.items_url(Some("COLL1")),
            "http://localhost:1/groups/42/collections/COLL1/items"
        );
    }
}

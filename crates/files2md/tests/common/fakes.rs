//! In-memory stand-ins for the Zotero API and the conversion engine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use files2md::config::SourceFilter;
use files2md::engine::{ConversionEngine, Device, EngineFactory, RenderOptions};
use files2md::error::{RenderError, SourceError};
use files2md::model::AttachmentItem;
use files2md::source::{AttachmentFetcher, AttachmentSource, AttachmentStream};

/// Attachment stored as `<key>.txt` under a parent with `citation_key`.
pub fn item(key: &str, title: &str, citation_key: &str) -> AttachmentItem {
    AttachmentItem {
        key: key.to_string(),
        title: Some(title.to_string()),
        parent_key: Some(format!("P-{}", key)),
        parent_citation_key: Some(citation_key.to_string()),
        filename: Some(format!("{}.txt", key)),
        content_type: Some("text/plain".to_string()),
        ..AttachmentItem::default()
    }
}

/// Lists a fixed set of attachments, honouring the limit.
pub struct MemorySource {
    items: Vec<AttachmentItem>,
    listings: AtomicUsize,
}

impl MemorySource {
    pub fn new(items: Vec<AttachmentItem>) -> Self {
        Self {
            items,
            listings: AtomicUsize::new(0),
        }
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

impl AttachmentSource for MemorySource {
    fn attachments(&self, filter: &SourceFilter) -> AttachmentStream<'_> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let limit = filter.limit.unwrap_or(usize::MAX);
        Box::new(
            self.items
                .iter()
                .take(limit)
                .cloned()
                .map(Ok::<_, SourceError>),
        )
    }
}

/// Serves `body of <key>` for every attachment and records fetched keys.
#[derive(Default)]
pub struct MemoryFetcher {
    missing: Vec<String>,
    fetched: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails downloads for the given keys.
    pub fn with_missing(keys: &[&str]) -> Self {
        Self {
            missing: keys.iter().map(|k| k.to_string()).collect(),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        let mut keys = self.fetched.lock().unwrap().clone();
        keys.sort();
        keys
    }
}

impl AttachmentFetcher for MemoryFetcher {
    fn fetch(&self, item: &AttachmentItem, destination: &Path) -> Result<(), SourceError> {
        self.fetched.lock().unwrap().push(item.key.clone());
        if self.missing.contains(&item.key) {
            return Err(SourceError::Unavailable(
                item.key.clone(),
                "HTTP 404".to_string(),
            ));
        }
        std::fs::write(destination, format!("body of {}", item.key)).map_err(|e| {
            SourceError::WriteFile {
                path: destination.to_path_buf(),
                source: e,
            }
        })
    }
}

/// How the scripted engine reacts per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineScript {
    /// Echoes the downloaded bytes.
    Echo,
    /// Runs out of memory on any accelerated device, echoes on the CPU.
    OutOfMemoryOnAccelerator,
    /// Runs out of memory everywhere.
    AlwaysOutOfMemory,
}

/// Records every render call as `(attachment key, device)`.
pub struct ScriptedEngineFactory {
    script: EngineScript,
    renders: Arc<Mutex<Vec<(String, Device)>>>,
    builds: Arc<AtomicUsize>,
}

impl ScriptedEngineFactory {
    pub fn new(script: EngineScript) -> Self {
        Self {
            script,
            renders: Arc::new(Mutex::new(Vec::new())),
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn renders(&self) -> Vec<(String, Device)> {
        self.renders.lock().unwrap().clone()
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl EngineFactory for ScriptedEngineFactory {
    fn build(&self, _options: &RenderOptions) -> Result<Box<dyn ConversionEngine>, RenderError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            script: self.script,
            renders: Arc::clone(&self.renders),
        }))
    }
}

/// Attachment key of a scratch file named `<index>-<key><ext>`.
fn scratch_key(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match stem.split_once('-') {
        Some((_, key)) => key.to_string(),
        None => stem,
    }
}

struct ScriptedEngine {
    script: EngineScript,
    renders: Arc<Mutex<Vec<(String, Device)>>>,
}

impl ConversionEngine for ScriptedEngine {
    fn render(&mut self, input: &Path, options: &RenderOptions) -> Result<String, RenderError> {
        self.renders
            .lock()
            .unwrap()
            .push((scratch_key(input), options.device));

        let out_of_memory = match self.script {
            EngineScript::Echo => false,
            EngineScript::OutOfMemoryOnAccelerator => options.device.is_accelerated(),
            EngineScript::AlwaysOutOfMemory => true,
        };
        if out_of_memory {
            return Err(RenderError::CommandFailed {
                status: "exit status: 1".to_string(),
                stderr: "RuntimeError: CUDA out of memory. Tried to allocate 2.00 GiB".to_string(),
            });
        }
        Ok(std::fs::read_to_string(input)?)
    }
}

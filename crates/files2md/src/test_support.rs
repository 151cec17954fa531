//! Fakes shared by unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::SourceFilter;
use crate::engine::{ConversionEngine, Device, EngineFactory, RenderOptions};
use crate::error::{RenderError, SourceError};
use crate::model::{AttachmentItem, PipelineOutcome};
use crate::pipeline::progress::{PipelinePhase, ProgressEvent, ProgressReporter};
use crate::source::{AttachmentFetcher, AttachmentSource, AttachmentStream};

/// Attachment with a title and a parent citation key, stored as `<key>.txt`.
pub fn attachment(key: &str, title: &str, citation_key: &str) -> AttachmentItem {
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

type RenderFn = dyn Fn(&Path, &RenderOptions) -> Result<String, RenderError> + Send + Sync;

/// Counters shared between a fake factory and the engines it builds.
#[derive(Default)]
pub struct EngineLog {
    pub builds: AtomicUsize,
    pub releases: AtomicUsize,
    renders: Mutex<Vec<Device>>,
}

impl EngineLog {
    /// Devices of every render call, in call order.
    pub fn devices(&self) -> Vec<Device> {
        self.renders.lock().unwrap().clone()
    }
}

pub struct FakeEngineFactory {
    behavior: Option<Arc<RenderFn>>,
    log: Arc<EngineLog>,
}

impl FakeEngineFactory {
    pub fn new(
        behavior: impl Fn(&Path, &RenderOptions) -> Result<String, RenderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            behavior: Some(Arc::new(behavior)),
            log: Arc::new(EngineLog::default()),
        }
    }

    /// Returns the input file's content as the rendered text.
    pub fn echo() -> Self {
        Self::new(|input, _| {
            std::fs::read_to_string(input).map_err(|e| RenderError::ReadInput {
                path: input.to_path_buf(),
                source: e,
            })
        })
    }

    pub fn constant(text: &'static str) -> Self {
        Self::new(move |_, _| Ok(text.to_string()))
    }

    /// Fails with a typed memory error on accelerators, echoes on the CPU.
    pub fn out_of_memory_on_accelerator() -> Self {
        Self::new(|input, options| match options.device {
            Device::Cpu => std::fs::read_to_string(input).map_err(RenderError::Io),
            device => Err(RenderError::AcceleratorOutOfMemory {
                device: device.to_string(),
                message: "CUDA out of memory".to_string(),
            }),
        })
    }

    pub fn always_out_of_memory() -> Self {
        Self::new(|_, _| {
            Err(RenderError::CommandFailed {
                status: "exit status: 1".to_string(),
                stderr: "torch.OutOfMemoryError: CUDA out of memory".to_string(),
            })
        })
    }

    pub fn failing_render(message: &'static str) -> Self {
        Self::new(move |_, _| Err(RenderError::Engine(message.to_string())))
    }

    pub fn failing_build() -> Self {
        Self {
            behavior: None,
            log: Arc::new(EngineLog::default()),
        }
    }

    pub fn log(&self) -> Arc<EngineLog> {
        Arc::clone(&self.log)
    }
}

impl EngineFactory for FakeEngineFactory {
    fn build(&self, _options: &RenderOptions) -> Result<Box<dyn ConversionEngine>, RenderError> {
        let behavior = self
            .behavior
            .clone()
            .ok_or_else(|| RenderError::Engine("model weights missing".to_string()))?;
        self.log.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEngine {
            behavior,
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeEngine {
    behavior: Arc<RenderFn>,
    log: Arc<EngineLog>,
}

impl ConversionEngine for FakeEngine {
    fn render(&mut self, input: &Path, options: &RenderOptions) -> Result<String, RenderError> {
        self.log.renders.lock().unwrap().push(options.device);
        (self.behavior)(input, options)
    }

    fn release_accelerator_memory(&mut self) {
        self.log.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Serves attachment bytes from memory and records every fetch.
pub struct FakeFetcher {
    files: HashMap<String, Vec<u8>>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl FakeFetcher {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(key, body)| (key.to_string(), body.as_bytes().to_vec()))
                .collect(),
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fetched(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.fetched)
    }
}

impl AttachmentFetcher for FakeFetcher {
    fn fetch(&self, item: &AttachmentItem, destination: &Path) -> Result<(), SourceError> {
        self.fetched.lock().unwrap().push(item.key.clone());
        let bytes = self.files.get(&item.key).ok_or_else(|| {
            SourceError::Unavailable(item.key.clone(), "not found".to_string())
        })?;
        std::fs::write(destination, bytes).map_err(|e| SourceError::WriteFile {
            path: destination.to_path_buf(),
            source: e,
        })
    }
}

/// Source over a fixed list; the filter's limit is honoured.
pub struct VecSource(pub Vec<AttachmentItem>);

impl AttachmentSource for VecSource {
    fn attachments(&self, filter: &SourceFilter) -> AttachmentStream<'_> {
        let limit = filter.limit.unwrap_or(usize::MAX);
        Box::new(self.0.iter().take(limit).cloned().map(Ok::<_, SourceError>))
    }
}

/// Captures every progress event.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn phases(&self) -> Vec<PipelinePhase> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Phase { phase, .. } => Some(*phase),
                ProgressEvent::Finished { .. } => None,
            })
            .collect()
    }

    pub fn finished(&self) -> Vec<PipelineOutcome> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Finished { outcome, .. } => Some(outcome.clone()),
                ProgressEvent::Phase { .. } => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

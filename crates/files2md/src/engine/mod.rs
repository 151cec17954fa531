pub mod cache;
pub mod command;
pub mod native;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::{EngineKind, EngineSettings, ImageProcessing, RenderSettings};
use crate::error::RenderError;
use crate::topology::AcceleratorTopology;

pub use cache::EngineCache;
pub use command::{CommandEngine, CommandEngineFactory};
pub use native::{NativeEngine, NativeEngineFactory};

/// Device a worker asks the engine to render on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Let the engine pick.
    Auto,
    Cpu,
    /// Logical accelerator index into the detected topology.
    Accelerator(usize),
}

impl Device {
    /// Whether a failure on this device may be an accelerator memory failure.
    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Auto => f.write_str("auto"),
            Device::Cpu => f.write_str("cpu"),
            Device::Accelerator(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// Per-call rendering options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub device: Device,
    pub settings: RenderSettings,
}

impl RenderOptions {
    pub fn new(device: Device, settings: RenderSettings) -> Self {
        Self { device, settings }
    }

    /// Same options, forced onto the CPU.
    pub fn on_cpu(&self) -> Self {
        Self {
            device: Device::Cpu,
            settings: self.settings,
        }
    }
}

/// Identity of an engine configuration.
///
/// Two option sets with equal fingerprints can share an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineFingerprint {
    force_full_page_ocr: bool,
    do_picture_description: bool,
    image_scale_bits: u32,
    image_processing: ImageProcessing,
    device: Device,
}

impl EngineFingerprint {
    pub fn new(options: &RenderOptions) -> Self {
        let settings = &options.settings;
        Self {
            force_full_page_ocr: settings.force_full_page_ocr,
            do_picture_description: settings.do_picture_description,
            image_scale_bits: settings.image_resolution_scale.to_bits(),
            image_processing: settings.image_processing,
            device: options.device,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

/// Converts a local document into Markdown text.
///
/// Instances are owned by a single worker and may hold accelerator memory
/// between calls.
pub trait ConversionEngine {
    fn render(&mut self, input: &Path, options: &RenderOptions) -> Result<String, RenderError>;

    /// Frees accelerator allocations held by this instance.
    fn release_accelerator_memory(&mut self) {}
}

/// Builds engine instances for workers. Shared across the pool.
pub trait EngineFactory: Send + Sync {
    fn build(&self, options: &RenderOptions) -> Result<Box<dyn ConversionEngine>, RenderError>;
}

/// Factory for the engine selected in settings.
pub fn factory_from_settings(
    settings: &EngineSettings,
    topology: &AcceleratorTopology,
) -> Arc<dyn EngineFactory> {
    match settings.kind {
        EngineKind::Command => Arc::new(CommandEngineFactory::from_settings(settings, topology)),
        EngineKind::Native => Arc::new(NativeEngineFactory::new()),
    }
}

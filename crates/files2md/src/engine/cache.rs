use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::RenderError;

use super::{ConversionEngine, EngineFactory, EngineFingerprint, RenderOptions};

/// Lazily built engine owned by one worker.
///
/// Holds at most one instance, keyed by the fingerprint of the options it was
/// built for. A call with different options drops the old instance first.
pub struct EngineCache {
    factory: Arc<dyn EngineFactory>,
    cached: Option<(EngineFingerprint, Box<dyn ConversionEngine>)>,
    builds: usize,
}

impl EngineCache {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            cached: None,
            builds: 0,
        }
    }

    pub fn fingerprint(&self) -> Option<&EngineFingerprint> {
        self.cached.as_ref().map(|(fingerprint, _)| fingerprint)
    }

    /// Number of instances built over the cache's lifetime.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn render(&mut self, input: &Path, options: &RenderOptions) -> Result<String, RenderError> {
        let fingerprint = EngineFingerprint::new(options);

        if self.fingerprint() != Some(&fingerprint) {
            self.release();
            debug!("Building conversion engine for device {}", options.device);
            let engine = self.factory.build(options)?;
            self.builds += 1;
            self.cached = Some((fingerprint, engine));
        }

        match self.cached.as_mut() {
            Some((_, engine)) => engine.render(input, options),
            None => Err(RenderError::Engine("engine cache is empty".to_string())),
        }
    }

    /// Drops the cached instance after asking it to free accelerator memory.
    pub fn release(&mut self) {
        if let Some((fingerprint, mut engine)) = self.cached.take() {
            debug!("Releasing conversion engine for device {}", fingerprint.device());
            engine.release_accelerator_memory();
        }
    }
}

impl Drop for EngineCache {
    fn drop(&mut self) {
        self.release();
    }
}

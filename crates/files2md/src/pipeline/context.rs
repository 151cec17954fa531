use std::sync::Arc;

use crate::engine::{Device, EngineCache, EngineFactory};

/// State owned by one worker for its whole lifetime.
pub struct WorkerContext {
    pub worker_id: usize,
    /// Preferred device; fixed at pool construction.
    pub device: Device,
    pub engine: EngineCache,
}

impl WorkerContext {
    pub fn new(worker_id: usize, device: Device, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            worker_id,
            device,
            engine: EngineCache::new(factory),
        }
    }
}

pub mod job;
pub mod plan;
pub mod pool;

pub use job::WorkItem;
pub use plan::{AcceleratorAssignment, WorkerPoolPlan, WorkerSlot};
pub use pool::WorkerPool;
